use std::sync::atomic::{AtomicU64, Ordering};

/// Rate-limited resources a session consumes on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    /// A push or merge that landed on the remote.
    Commits,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Commits => "commits",
        }
    }
}

/// Fire-and-forget counter bumped after each successful remote write.
pub trait UsageCounter: Send + Sync {
    fn increment(&self, kind: UsageKind);
}

/// Discards every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsage;

impl UsageCounter for NoopUsage {
    fn increment(&self, _kind: UsageKind) {}
}

/// In-process counter, mostly useful for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct AtomicUsage {
    commits: AtomicU64,
}

impl AtomicUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: UsageKind) -> u64 {
        match kind {
            UsageKind::Commits => self.commits.load(Ordering::Relaxed),
        }
    }
}

impl UsageCounter for AtomicUsage {
    fn increment(&self, kind: UsageKind) {
        match kind {
            UsageKind::Commits => self.commits.fetch_add(1, Ordering::Relaxed),
        };
    }
}

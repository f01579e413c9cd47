use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// CommandError
// ---------------------------------------------------------------------------

/// A single `git` invocation that exited unsuccessfully (or never started).
///
/// Keeps the full diagnostic payload so that unclassified failures reach the
/// caller exactly as git reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub args: Vec<String>,
    /// `None` when the process could not be spawned or was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandError {
    /// Whether either output stream mentions `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.stderr.contains(needle) || self.stdout.contains(needle)
    }

    /// The most useful human-readable line(s) of output.
    pub fn detail(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self.exit_code {
            Some(code) => code.to_string(),
            None => "none".to_string(),
        };
        write!(
            f,
            "`git {}` failed (exit {}): {}",
            self.args.join(" "),
            code,
            self.detail()
        )
    }
}

impl std::error::Error for CommandError {}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// What a git failure means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote host misbehaved; retrying may help.
    TransientHost,
    RepositoryEmpty,
    RepositoryDisabled,
    /// The remote moved under us; the caller must recompute from scratch.
    RepositoryChanged,
    InsufficientDiskSpace,
    InvalidPath,
    /// The forge rejected the push because of project push rules.
    PushRulesViolation,
    Unknown,
}

/// Ordered `(substring, kind)` table. First match wins.
pub const FAILURE_PATTERNS: &[(&str, FailureKind)] = &[
    ("remote: Invalid username or password", FailureKind::TransientHost),
    ("gnutls_handshake() failed", FailureKind::TransientHost),
    ("The requested URL returned error: 5", FailureKind::TransientHost),
    ("The remote end hung up unexpectedly", FailureKind::TransientHost),
    ("access denied or repository not exported", FailureKind::TransientHost),
    ("Could not write new index file", FailureKind::TransientHost),
    ("Failed to connect to", FailureKind::TransientHost),
    ("Connection timed out", FailureKind::TransientHost),
    ("malformed object name", FailureKind::TransientHost),
    ("Could not resolve host", FailureKind::TransientHost),
    ("early EOF", FailureKind::TransientHost),
    // .gitmodules problems surface this way
    ("fatal: bad config", FailureKind::TransientHost),
    ("expected flush after ref listing", FailureKind::TransientHost),
    ("No space left on device", FailureKind::InsufficientDiskSpace),
    ("no space left on device", FailureKind::InsufficientDiskSpace),
    ("is not a symbolic ref", FailureKind::RepositoryEmpty),
    ("does not have any commits yet", FailureKind::RepositoryEmpty),
    (
        "Please ask the owner to check their account",
        FailureKind::RepositoryDisabled,
    ),
    ("(stale info)", FailureKind::RepositoryChanged),
    ("fatal: ambiguous argument", FailureKind::RepositoryChanged),
    ("fatal: bad revision", FailureKind::RepositoryChanged),
    ("fatal: Not a valid object name", FailureKind::RepositoryChanged),
    ("is outside repository", FailureKind::InvalidPath),
    (
        "Branch name does not follow the pattern",
        FailureKind::PushRulesViolation,
    ),
    (
        "Commit message does not follow the pattern",
        FailureKind::PushRulesViolation,
    ),
    (
        "You are not allowed to push code to",
        FailureKind::PushRulesViolation,
    ),
    ("is not a valid branch name", FailureKind::PushRulesViolation),
];

/// Classify a free-text git failure message against [`FAILURE_PATTERNS`].
pub fn classify(message: &str) -> FailureKind {
    FAILURE_PATTERNS
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

// ---------------------------------------------------------------------------
// GitError
// ---------------------------------------------------------------------------

/// Errors surfaced by repository session operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Remote communication failed in a way that retrying may fix.
    ///
    /// This typically occurs when:
    /// - The forge returns a 5xx or drops the connection
    /// - DNS resolution or the TLS handshake fails
    /// - Credentials are temporarily rejected
    #[error("external host failure: {0}")]
    ExternalHost(#[source] CommandError),

    #[error("repository is empty")]
    RepositoryEmpty,

    #[error("repository is disabled")]
    RepositoryDisabled,

    /// The remote was mutated concurrently (force-push, deleted branch,
    /// stale lease). Callers restart their higher-level operation.
    #[error("repository changed during the run")]
    RepositoryChanged,

    #[error("insufficient disk space")]
    InsufficientDiskSpace,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The repository or user configuration prevents the operation.
    #[error("config validation: {0}")]
    ConfigValidation(String),

    /// Something went wrong that should go away on the next run.
    #[error("temporary error: {0}")]
    Temporary(String),

    /// Unclassified git failure, passed through verbatim.
    #[error(transparent)]
    Command(CommandError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

impl GitError {
    /// Only host failures are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, GitError::ExternalHost(_))
    }

    /// Failures no local fallback can paper over: the host, the disk or the
    /// account is the problem. Best-effort call sites re-raise these and
    /// swallow everything else.
    pub fn is_platform_failure(&self) -> bool {
        matches!(
            self,
            GitError::ExternalHost(_)
                | GitError::InsufficientDiskSpace
                | GitError::RepositoryDisabled
        )
    }

    /// Whether the underlying git output (or message) mentions `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        match self {
            GitError::ExternalHost(cmd) | GitError::Command(cmd) => cmd.contains(needle),
            other => other.to_string().contains(needle),
        }
    }

    /// Re-label an unclassified command failure as a host failure.
    pub fn into_host_failure(self) -> GitError {
        match self {
            GitError::Command(cmd) => GitError::ExternalHost(cmd),
            other => other,
        }
    }
}

impl From<CommandError> for GitError {
    fn from(err: CommandError) -> Self {
        let message = format!("{}\n{}", err.stderr, err.stdout);
        match classify(&message) {
            FailureKind::TransientHost => {
                debug!(error = %err, "converting git error to external host error");
                GitError::ExternalHost(err)
            }
            FailureKind::RepositoryEmpty => GitError::RepositoryEmpty,
            FailureKind::RepositoryDisabled => GitError::RepositoryDisabled,
            FailureKind::RepositoryChanged => {
                debug!(error = %err, "git reports the repository changed");
                GitError::RepositoryChanged
            }
            FailureKind::InsufficientDiskSpace => GitError::InsufficientDiskSpace,
            FailureKind::InvalidPath => GitError::InvalidPath(err.detail().to_string()),
            FailureKind::PushRulesViolation => {
                GitError::ConfigValidation(err.detail().to_string())
            }
            FailureKind::Unknown => GitError::Command(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

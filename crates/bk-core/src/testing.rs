//! Scripted git runner shared by the unit tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cache::{CacheStore, MemoryCacheStore};
use crate::config::{GitConfig, RetryConfig};
use crate::runner::{GitOutput, GitRunner};
use crate::session::RepoSession;

struct Rule {
    prefix: Vec<String>,
    output: GitOutput,
    /// `None` = answers forever.
    remaining: Option<usize>,
}

/// A mock git runner that records commands and returns canned responses.
///
/// Responses are matched by argument prefix, in registration order. Commands
/// with no matching rule succeed with empty output.
#[derive(Clone, Default)]
pub(crate) struct MockGitRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockGitRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer every command starting with `prefix` with `output`.
    pub(crate) fn on(&self, prefix: &[&str], output: GitOutput) -> &Self {
        self.push_rule(prefix, output, None)
    }

    /// Answer the next command starting with `prefix` with `output`.
    pub(crate) fn once(&self, prefix: &[&str], output: GitOutput) -> &Self {
        self.push_rule(prefix, output, Some(1))
    }

    fn push_rule(&self, prefix: &[&str], output: GitOutput, remaining: Option<usize>) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
            remaining,
        });
        self
    }

    pub(crate) fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Recorded commands joined with spaces, for readable assertions.
    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(|c| c.join(" ")).collect()
    }

    pub(crate) fn count(&self, prefix: &[&str]) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.len() >= prefix.len() && c.iter().zip(prefix).all(|(a, b)| a == b))
            .count()
    }

    pub(crate) fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }
}

#[async_trait]
impl GitRunner for MockGitRunner {
    async fn run_git(&self, _dir: &Path, args: &[String]) -> std::io::Result<GitOutput> {
        self.commands.lock().unwrap().push(args.to_vec());

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.remaining == Some(0) {
                continue;
            }
            let matches = args.len() >= rule.prefix.len()
                && args.iter().zip(&rule.prefix).all(|(a, b)| a == b);
            if matches {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                return Ok(rule.output.clone());
            }
        }
        Ok(GitOutput::ok(""))
    }
}

/// Answer `HEAD` lookups as if `branch` were checked out at `sha`.
pub(crate) fn head_at(git: &MockGitRunner, branch: &str, sha: &str) {
    git.on(&["rev-parse", "--abbrev-ref", "HEAD"], GitOutput::ok(format!("{branch}\n")));
    git.on(&["rev-parse", "HEAD"], GitOutput::ok(format!("{sha}\n")));
}

pub(crate) const MAIN_SHA: &str = "1111111111111111111111111111111111111111";
pub(crate) const FEATURE_SHA: &str = "2222222222222222222222222222222222222222";

/// Config pointing at `dir` with instant retries.
pub(crate) fn test_config(dir: &Path) -> GitConfig {
    GitConfig {
        local_dir: dir.to_path_buf(),
        retry: RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            backoff_factor: 1,
        },
        ..GitConfig::default()
    }
}

pub(crate) fn memory_store() -> Arc<dyn CacheStore> {
    Arc::new(MemoryCacheStore::new(128))
}

/// A session over `dir` whose registry knows `main` and `feature`, with the
/// mirror considered synced on `main`.
pub(crate) async fn synced_session(dir: &Path, git: &MockGitRunner) -> RepoSession {
    synced_session_with_store(dir, git, memory_store()).await
}

pub(crate) async fn synced_session_with_store(
    dir: &Path,
    git: &MockGitRunner,
    store: Arc<dyn CacheStore>,
) -> RepoSession {
    let ls_remote = format!("{MAIN_SHA}\trefs/heads/main\n{FEATURE_SHA}\trefs/heads/feature\n");
    git.once(&["ls-remote", "--heads"], GitOutput::ok(ls_remote));

    let mut session = RepoSession::with_git_runner(
        test_config(dir),
        "https://example.com/org/repo.git",
        store,
        Arc::new(git.clone()),
    );
    session.init_repo().await.unwrap();
    session.mark_synced_for_tests("main", MAIN_SHA);
    git.clear_commands();
    session
}

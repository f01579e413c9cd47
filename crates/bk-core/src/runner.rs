use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tracing::trace;

// ---------------------------------------------------------------------------
// GitRunner trait (for testability)
// ---------------------------------------------------------------------------

/// Abstraction over the `git` binary so sessions can be driven by a mock.
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run a git command in `dir` and return its captured output.
    ///
    /// An `Err` means the process could not be run at all; a non-zero exit is
    /// reported through [`GitOutput::success`].
    async fn run_git(&self, dir: &Path, args: &[String]) -> std::io::Result<GitOutput>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// A successful run printing `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run (exit 128) printing `stderr`.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(128),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Real git runner that shells out to the `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealGitRunner;

#[async_trait]
impl GitRunner for RealGitRunner {
    async fn run_git(&self, dir: &Path, args: &[String]) -> std::io::Result<GitOutput> {
        let start = Instant::now();
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            // never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .output()
            .await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        trace!(?args, duration_ms, status = ?output.status.code(), "git command finished");

        Ok(GitOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

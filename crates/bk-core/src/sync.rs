//! Mirror lifecycle: incremental refresh or clone, default-branch discovery,
//! submodules.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::error::{GitError, Result};
use crate::repo::{
    local_name, parse_git_version, parse_local_branches, parse_remote_show_head,
    parse_submodule_paths, GIT_MINIMUM_VERSION,
};
use crate::retry::git_retry;
use crate::runner::GitRunner;
use crate::session::RepoSession;

impl RepoSession {
    /// Bring the mirror in line with the remote. Runs at most once per
    /// session; later calls return immediately.
    pub async fn sync(&mut self) -> Result<()> {
        if self.state.initialized {
            return Ok(());
        }
        self.state.initialized = true;
        let local_dir = self.config.local_dir.clone();
        debug!(local_dir = %local_dir.display(), "initializing git repository");

        let mut clone = true;
        if tokio::fs::try_exists(local_dir.join(".git").join("HEAD"))
            .await
            .unwrap_or(false)
        {
            let start = Instant::now();
            match self.refresh_mirror().await {
                Ok(()) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    info!(duration_ms, "git fetch completed");
                    clone = false;
                }
                Err(GitError::RepositoryEmpty) => return Err(GitError::RepositoryEmpty),
                Err(err) => info!(error = %err, "git fetch error, recloning"),
            }
        }
        if clone {
            self.clone_mirror().await?;
        }

        let head = self.git_raw(&["rev-parse", "HEAD"]).await.map_err(|cmd| {
            if cmd.contains("ambiguous argument 'HEAD'") {
                GitError::RepositoryEmpty
            } else {
                GitError::from(cmd)
            }
        })?;
        self.state.current_branch_sha = Some(head.trim().to_string());

        if self.config.clone_submodules {
            self.init_submodules().await;
        }
        self.check_latest_commit().await?;

        if self.state.current_branch.is_none() {
            self.state.current_branch = Some(self.default_branch().await?);
        }
        Ok(())
    }

    /// Incremental path for an existing mirror.
    async fn refresh_mirror(&mut self) -> Result<()> {
        let url = self.url.clone();
        self.git(&["remote", "set-url", "origin", url.as_str()]).await?;
        let default_branch = self.default_branch().await?;
        self.reset_to_branch(&default_branch).await?;
        self.git_retry(&["pull"]).await?;
        self.git_retry(&["fetch"]).await?;

        let current = match self.state.current_branch.clone() {
            Some(branch) => branch,
            None => self.default_branch().await?,
        };
        self.state.current_branch = Some(current.clone());
        self.reset_to_branch(&current).await?;
        self.clean_local_branches().await?;
        self.git_retry(&["remote", "prune", "origin"]).await?;
        Ok(())
    }

    async fn clone_mirror(&mut self) -> Result<()> {
        let url = self.url.clone();
        let mut args: Vec<&str> = vec!["clone", &url, "."];
        if self.config.full_clone {
            debug!("performing full clone");
        } else {
            debug!("performing blobless clone");
            args.push("--filter=blob:none");
        }
        for (key, value) in &self.config.extra_clone_opts {
            args.push(key);
            args.push(value);
        }

        let start = Instant::now();
        let this = &*self;
        let args = &args;
        let local_dir = &this.config.local_dir;
        let result = git_retry(&this.config.retry, move || async move {
            empty_dir(local_dir).await?;
            this.git(args).await
        })
        .await;

        if let Err(err) = result {
            debug!(error = %err, "git clone error");
            return Err(match err {
                err if err.contains("No space left on device") => GitError::InsufficientDiskSpace,
                GitError::RepositoryEmpty => GitError::RepositoryEmpty,
                err => err.into_host_failure(),
            });
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(duration_ms, "git clone completed");
        Ok(())
    }

    /// Delete every local branch except the checked-out one.
    async fn clean_local_branches(&self) -> Result<()> {
        let existing = parse_local_branches(&self.git(&["branch"]).await?);
        debug!(?existing, "cleaning local branches");
        for branch in &existing {
            self.delete_local_branch(branch).await?;
        }
        Ok(())
    }

    async fn init_submodules(&self) {
        for submodule in self.submodules().await {
            debug!(submodule = %submodule, "cloning git submodule");
            if let Err(err) = self
                .git_retry(&["submodule", "update", "--init", submodule.as_str()])
                .await
            {
                warn!(submodule = %submodule, error = %err, "unable to initialise git submodule");
            }
        }
    }

    /// Submodule paths declared in `.gitmodules`.
    pub(crate) async fn submodules(&self) -> Vec<String> {
        match self
            .git_raw(&["config", "--file", ".gitmodules", "--get-regexp", "\\.path"])
            .await
        {
            Ok(output) => parse_submodule_paths(&output),
            // exit 1: no file or no matching keys
            Err(cmd) if cmd.exit_code == Some(1) && cmd.stderr.trim().is_empty() => Vec::new(),
            Err(cmd) => {
                warn!(error = %cmd, "error getting submodules");
                Vec::new()
            }
        }
    }

    async fn check_latest_commit(&self) -> Result<()> {
        match self.git(&["log", "-n", "1", "--pretty=format:%H %ci"]).await {
            Ok(latest) => {
                debug!(latest_commit = %latest.trim(), "latest repository commit");
                Ok(())
            }
            Err(err) if matches!(err, GitError::RepositoryEmpty) || err.is_platform_failure() => {
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "cannot retrieve latest commit");
                Ok(())
            }
        }
    }

    /// The remote's default branch, from `origin/HEAD` or `git remote show`.
    pub(crate) async fn default_branch(&self) -> Result<String> {
        let head = match self
            .git_raw(&["rev-parse", "--abbrev-ref", "origin/HEAD"])
            .await
        {
            Ok(output) => output.trim().to_string(),
            Err(cmd) if cmd.contains("ambiguous argument 'origin/HEAD'") => {
                warn!(error = %cmd, "error getting default branch");
                return Err(GitError::Temporary(cmd.detail().to_string()));
            }
            Err(cmd) => return Err(cmd.into()),
        };

        let head = if head.is_empty() {
            debug!("could not determine default branch using git rev-parse");
            let output = self.git(&["remote", "show", "origin"]).await?;
            parse_remote_show_head(&output).ok_or_else(|| {
                GitError::Temporary("remote does not report a HEAD branch".into())
            })?
        } else {
            head
        };
        Ok(local_name(&head).trim().to_string())
    }
}

/// Remove everything inside `dir`, creating it if needed. The directory
/// itself survives so it can stay the working directory of git.
async fn empty_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

/// Whether the installed git is at least [`GIT_MINIMUM_VERSION`].
pub async fn validate_git_version(runner: &dyn GitRunner) -> bool {
    let dir = std::env::temp_dir();
    let output = match runner.run_git(&dir, &["--version".to_string()]).await {
        Ok(output) if output.success => output.stdout,
        Ok(output) => {
            error!(stderr = %output.stderr.trim(), "error fetching git version");
            return false;
        }
        Err(err) => {
            error!(error = %err, "error fetching git version");
            return false;
        }
    };
    match parse_git_version(&output) {
        Some(version) if version >= GIT_MINIMUM_VERSION => {
            debug!(%version, "found valid git version");
            true
        }
        detected => {
            error!(
                detected_version = ?detected.map(|v| v.to_string()),
                minimum_version = %GIT_MINIMUM_VERSION,
                "git version needs upgrading"
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

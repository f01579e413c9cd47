//! Staging, committing and pushing file changes on a branch.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::config::NoVerify;
use crate::error::{CommandError, GitError, Result};
use crate::repo::resolve_within;
use crate::session::RepoSession;
use crate::types::{CommitRequest, CommitResult, CommitSha, FileChange};
use crate::usage::UsageKind;

const IGNORED_PATH_MESSAGE: &str = "The following paths are ignored by one of your .gitignore files";

impl RepoSession {
    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Write `user.name` / `user.email` into the mirror's config. Once per
    /// session.
    pub(crate) async fn write_git_author(&mut self) -> Result<()> {
        if self.state.author_written {
            return Ok(());
        }
        self.state.author_written = true;
        let author = self.identity().author;

        let result: Result<()> = async {
            if let Some(name) = &author.name {
                debug!(name = %name, "setting git author name");
                self.git(&["config", "user.name", name.as_str()]).await?;
            }
            debug!(email = %author.email, "setting git author email");
            self.git(&["config", "user.email", author.email.as_str()])
                .await?;
            Ok(())
        }
        .await;

        result.map_err(|err| {
            if err.is_platform_failure() {
                err
            } else {
                debug!(author = %author, error = %err, "error setting git author config");
                GitError::Temporary(format!("error setting git author config: {err}"))
            }
        })
    }

    /// Enable commit signing when the identity carries a key. Once per
    /// session.
    async fn configure_signing_key(&mut self) -> Result<()> {
        if self.state.signing_configured {
            return Ok(());
        }
        self.state.signing_configured = true;
        let Some(key) = self.identity().signing_key else {
            return Ok(());
        };
        debug!("setting git private key");
        self.git(&["config", "user.signingkey", key.as_str()]).await?;
        self.git(&["config", "commit.gpgsign", "true"]).await?;
        Ok(())
    }

    async fn prepare_identity(&mut self) -> Result<()> {
        self.configure_signing_key().await?;
        self.write_git_author().await
    }

    // -----------------------------------------------------------------------
    // Commit pipeline
    // -----------------------------------------------------------------------

    /// Build a commit on `request.branch_name` from the base branch plus the
    /// requested changes. Nothing is pushed.
    ///
    /// Returns `None` when there is nothing to commit, or when the result is
    /// identical to the remote branch and `force` is not set.
    pub async fn prepare_commit(&mut self, request: &CommitRequest) -> Result<Option<CommitResult>> {
        self.sync().await?;
        debug!(branch = %request.branch_name, files = request.files.len(), "preparing files for committing");
        self.prepare_identity().await?;

        match self.stage_and_commit(request).await {
            Ok(result) => Ok(result),
            Err(err) => handle_commit_error(&request.branch_name, err).map(|()| None),
        }
    }

    async fn stage_and_commit(&self, request: &CommitRequest) -> Result<Option<CommitResult>> {
        let branch = request.branch_name.as_str();
        let base = self.base_branch()?;
        let parent_commit_sha = self.base_sha()?;
        let origin_base = format!("origin/{base}");

        self.git(&["reset", "--hard"]).await?;
        self.git(&["clean", "-fd"]).await?;
        self.git_retry(&["checkout", "-B", branch, origin_base.as_str()])
            .await?;

        let mut applied: HashSet<&str> = HashSet::new();
        let mut ignored: Vec<&str> = Vec::new();
        for change in &request.files {
            let path = change.path();
            if self.apply_change(change).await? {
                applied.insert(path);
            } else {
                ignored.push(path);
            }
        }

        let mut commit = vec!["commit", "-m", request.message.as_str()];
        if self.config.skips_verify(NoVerify::Commit) {
            commit.push("--no-verify");
        }
        match self.git_raw(&commit).await {
            Ok(output) => debug!(?ignored, result = %output.trim(), "git commit"),
            Err(cmd) if is_empty_commit(&cmd) => {
                warn!(branch, ?ignored, "detected empty commit, aborting git push");
                return Ok(None);
            }
            Err(cmd) => return Err(cmd.into()),
        }

        let origin_branch = format!("origin/{branch}");
        if !request.force && !self.differs_from_head(&origin_branch).await {
            debug!(branch, "no file changes detected, skipping commit");
            return Ok(None);
        }

        let commit_sha = self.git(&["rev-parse", branch]).await?.trim().to_string();
        let files = request
            .files
            .iter()
            .filter(|change| applied.contains(change.path()))
            .cloned()
            .collect();
        Ok(Some(CommitResult {
            parent_commit_sha,
            commit_sha,
            files,
        }))
    }

    /// Apply one change to the working tree and index. `false` means the
    /// change was skipped.
    async fn apply_change(&self, change: &FileChange) -> Result<bool> {
        match change {
            FileChange::Deletion { path } => match self.git(&["rm", "--", path.as_str()]).await {
                Ok(_) => Ok(true),
                Err(err) if err.is_platform_failure() => Err(err),
                Err(err) => {
                    trace!(path = %path, error = %err, "cannot delete file");
                    Ok(false)
                }
            },
            FileChange::Addition {
                path,
                contents,
                is_executable,
                is_symlink,
            } => {
                let full_path = resolve_within(&self.config.local_dir, path)
                    .ok_or_else(|| GitError::InvalidPath(path.clone()))?;
                let is_dir = tokio::fs::metadata(&full_path)
                    .await
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    trace!(path = %path, "adding directory commit");
                } else {
                    let Some(contents) = contents else {
                        return Ok(false);
                    };
                    write_worktree_file(&full_path, contents, *is_executable, *is_symlink).await?;
                }

                let mut add = vec!["add"];
                if self.config.force_add_paths.iter().any(|p| p == path) {
                    add.push("-f");
                }
                add.extend(["--", path.as_str()]);
                match self.git_raw(&add).await {
                    Ok(_) => {}
                    Err(cmd) if cmd.contains(IGNORED_PATH_MESSAGE) => {
                        debug!(path = %path, "cannot add ignored file");
                        return Ok(false);
                    }
                    Err(cmd) => return Err(cmd.into()),
                }
                if *is_executable {
                    self.git(&["update-index", "--chmod=+x", path.as_str()])
                        .await?;
                }
                Ok(true)
            }
        }
    }

    /// Push the branch built by [`prepare_commit`](Self::prepare_commit).
    ///
    /// Returns `false` when the push was swallowed as a known race.
    pub async fn push_commit(&mut self, request: &CommitRequest) -> Result<bool> {
        self.sync().await?;
        let branch = request.branch_name.as_str();
        debug!(branch, "pushing branch");
        let refspec = format!("{branch}:{branch}");
        let mut push = vec!["push", "origin", refspec.as_str(), "--force-with-lease", "-u"];
        if self.config.skips_verify(NoVerify::Push) {
            push.push("--no-verify");
        }
        match self.git_retry(&push).await {
            Ok(output) => {
                debug!(branch, result = %output.trim(), "git push");
                self.usage.increment(UsageKind::Commits);
                Ok(true)
            }
            Err(err) => handle_commit_error(branch, err).map(|()| false),
        }
    }

    /// Fetch `branch` from the remote and record its tip as bot-authored.
    pub async fn fetch_commit(&mut self, branch: &str) -> Result<Option<CommitSha>> {
        self.sync().await?;
        debug!(branch, "fetching commit");
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let origin = format!("origin/{branch}");
        let result: Result<CommitSha> = async {
            self.git_retry(&["fetch", "origin", refspec.as_str(), "--force"])
                .await?;
            Ok(self.git(&["rev-parse", origin.as_str()]).await?.trim().to_string())
        }
        .await;

        match result {
            Ok(sha) => {
                self.record_bot_commit(branch, &sha).await;
                Ok(Some(sha))
            }
            Err(err) => handle_commit_error(branch, err).map(|()| None),
        }
    }

    /// Prepare, push and register a commit in one step.
    ///
    /// A lease rejected because the remote moved surfaces as
    /// [`GitError::RepositoryChanged`].
    pub async fn commit_files(&mut self, request: &CommitRequest) -> Result<Option<CommitSha>> {
        self.commit_and_push(request).await.map_err(|err| {
            if err.contains("(stale info)") {
                GitError::RepositoryChanged
            } else {
                err
            }
        })
    }

    async fn commit_and_push(&mut self, request: &CommitRequest) -> Result<Option<CommitSha>> {
        let Some(result) = self.prepare_commit(request).await? else {
            return Ok(None);
        };
        if !self.push_commit(request).await? {
            return Ok(None);
        }
        self.record_bot_commit(&request.branch_name, &result.commit_sha)
            .await;
        Ok(Some(result.commit_sha))
    }

    async fn record_bot_commit(&mut self, branch: &str, sha: &str) {
        self.state
            .branch_commits
            .insert(branch.to_string(), sha.to_string());
        self.state
            .branch_is_modified
            .insert(branch.to_string(), false);
        self.cache.set_modified_result(branch, sha, false).await;
    }
}

/// Swallow the remote's ref-lock race; everything else propagates.
fn handle_commit_error(branch: &str, err: GitError) -> Result<()> {
    if err.contains("remote: error: cannot lock ref") {
        warn!(branch, error = %err, "cannot lock ref, skipping commit");
        return Ok(());
    }
    Err(err)
}

fn is_empty_commit(cmd: &CommandError) -> bool {
    ["nothing to commit", "nothing added to commit", "no changes added to commit"]
        .iter()
        .any(|needle| cmd.contains(needle))
}

async fn write_worktree_file(path: &Path, contents: &[u8], executable: bool, symlink: bool) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // never write through an existing link
    if let Ok(meta) = tokio::fs::symlink_metadata(path).await {
        if symlink || meta.file_type().is_symlink() {
            tokio::fs::remove_file(path).await?;
        }
    }
    if symlink {
        let target = String::from_utf8_lossy(contents).into_owned();
        return create_symlink(&target, path).await;
    }
    tokio::fs::write(path, contents).await?;
    set_mode(path, executable).await
}

#[cfg(unix)]
async fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    tokio::fs::write(link, target).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, executable: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _executable: bool) -> io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::error::{GitError, Result};
use crate::repo::parse_remote_branches;
use crate::session::RepoSession;
use crate::types::{CommitSha, ConflictStatus};
use crate::usage::UsageKind;

/// Branch (if any) and commit checked out in the mirror.
#[derive(Debug)]
struct HeadCheckout {
    branch: Option<String>,
    sha: CommitSha,
}

impl RepoSession {
    // -----------------------------------------------------------------------
    // Registry lookups (no git)
    // -----------------------------------------------------------------------

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.state.branch_commits.contains_key(branch)
    }

    pub fn branch_list(&self) -> Vec<String> {
        self.state.branch_commits.keys().cloned().collect()
    }

    /// Last-known remote tip of `branch`.
    pub fn branch_commit(&self, branch: &str) -> Option<&str> {
        self.state.branch_commits.get(branch).map(String::as_str)
    }

    /// Parent of the branch tip, if both are known locally.
    pub async fn branch_parent_sha(&self, branch: &str) -> Option<CommitSha> {
        let sha = self.branch_commit(branch)?;
        let parent = format!("{sha}^");
        match self.git(&["rev-parse", parent.as_str()]).await {
            Ok(output) => Some(output.trim().to_string()),
            Err(err) => {
                debug!(branch, error = %err, "error getting branch parent sha");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Checkout / reset
    // -----------------------------------------------------------------------

    /// Make `branch` the session's base branch and check it out.
    pub async fn checkout_branch(&mut self, branch: &str) -> Result<CommitSha> {
        debug!(branch, "setting current branch");
        self.sync().await?;

        let origin = format!("origin/{branch}");
        let sha = self
            .git_raw(&["rev-parse", origin.as_str()])
            .await
            .map_err(|cmd| {
                if cmd.contains("fatal: ambiguous argument") {
                    warn!(branch, error = %cmd, "failed to checkout branch");
                    GitError::Temporary(cmd.detail().to_string())
                } else {
                    GitError::from(cmd)
                }
            })?
            .trim()
            .to_string();
        self.git_retry(&["checkout", "-f", branch, "--"]).await?;
        if let Ok(date) = self.git(&["log", "-n", "1", "--pretty=format:%ci"]).await {
            debug!(branch, latest_commit_date = %date.trim(), "latest commit");
        }
        self.git(&["reset", "--hard"]).await?;

        self.state.current_branch = Some(branch.to_string());
        self.state.current_branch_sha = Some(sha.clone());
        Ok(sha)
    }

    /// Hard-reset the working tree onto `origin/<branch>` and drop
    /// untracked files.
    pub(crate) async fn reset_to_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "reset to branch");
        self.git(&["reset", "--hard"]).await?;
        self.git_retry(&["checkout", branch]).await?;
        let origin = format!("origin/{branch}");
        self.git(&["reset", "--hard", origin.as_str()]).await?;
        self.git(&["clean", "-fd"]).await?;
        Ok(())
    }

    pub async fn reset_to_commit(&self, sha: &str) -> Result<()> {
        debug!(sha, "reset to commit");
        self.git(&["reset", "--hard", sha]).await?;
        Ok(())
    }

    pub(crate) async fn delete_local_branch(&self, branch: &str) -> Result<()> {
        self.git(&["branch", "-D", branch]).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State predicates
    // -----------------------------------------------------------------------

    /// Whether `branch` no longer contains the tip of the base branch.
    pub async fn is_branch_stale(&mut self, branch: &str) -> Result<bool> {
        self.sync().await?;
        let base_sha = self.base_sha()?;
        let output = self
            .git(&["branch", "--remotes", "--verbose", "--contains", base_sha.as_str()])
            .await?;
        let is_stale = !parse_remote_branches(&output).iter().any(|b| b == branch);
        debug!(
            branch,
            is_stale,
            current_branch = ?self.state.current_branch,
            current_branch_sha = %base_sha,
            "is branch stale"
        );
        Ok(is_stale)
    }

    /// Whether someone other than the bot (or an ignored author) made the
    /// last commit on `branch`.
    pub async fn is_branch_modified(&mut self, branch: &str) -> Result<bool> {
        let Some(branch_sha) = self.state.branch_commits.get(branch).cloned() else {
            debug!(branch, "branch does not exist, cannot check modification");
            return Ok(false);
        };
        if let Some(modified) = self.state.branch_is_modified.get(branch) {
            return Ok(*modified);
        }
        if let Some(modified) = self.cache.modified_result(branch, &branch_sha).await {
            self.state
                .branch_is_modified
                .insert(branch.to_string(), modified);
            return Ok(modified);
        }

        self.sync().await?;
        let origin = format!("origin/{branch}");
        let last_author = match self
            .git(&["log", "-1", "--pretty=format:%ae", origin.as_str(), "--"])
            .await
        {
            Ok(output) => Some(output.trim().to_string()),
            Err(GitError::RepositoryChanged) => {
                debug!(branch, "remote branch not found when checking last commit author");
                return Err(GitError::RepositoryChanged);
            }
            Err(err) => {
                warn!(branch, error = %err, "error checking last author for is_branch_modified");
                None
            }
        };

        let bot_email = self.identity().author.email;
        let unmodified = last_author.as_deref().is_some_and(|author| {
            author == bot_email || self.state.ignored_authors.iter().any(|a| a == author)
        });
        let modified = !unmodified;
        if modified {
            debug!(branch, ?last_author, bot_email = %bot_email, "branch has been modified");
        } else {
            debug!(branch, "branch has not been modified");
        }
        self.state
            .branch_is_modified
            .insert(branch.to_string(), modified);
        self.cache
            .set_modified_result(branch, &branch_sha, modified)
            .await;
        Ok(modified)
    }

    /// Test-merge `origin/<branch>` into `base_branch` and report the outcome.
    ///
    /// The branch and commit checked out before the call are checked out
    /// again afterwards.
    pub async fn check_branch_conflict(
        &mut self,
        base_branch: &str,
        branch: &str,
    ) -> Result<ConflictStatus> {
        debug!(base_branch, branch, "check branch conflict");
        let (Some(base_sha), Some(branch_sha)) = (
            self.branch_commit(base_branch).map(str::to_string),
            self.branch_commit(branch).map(str::to_string),
        ) else {
            warn!(base_branch, branch, "branch does not exist, assuming conflicted");
            return Ok(ConflictStatus::Conflicted);
        };

        if let Some(conflicted) = self
            .cache
            .conflict_result(base_branch, &base_sha, branch, &branch_sha)
            .await
        {
            debug!(base_branch, branch, conflicted, "using cached conflict result");
            return Ok(if conflicted {
                ConflictStatus::Conflicted
            } else {
                ConflictStatus::Clean
            });
        }

        self.sync().await?;
        self.write_git_author().await?;
        let original = self.head_checkout().await?;

        let status = self.attempt_merge(base_branch, branch).await;
        self.restore_after_merge(&original, base_branch).await;

        match &status {
            ConflictStatus::Clean | ConflictStatus::Conflicted => {
                self.cache
                    .set_conflict_result(
                        base_branch,
                        &base_sha,
                        branch,
                        &branch_sha,
                        status.is_conflicted(),
                    )
                    .await;
            }
            ConflictStatus::Error(reason) => {
                debug!(base_branch, branch, reason = %reason, "conflict check could not run");
            }
        }
        Ok(status)
    }

    /// [`check_branch_conflict`](Self::check_branch_conflict) where anything
    /// but a clean merge counts as a conflict.
    pub async fn is_branch_conflicted(&mut self, base_branch: &str, branch: &str) -> Result<bool> {
        Ok(self
            .check_branch_conflict(base_branch, branch)
            .await?
            .is_conflicted())
    }

    /// What `HEAD` points at right now.
    async fn head_checkout(&self) -> Result<HeadCheckout> {
        let sha = self.git(&["rev-parse", "HEAD"]).await?.trim().to_string();
        let name = self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string();
        let branch = (!name.is_empty() && name != "HEAD").then_some(name);
        Ok(HeadCheckout { branch, sha })
    }

    async fn attempt_merge(&self, base_branch: &str, branch: &str) -> ConflictStatus {
        if let Err(err) = self.git(&["reset", "--hard"]).await {
            return ConflictStatus::Error(err.to_string());
        }
        let origin_base = format!("origin/{base_branch}");
        if let Err(err) = self
            .git(&["checkout", "-f", "-B", base_branch, origin_base.as_str()])
            .await
        {
            return ConflictStatus::Error(err.to_string());
        }
        let origin = format!("origin/{branch}");
        match self
            .git_raw(&["merge", "--no-commit", "--no-ff", origin.as_str()])
            .await
        {
            Ok(_) => ConflictStatus::Clean,
            Err(cmd) if cmd.contains("CONFLICT") || cmd.contains("Automatic merge failed") => {
                ConflictStatus::Conflicted
            }
            Err(cmd) => {
                debug!(base_branch, branch, error = %cmd, "merge failed for an unknown reason");
                ConflictStatus::Error(cmd.detail().to_string())
            }
        }
    }

    async fn restore_after_merge(&self, original: &HeadCheckout, base_branch: &str) {
        if let Err(err) = self.git(&["merge", "--abort"]).await {
            trace!(base_branch, error = %err, "merge abort failed");
        }
        let sha = original.sha.as_str();
        let restored = match &original.branch {
            Some(name) => self.git(&["checkout", "-f", "-B", name.as_str(), sha]).await,
            None => self.git(&["checkout", "-f", "--detach", sha]).await,
        };
        if let Err(err) = restored {
            debug!(base_branch, original = ?original.branch, sha, error = %err, "conflict check cleanup error");
        }
    }

    // -----------------------------------------------------------------------
    // Remote mutations
    // -----------------------------------------------------------------------

    /// Delete `branch` on the remote and locally, then forget it.
    pub async fn delete_branch(&mut self, branch: &str) -> Result<()> {
        self.sync().await?;
        match self.git_retry(&["push", "--delete", "origin", branch]).await {
            Ok(_) => debug!(branch, "deleted remote branch"),
            Err(err) if err.is_platform_failure() => return Err(err),
            Err(err) => debug!(branch, error = %err, "no remote branch to delete"),
        }
        match self.delete_local_branch(branch).await {
            Ok(()) => debug!(branch, "deleted local branch"),
            Err(err) if err.is_platform_failure() => return Err(err),
            Err(_) => debug!(branch, "no local branch to delete"),
        }
        self.state.branch_commits.remove(branch);
        self.state.branch_is_modified.remove(branch);
        Ok(())
    }

    /// Fast-forward the base branch to `branch` and push it.
    pub async fn merge_branch(&mut self, branch: &str) -> Result<()> {
        let mut status = None;
        let result = self.fast_forward_base(branch, &mut status).await;
        if let Err(err) = &result {
            debug!(
                base_branch = ?self.state.current_branch,
                base_sha = ?self.state.current_branch_sha,
                branch,
                branch_sha = ?self.branch_commit(branch),
                status = ?status,
                error = %err,
                "merge branch error"
            );
        }
        result
    }

    async fn fast_forward_base(&mut self, branch: &str, status: &mut Option<String>) -> Result<()> {
        self.sync().await?;
        let base = self.base_branch()?;
        let origin_branch = format!("origin/{branch}");
        let origin_base = format!("origin/{base}");

        self.git(&["reset", "--hard"]).await?;
        self.git_retry(&["checkout", "-B", branch, origin_branch.as_str()])
            .await?;
        self.git_retry(&["checkout", "-B", base.as_str(), origin_base.as_str()])
            .await?;
        *status = Some(self.git(&["status", "--porcelain", "-b"]).await?);
        self.git_retry(&["merge", "--ff-only", branch]).await?;
        self.git_retry(&["push", "origin", base.as_str()]).await?;
        self.usage.increment(UsageKind::Commits);

        let sha = self.git(&["rev-parse", "HEAD"]).await?.trim().to_string();
        debug!(base = %base, sha = %sha, "base branch fast-forwarded");
        self.state.branch_commits.insert(base.clone(), sha.clone());
        self.state.branch_is_modified.remove(&base);
        self.state.current_branch_sha = Some(sha);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads against origin
    // -----------------------------------------------------------------------

    /// Author time of the tip of `origin/<branch>`; now when unavailable.
    pub async fn branch_last_commit_time(&mut self, branch: &str) -> Result<DateTime<Utc>> {
        self.sync().await?;
        let origin = format!("origin/{branch}");
        match self.git(&["show", "-s", "--format=%ai", origin.as_str()]).await {
            Ok(output) => Ok(DateTime::parse_from_str(output.trim(), "%Y-%m-%d %H:%M:%S %z")
                .map(|time| time.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())),
            Err(err) if err.is_platform_failure() => Err(err),
            Err(_) => Ok(Utc::now()),
        }
    }

    /// Files touched by the tip commit of `origin/<branch>`.
    pub async fn branch_files(&mut self, branch: &str) -> Result<Option<Vec<String>>> {
        self.sync().await?;
        let tip = format!("origin/{branch}");
        let parent = format!("origin/{branch}^");
        match self
            .git_retry(&["diff", "--name-only", parent.as_str(), tip.as_str()])
            .await
        {
            Ok(output) => Ok(Some(
                output
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(err) if err.is_platform_failure() => Err(err),
            Err(err) => {
                warn!(branch, error = %err, "error listing branch files");
                Ok(None)
            }
        }
    }

    /// Contents of `path` at `origin/<branch>` (the base branch by default).
    pub async fn file_at_branch(&mut self, path: &str, branch: Option<&str>) -> Result<Option<String>> {
        self.sync().await?;
        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => self.base_branch()?,
        };
        let object = format!("origin/{branch}:{path}");
        match self.git(&["show", object.as_str()]).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.is_platform_failure() => Err(err),
            Err(_) => Ok(None),
        }
    }

    /// Whether the working tree's `HEAD` differs from `reference`.
    pub async fn has_diff(&mut self, reference: &str) -> Result<bool> {
        self.sync().await?;
        Ok(self.differs_from_head(reference).await)
    }

    /// Errors count as a difference.
    pub(crate) async fn differs_from_head(&self, reference: &str) -> bool {
        match self.git_retry(&["diff", "HEAD", reference]).await {
            Ok(output) => !output.is_empty(),
            Err(err) => {
                trace!(reference, error = %err, "diff failed, assuming changes");
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::GitOutput;
    use crate::testing::{
        head_at, memory_store, synced_session, synced_session_with_store, MockGitRunner,
        FEATURE_SHA, MAIN_SHA,
    };
    use crate::usage::AtomicUsage;
    use std::sync::Arc;

    #[tokio::test]
    async fn absent_branches_need_no_git() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        let mut session = synced_session(dir.path(), &git).await;

        assert!(!session.branch_exists("renovate/missing"));
        assert!(!session.is_branch_modified("renovate/missing").await.unwrap());
        assert!(session.branch_commit("renovate/missing").is_none());
        assert!(git.commands().is_empty());
    }

    #[tokio::test]
    async fn registry_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        let session = synced_session(dir.path(), &git).await;

        assert!(session.branch_exists("main"));
        assert_eq!(session.branch_list(), vec!["feature", "main"]);
        assert_eq!(session.branch_commit("feature"), Some(FEATURE_SHA));
    }

    #[tokio::test]
    async fn parent_sha_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["rev-parse"], GitOutput::ok("abc123\n"));
        let session = synced_session(dir.path(), &git).await;

        assert_eq!(session.branch_parent_sha("feature").await.as_deref(), Some("abc123"));
        assert_eq!(git.command_lines(), vec![format!("rev-parse {FEATURE_SHA}^")]);
        assert_eq!(session.branch_parent_sha("missing").await, None);
    }

    #[tokio::test]
    async fn parent_sha_failure_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["rev-parse"], GitOutput::failed("fatal: bad revision"));
        let session = synced_session(dir.path(), &git).await;
        assert_eq!(session.branch_parent_sha("feature").await, None);
    }

    #[tokio::test]
    async fn checkout_updates_pointers_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["rev-parse", "origin/feature"], GitOutput::ok(format!("{FEATURE_SHA}\n")));
        let mut session = synced_session(dir.path(), &git).await;

        let sha = session.checkout_branch("feature").await.unwrap();
        assert_eq!(sha, FEATURE_SHA);
        assert_eq!(session.current_branch(), Some("feature"));
        assert_eq!(session.current_branch_sha(), Some(FEATURE_SHA));
        assert!(git
            .command_lines()
            .contains(&"checkout -f feature --".to_string()));
    }

    #[tokio::test]
    async fn checkout_of_unknown_revision_is_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(
            &["rev-parse", "origin/gone"],
            GitOutput::failed("fatal: ambiguous argument 'origin/gone': unknown revision"),
        );
        let mut session = synced_session(dir.path(), &git).await;

        let err = session.checkout_branch("gone").await.unwrap_err();
        assert!(matches!(err, GitError::Temporary(_)));
        assert_eq!(session.current_branch(), Some("main"));
        assert_eq!(session.current_branch_sha(), Some(MAIN_SHA));
    }

    #[tokio::test]
    async fn reset_to_commit_runs_hard_reset() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        let session = synced_session(dir.path(), &git).await;
        session.reset_to_commit(FEATURE_SHA).await.unwrap();
        assert_eq!(git.command_lines(), vec![format!("reset --hard {FEATURE_SHA}")]);
    }

    #[tokio::test]
    async fn staleness_checks_containing_remote_branches() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(
            &["branch", "--remotes"],
            GitOutput::ok("  origin/HEAD -> origin/main\n  origin/main 1111111 init\n  origin/renovate/x 3333333 update\n"),
        );
        let mut session = synced_session(dir.path(), &git).await;

        assert!(session.is_branch_stale("feature").await.unwrap());
        assert!(!session.is_branch_stale("renovate/x").await.unwrap());
        assert_eq!(
            git.command_lines()[0],
            format!("branch --remotes --verbose --contains {MAIN_SHA}")
        );
    }

    #[tokio::test]
    async fn bot_authored_branch_is_unmodified_and_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["log", "-1"], GitOutput::ok("bot@branchkeeper.invalid"));
        let store = memory_store();
        let mut session = synced_session_with_store(dir.path(), &git, store.clone()).await;

        assert!(!session.is_branch_modified("feature").await.unwrap());
        assert_eq!(git.count(&["log", "-1"]), 1);

        // in-memory memo
        assert!(!session.is_branch_modified("feature").await.unwrap());
        assert_eq!(git.count(&["log", "-1"]), 1);

        // persistent cache, new session
        let other_git = MockGitRunner::new();
        let dir2 = tempfile::tempdir().unwrap();
        let mut second = synced_session_with_store(dir2.path(), &other_git, store).await;
        assert!(!second.is_branch_modified("feature").await.unwrap());
        assert!(other_git.commands().is_empty());
    }

    #[tokio::test]
    async fn human_commit_marks_branch_modified() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["log", "-1"], GitOutput::ok("human@example.com\n"));
        let mut session = synced_session(dir.path(), &git).await;
        assert!(session.is_branch_modified("feature").await.unwrap());
    }

    #[tokio::test]
    async fn ignored_authors_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["log", "-1"], GitOutput::ok("ci@example.com"));
        let mut session = synced_session(dir.path(), &git).await;
        session
            .set_user_repo_config(vec!["ci@example.com".into()], None)
            .unwrap();
        assert!(!session.is_branch_modified("feature").await.unwrap());
    }

    #[tokio::test]
    async fn vanished_remote_branch_aborts_modification_check() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["log", "-1"], GitOutput::failed("fatal: bad revision 'origin/feature'"));
        let mut session = synced_session(dir.path(), &git).await;
        let err = session.is_branch_modified("feature").await.unwrap_err();
        assert!(matches!(err, GitError::RepositoryChanged));
    }

    const BOT_SHA: &str = "3333333333333333333333333333333333333333";

    fn conflicting_merge() -> GitOutput {
        GitOutput {
            success: false,
            exit_code: Some(1),
            stdout: "CONFLICT (content): Merge conflict in a.txt\nAutomatic merge failed; fix conflicts and then commit the result.\n".into(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn clean_merge_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        head_at(&git, "main", MAIN_SHA);
        let mut session = synced_session(dir.path(), &git).await;

        let status = session.check_branch_conflict("main", "feature").await.unwrap();
        assert_eq!(status, ConflictStatus::Clean);
        assert!(!session.is_branch_conflicted("main", "feature").await.unwrap());
        assert_eq!(git.count(&["merge", "--no-commit"]), 1);

        let lines = git.command_lines();
        let checkout = lines
            .iter()
            .position(|l| l == "checkout -f -B main origin/main")
            .unwrap();
        let merge = lines
            .iter()
            .position(|l| l == "merge --no-commit --no-ff origin/feature")
            .unwrap();
        assert!(checkout < merge);
        assert!(lines.contains(&"merge --abort".to_string()));
        assert_eq!(lines.last(), Some(&format!("checkout -f -B main {MAIN_SHA}")));
    }

    #[tokio::test]
    async fn conflicts_are_detected_once_per_sha_pair() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        head_at(&git, "main", MAIN_SHA);
        git.on(&["merge", "--no-commit"], conflicting_merge());
        let mut session = synced_session(dir.path(), &git).await;

        assert!(session.is_branch_conflicted("main", "feature").await.unwrap());
        assert!(session.is_branch_conflicted("main", "feature").await.unwrap());
        assert_eq!(git.count(&["merge", "--no-commit"]), 1);

        // a moved branch is a new cache key
        session
            .state
            .branch_commits
            .insert("feature".into(), BOT_SHA.into());
        assert!(session.is_branch_conflicted("main", "feature").await.unwrap());
        assert_eq!(git.count(&["merge", "--no-commit"]), 2);

        // so is a moved base
        session
            .state
            .branch_commits
            .insert("main".into(), "4444444444444444444444444444444444444444".into());
        assert!(session.is_branch_conflicted("main", "feature").await.unwrap());
        assert_eq!(git.count(&["merge", "--no-commit"]), 3);
    }

    #[tokio::test]
    async fn check_merges_into_base_not_current_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        // a previous commit left the bot branch checked out
        head_at(&git, "renovate/x", BOT_SHA);
        let mut session = synced_session(dir.path(), &git).await;
        assert_eq!(session.current_branch(), Some("main"));

        session.check_branch_conflict("main", "feature").await.unwrap();
        let lines = git.command_lines();
        let checkout = lines
            .iter()
            .position(|l| l == "checkout -f -B main origin/main")
            .unwrap();
        let merge = lines.iter().position(|l| l.starts_with("merge --no-commit")).unwrap();
        assert!(checkout < merge);
        assert_eq!(lines.last(), Some(&format!("checkout -f -B renovate/x {BOT_SHA}")));
    }

    #[tokio::test]
    async fn original_branch_is_restored_after_check() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        head_at(&git, "main", MAIN_SHA);
        let mut session = synced_session(dir.path(), &git).await;

        session.check_branch_conflict("feature", "main").await.unwrap();
        let lines = git.command_lines();
        assert!(lines.contains(&"checkout -f -B feature origin/feature".to_string()));
        assert!(lines.contains(&"merge --no-commit --no-ff origin/main".to_string()));
        assert_eq!(lines.last(), Some(&format!("checkout -f -B main {MAIN_SHA}")));
    }

    #[tokio::test]
    async fn detached_head_is_restored_detached() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        head_at(&git, "HEAD", FEATURE_SHA);
        git.on(&["merge", "--no-commit"], conflicting_merge());
        let mut session = synced_session(dir.path(), &git).await;

        let status = session.check_branch_conflict("main", "feature").await.unwrap();
        assert_eq!(status, ConflictStatus::Conflicted);
        assert_eq!(
            git.command_lines().last(),
            Some(&format!("checkout -f --detach {FEATURE_SHA}"))
        );
    }

    #[tokio::test]
    async fn missing_branch_is_conflicted_without_merge() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        let mut session = synced_session(dir.path(), &git).await;

        let status = session.check_branch_conflict("main", "missing").await.unwrap();
        assert_eq!(status, ConflictStatus::Conflicted);
        assert!(git.commands().is_empty());
    }

    #[tokio::test]
    async fn merge_errors_are_reported_but_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        head_at(&git, "main", MAIN_SHA);
        git.on(
            &["merge", "--no-commit"],
            GitOutput::failed("fatal: refusing to merge unrelated histories"),
        );
        let mut session = synced_session(dir.path(), &git).await;

        let status = session.check_branch_conflict("main", "feature").await.unwrap();
        assert!(matches!(status, ConflictStatus::Error(ref r) if r.contains("unrelated histories")));
        assert!(session.is_branch_conflicted("main", "feature").await.unwrap());
        assert_eq!(git.count(&["merge", "--no-commit"]), 2);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_remote_branch() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(
            &["push", "--delete"],
            GitOutput::failed("error: unable to delete 'feature': remote ref does not exist"),
        );
        git.on(&["branch", "-D"], GitOutput::failed("error: branch 'feature' not found."));
        let mut session = synced_session(dir.path(), &git).await;

        session.delete_branch("feature").await.unwrap();
        assert!(!session.branch_exists("feature"));
    }

    #[tokio::test]
    async fn delete_propagates_host_failures() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["push", "--delete"], GitOutput::failed("fatal: Could not resolve host: example.com"));
        let mut session = synced_session(dir.path(), &git).await;

        let err = session.delete_branch("feature").await.unwrap_err();
        assert!(err.is_transient());
        // first try plus two retries from the test config
        assert_eq!(git.count(&["push", "--delete"]), 3);
        assert!(session.branch_exists("feature"));
    }

    #[tokio::test]
    async fn fast_forward_merge_pushes_base_and_counts_usage() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        let usage = Arc::new(AtomicUsage::new());
        git.on(&["rev-parse", "HEAD"], GitOutput::ok(format!("{FEATURE_SHA}\n")));
        let mut session = synced_session(dir.path(), &git)
            .await
            .with_usage(usage.clone());

        session.merge_branch("feature").await.unwrap();
        assert_eq!(
            git.command_lines(),
            vec![
                "reset --hard",
                "checkout -B feature origin/feature",
                "checkout -B main origin/main",
                "status --porcelain -b",
                "merge --ff-only feature",
                "push origin main",
                "rev-parse HEAD",
            ]
        );
        assert_eq!(usage.get(UsageKind::Commits), 1);
        // staleness is now measured against the new base tip
        assert_eq!(session.current_branch_sha(), Some(FEATURE_SHA));
        assert_eq!(session.branch_commit("main"), Some(FEATURE_SHA));
    }

    #[tokio::test]
    async fn failed_fast_forward_is_reraised() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(
            &["merge", "--ff-only"],
            GitOutput::failed("fatal: Not possible to fast-forward, aborting."),
        );
        let usage = Arc::new(AtomicUsage::new());
        let mut session = synced_session(dir.path(), &git)
            .await
            .with_usage(usage.clone());

        assert!(session.merge_branch("feature").await.is_err());
        assert_eq!(git.count(&["push"]), 0);
        assert_eq!(usage.get(UsageKind::Commits), 0);
    }

    #[tokio::test]
    async fn last_commit_time_parses_or_defaults_to_now() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.once(&["show", "-s"], GitOutput::ok("2023-05-01 12:30:00 +0200\n"));
        git.once(&["show", "-s"], GitOutput::failed("fatal: bad revision"));
        let mut session = synced_session(dir.path(), &git).await;

        let time = session.branch_last_commit_time("feature").await.unwrap();
        assert_eq!(time.to_rfc3339(), "2023-05-01T10:30:00+00:00");

        let before = Utc::now();
        let time = session.branch_last_commit_time("feature").await.unwrap();
        assert!(time >= before);
    }

    #[tokio::test]
    async fn branch_files_and_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.on(&["diff", "--name-only"], GitOutput::ok("package.json\nyarn.lock\n"));
        git.on(&["show", "origin/main:package.json"], GitOutput::ok("{\"a\":1}\n"));
        git.on(&["show"], GitOutput::failed("fatal: path 'nope' does not exist"));
        let mut session = synced_session(dir.path(), &git).await;

        assert_eq!(
            session.branch_files("feature").await.unwrap(),
            Some(vec!["package.json".to_string(), "yarn.lock".to_string()])
        );
        assert_eq!(
            session.file_at_branch("package.json", None).await.unwrap().as_deref(),
            Some("{\"a\":1}\n")
        );
        assert_eq!(session.file_at_branch("nope", Some("feature")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn diff_errors_count_as_changes() {
        let dir = tempfile::tempdir().unwrap();
        let git = MockGitRunner::new();
        git.once(&["diff", "HEAD"], GitOutput::ok(""));
        git.once(&["diff", "HEAD"], GitOutput::ok("diff --git a/x b/x\n"));
        git.once(&["diff", "HEAD"], GitOutput::failed("fatal: bad revision 'origin/new'"));
        let mut session = synced_session(dir.path(), &git).await;

        assert!(!session.has_diff("origin/feature").await.unwrap());
        assert!(session.has_diff("origin/feature").await.unwrap());
        assert!(session.has_diff("origin/new").await.unwrap());
    }
}

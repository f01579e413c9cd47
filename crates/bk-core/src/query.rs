//! Read-only views of the mirror.

use tracing::debug;

use crate::error::{GitError, Result};
use crate::repo::{
    parse_porcelain_status, parse_tracked_files, parse_tree_items, parse_tree_sha, resolve_within,
    StatusResult,
};
use crate::session::RepoSession;
use crate::types::TreeItem;

impl RepoSession {
    /// Working tree status, optionally limited to `path`.
    pub async fn repo_status(&mut self, path: Option<&str>) -> Result<StatusResult> {
        if let Some(path) = path {
            if resolve_within(&self.config.local_dir, path).is_none() {
                return Err(GitError::InvalidPath(path.to_string()));
            }
        }
        self.sync().await?;
        let mut args = vec!["status", "--porcelain", "-b"];
        if let Some(path) = path {
            args.extend(["--", path]);
        }
        Ok(parse_porcelain_status(&self.git(&args).await?))
    }

    /// Regular files tracked on the base branch, excluding submodule
    /// contents.
    pub async fn file_list(&mut self) -> Result<Vec<String>> {
        self.sync().await?;
        let base = self.base_branch()?;
        let submodules = self.submodules().await;
        let output = self.git(&["ls-tree", "-r", base.as_str()]).await?;
        let files = parse_tracked_files(&output, &submodules);
        debug!(count = files.len(), "listed tracked files");
        Ok(files)
    }

    /// Subjects of the last ten commits on `HEAD`.
    pub async fn commit_messages(&mut self) -> Result<Vec<String>> {
        self.sync().await?;
        let output = self.git(&["log", "-n", "10", "--pretty=format:%s"]).await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    /// Top-level entries of the tree behind `commit_sha`.
    pub async fn list_commit_tree(&self, commit_sha: &str) -> Result<Vec<TreeItem>> {
        let commit = self.git(&["cat-file", "-p", commit_sha]).await?;
        let tree_sha = parse_tree_sha(&commit)
            .ok_or_else(|| GitError::Temporary(format!("no tree found in commit {commit_sha}")))?
            .to_string();
        let tree = self.git(&["cat-file", "-p", tree_sha.as_str()]).await?;
        Ok(parse_tree_items(&tree))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

/// A full 40-hex commit id.
pub type CommitSha = String;

// ---------------------------------------------------------------------------
// File changes
// ---------------------------------------------------------------------------

/// One entry of a commit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileChange {
    /// Create or overwrite `path`.
    ///
    /// `contents: None` stages whatever is already on disk, which only makes
    /// sense for directories (submodule bumps); other such entries are skipped.
    Addition {
        path: String,
        contents: Option<Vec<u8>>,
        #[serde(default)]
        is_executable: bool,
        /// `contents` is the link target.
        #[serde(default)]
        is_symlink: bool,
    },
    Deletion { path: String },
}

impl FileChange {
    /// A regular, non-executable file.
    pub fn addition(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        FileChange::Addition {
            path: path.into(),
            contents: Some(contents.into()),
            is_executable: false,
            is_symlink: false,
        }
    }

    pub fn deletion(path: impl Into<String>) -> Self {
        FileChange::Deletion { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            FileChange::Addition { path, .. } | FileChange::Deletion { path } => path,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, FileChange::Deletion { .. })
    }
}

// ---------------------------------------------------------------------------
// Commit request / result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub branch_name: String,
    pub files: Vec<FileChange>,
    pub message: String,
    /// Commit even when the result matches the remote branch.
    #[serde(default)]
    pub force: bool,
}

impl CommitRequest {
    pub fn new(
        branch_name: impl Into<String>,
        files: Vec<FileChange>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            branch_name: branch_name.into(),
            files,
            message: message.into(),
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub parent_commit_sha: CommitSha,
    pub commit_sha: CommitSha,
    /// The requested changes that made it into the commit.
    pub files: Vec<FileChange>,
}

// ---------------------------------------------------------------------------
// Branch state
// ---------------------------------------------------------------------------

/// Outcome of test-merging a branch into its base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ConflictStatus {
    Clean,
    Conflicted,
    /// The merge could not be attempted; the reason is git's message.
    Error(String),
}

impl ConflictStatus {
    /// Anything but a clean merge counts as conflicted.
    pub fn is_conflicted(&self) -> bool {
        !matches!(self, ConflictStatus::Clean)
    }
}

// ---------------------------------------------------------------------------
// Tree inspection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeItemKind {
    Blob,
    Tree,
    Commit,
}

/// A top-level entry of a commit's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub path: String,
    pub mode: String,
    pub kind: TreeItemKind,
    pub sha: CommitSha,
}

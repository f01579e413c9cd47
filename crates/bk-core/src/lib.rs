pub mod author;
pub mod branch;
pub mod branch_cache;
pub mod cache;
pub mod commit;
pub mod config;
pub mod error;
pub mod query;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod session;
pub mod side_refs;
pub mod sync;
pub mod types;
pub mod usage;

#[cfg(test)]
mod testing;

pub use config::GitConfig;
pub use error::{GitError, Result};
pub use session::RepoSession;
pub use types::{CommitRequest, CommitResult, ConflictStatus, FileChange};

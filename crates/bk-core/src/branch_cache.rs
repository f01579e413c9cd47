//! Content-addressed memo of expensive branch-state checks.
//!
//! Keys embed the commit SHAs involved, so a moved branch simply produces a
//! new key. Entries are never invalidated, only evicted by the store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::cache::CacheStore;

const CONFLICT_NAMESPACE: &str = "git-conflicts";
const MODIFIED_NAMESPACE: &str = "git-modified";

#[derive(Clone)]
pub struct BranchStateCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl BranchStateCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn conflict_key(base_branch: &str, base_sha: &str, branch: &str, branch_sha: &str) -> String {
        format!("{base_branch}@{base_sha}..{branch}@{branch_sha}")
    }

    pub fn modified_key(branch: &str, branch_sha: &str) -> String {
        format!("{branch}@{branch_sha}")
    }

    pub async fn conflict_result(
        &self,
        base_branch: &str,
        base_sha: &str,
        branch: &str,
        branch_sha: &str,
    ) -> Option<bool> {
        let key = Self::conflict_key(base_branch, base_sha, branch, branch_sha);
        self.get_bool(CONFLICT_NAMESPACE, &key).await
    }

    pub async fn set_conflict_result(
        &self,
        base_branch: &str,
        base_sha: &str,
        branch: &str,
        branch_sha: &str,
        conflicted: bool,
    ) {
        let key = Self::conflict_key(base_branch, base_sha, branch, branch_sha);
        self.set_bool(CONFLICT_NAMESPACE, &key, conflicted).await;
    }

    pub async fn modified_result(&self, branch: &str, branch_sha: &str) -> Option<bool> {
        self.get_bool(MODIFIED_NAMESPACE, &Self::modified_key(branch, branch_sha))
            .await
    }

    pub async fn set_modified_result(&self, branch: &str, branch_sha: &str, modified: bool) {
        self.set_bool(MODIFIED_NAMESPACE, &Self::modified_key(branch, branch_sha), modified)
            .await;
    }

    async fn get_bool(&self, namespace: &str, key: &str) -> Option<bool> {
        match self.store.get(namespace, key).await {
            Ok(value) => value.and_then(|v| v.as_bool()),
            Err(err) => {
                warn!(namespace, key, error = %err, "branch state cache read failed");
                None
            }
        }
    }

    async fn set_bool(&self, namespace: &str, key: &str, value: bool) {
        if let Err(err) = self
            .store
            .set(namespace, key, Value::Bool(value), self.ttl)
            .await
        {
            warn!(namespace, key, error = %err, "branch state cache write failed");
        }
    }
}

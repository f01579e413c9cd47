use std::sync::Arc;
use std::time::Duration;

use bk_core::branch_cache::BranchStateCache;
use bk_core::cache::{open_store, CacheStore, SqliteCacheStore};
use bk_core::config::CacheConfig;

#[tokio::test]
async fn sqlite_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache").join("branch-state.db");

    {
        let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(&path).await.unwrap());
        let cache = BranchStateCache::new(store, Duration::from_secs(60));
        cache.set_conflict_result("main", "aaa", "renovate/x", "bbb", true).await;
        cache.set_modified_result("renovate/x", "bbb", false).await;
    }

    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(&path).await.unwrap());
    let cache = BranchStateCache::new(store, Duration::from_secs(60));
    assert_eq!(cache.conflict_result("main", "aaa", "renovate/x", "bbb").await, Some(true));
    assert_eq!(cache.modified_result("renovate/x", "bbb").await, Some(false));
}

#[tokio::test]
async fn moved_branch_misses() {
    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new_in_memory().await.unwrap());
    let cache = BranchStateCache::new(store, Duration::from_secs(60));
    cache.set_conflict_result("main", "aaa", "renovate/x", "bbb", false).await;

    assert_eq!(cache.conflict_result("main", "aaa", "renovate/x", "bbb").await, Some(false));
    assert_eq!(cache.conflict_result("main", "aaa", "renovate/x", "ccc").await, None);
    assert_eq!(cache.conflict_result("main", "ddd", "renovate/x", "bbb").await, None);
}

#[tokio::test]
async fn expired_entries_are_purged() {
    let store = SqliteCacheStore::new_in_memory().await.unwrap();
    store
        .set("ns", "gone", serde_json::json!(true), Duration::ZERO)
        .await
        .unwrap();
    store
        .set("ns", "kept", serde_json::json!(1), Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(store.get("ns", "gone").await.unwrap(), None);
    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert_eq!(store.get("ns", "kept").await.unwrap(), Some(serde_json::json!(1)));
}

#[tokio::test]
async fn open_store_picks_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        path: Some(dir.path().join("state.db")),
        ..CacheConfig::default()
    };
    let store = open_store(&config).await.unwrap();
    store
        .set("ns", "k", serde_json::json!("v"), Duration::from_secs(60))
        .await
        .unwrap();
    assert!(dir.path().join("state.db").exists());

    let memory = open_store(&CacheConfig::default()).await.unwrap();
    assert_eq!(memory.get("ns", "k").await.unwrap(), None);
}

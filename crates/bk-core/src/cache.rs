use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use serde_json::Value;
use tokio_rusqlite::Connection;

use crate::config::CacheConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cache lock poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// CacheStore trait
// ---------------------------------------------------------------------------

/// Key/value store with per-entry TTL used to memoize branch state.
///
/// Implementations may evict at any time; a store that always misses is a
/// valid (slow) store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// Open the store described by `config`: SQLite when a path is set,
/// otherwise in-memory.
pub async fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match &config.path {
        Some(path) => Ok(Arc::new(SqliteCacheStore::new(path).await?)),
        None => Ok(Arc::new(MemoryCacheStore::new(config.capacity))),
    }
}

// ---------------------------------------------------------------------------
// NullCacheStore
// ---------------------------------------------------------------------------

/// Never remembers anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacheStore;

#[async_trait]
impl CacheStore for NullCacheStore {
    async fn get(&self, _namespace: &str, _key: &str) -> Result<Option<Value>, CacheError> {
        Ok(None)
    }

    async fn set(
        &self,
        _namespace: &str,
        _key: &str,
        _value: Value,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

/// Bounded in-process LRU with expiry.
pub struct MemoryCacheStore {
    entries: Mutex<LruCache<(String, String), (Value, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let lookup = (namespace.to_string(), key.to_string());
        let hit = entries
            .get(&lookup)
            .map(|(value, expires_at)| (value.clone(), *expires_at));
        match hit {
            Some((value, expires_at)) if expires_at > Instant::now() => Ok(Some(value)),
            Some(_) => {
                entries.pop(&lookup);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.put(
            (namespace.to_string(), key.to_string()),
            (value, Instant::now() + ttl),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqliteCacheStore
// ---------------------------------------------------------------------------

/// Async SQLite-backed store that survives process restarts.
pub struct SqliteCacheStore {
    conn: Connection,
}

impl SqliteCacheStore {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            // a missing parent surfaces as an open error below
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), CacheError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS cache_entries (
                        namespace   TEXT NOT NULL,
                        key         TEXT NOT NULL,
                        value       TEXT NOT NULL,
                        expires_at  INTEGER NOT NULL,
                        PRIMARY KEY (namespace, key)
                    );

                    CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Drop every expired row. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now().timestamp();
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM cache_entries WHERE expires_at <= ?1",
                    rusqlite::params![now],
                )?;
                Ok(n)
            })
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let now = Utc::now().timestamp();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT value FROM cache_entries
                     WHERE namespace = ?1 AND key = ?2 AND expires_at > ?3",
                )?;
                let mut rows = stmt.query(rusqlite::params![namespace, key, now])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row.get::<_, String>(0)?)),
                    None => Ok(None),
                }
            })
            .await?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let expires_at = Utc::now().timestamp().saturating_add(ttl_secs);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO cache_entries (namespace, key, value, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(namespace, key) DO UPDATE SET
                        value=excluded.value, expires_at=excluded.expires_at",
                    rusqlite::params![namespace, key, text, expires_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

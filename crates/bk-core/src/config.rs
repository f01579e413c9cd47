use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::author::GitAuthor;

/// Top-level configuration loaded from `~/.branchkeeper/config.toml`.
///
/// Describes how the local mirror is laid out and how commits are made.
/// Credentials never live here; they are part of the remote URL or the git
/// credential helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Directory holding the local mirror.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    /// Clone every blob up front instead of a blobless partial clone.
    #[serde(default)]
    pub full_clone: bool,
    #[serde(default)]
    pub clone_submodules: bool,
    /// Which hooks to skip with `--no-verify`.
    #[serde(default)]
    pub no_verify: Vec<NoVerify>,
    /// Bot identity in `Name <email>` form.
    #[serde(default)]
    pub git_author: Option<String>,
    /// Authors whose commits do not count as a human modification.
    #[serde(default)]
    pub ignored_authors: Vec<String>,
    /// Paths staged with `git add -f` so `.gitignore` cannot drop them.
    #[serde(default)]
    pub force_add_paths: Vec<String>,
    /// Namespace for side-channel refs.
    #[serde(default = "default_side_ref_prefix")]
    pub side_ref_prefix: String,
    /// GPG key id used to sign commits.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Extra options: appended to `git clone`, prepended to `git ls-remote`.
    #[serde(default)]
    pub extra_clone_opts: BTreeMap<String, String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            full_clone: false,
            clone_submodules: false,
            extra_clone_opts: BTreeMap::new(),
            no_verify: Vec::new(),
            git_author: None,
            ignored_authors: Vec::new(),
            force_add_paths: Vec::new(),
            side_ref_prefix: default_side_ref_prefix(),
            signing_key: None,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl GitConfig {
    /// Load config from `~/.branchkeeper/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = GitConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: GitConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("local_dir must not be empty".into()));
        }
        if !self.side_ref_prefix.starts_with("refs/") || self.side_ref_prefix.starts_with("refs/heads") {
            return Err(ConfigError::Validation(format!(
                "side_ref_prefix must live under refs/ outside refs/heads: {}",
                self.side_ref_prefix
            )));
        }
        if let Some(author) = &self.git_author {
            GitAuthor::parse(author).ok_or_else(|| {
                ConfigError::Validation(format!("git_author is not a valid author: {author}"))
            })?;
        }
        self.retry.validate()?;
        self.cache.validate()?;
        Ok(())
    }

    pub fn skips_verify(&self, hook: NoVerify) -> bool {
        self.no_verify.contains(&hook)
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".branchkeeper")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoVerify {
    Commit,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 10 {
            return Err(ConfigError::Validation(format!(
                "retry.max_retries must be at most 10, got {}",
                self.max_retries
            )));
        }
        if self.backoff_factor == 0 {
            return Err(ConfigError::Validation(
                "retry.backoff_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file for the persistent branch-state cache; in-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Entry budget of the in-memory store.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Validation("cache.capacity must be positive".into()));
        }
        Ok(())
    }
}

fn default_local_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("branchkeeper")
        .join("repo")
}
fn default_side_ref_prefix() -> String {
    "refs/branchkeeper".into()
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    3_000
}
fn default_backoff_factor() -> u32 {
    2
}
fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_cache_capacity() -> usize {
    10_000
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

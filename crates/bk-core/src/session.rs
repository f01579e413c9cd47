//! The per-repository session: configuration, collaborators, and the
//! in-memory branch registry every operation reads and updates.
//!
//! Operations live in `sync`, `branch`, `commit`, `side_refs` and `query`
//! as further `impl RepoSession` blocks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::author::{CommitIdentity, GitAuthor, IdentityProvider, StaticIdentity};
use crate::branch_cache::BranchStateCache;
use crate::cache::CacheStore;
use crate::config::GitConfig;
use crate::error::{CommandError, GitError, Result};
use crate::retry::git_retry;
use crate::runner::{GitRunner, RealGitRunner};
use crate::types::CommitSha;
use crate::usage::{NoopUsage, UsageCounter};

/// Mutable per-run state. Reset wholesale by [`RepoSession::init_repo`].
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    /// Logical base branch; the default branch unless pinned.
    pub(crate) current_branch: Option<String>,
    pub(crate) current_branch_sha: Option<CommitSha>,
    /// Branch registry: name → last-known remote tip.
    pub(crate) branch_commits: BTreeMap<String, CommitSha>,
    pub(crate) branch_is_modified: HashMap<String, bool>,
    pub(crate) ignored_authors: Vec<String>,
    /// Set by [`RepoSession::set_user_repo_config`]; wins over the provider.
    pub(crate) author_override: Option<GitAuthor>,
    pub(crate) identity: Option<CommitIdentity>,
    pub(crate) initialized: bool,
    pub(crate) author_written: bool,
    pub(crate) signing_configured: bool,
    pub(crate) side_refs_pushed: bool,
}

/// One repository checkout for the duration of a run.
///
/// Mutating operations take `&mut self`; a session is driven by a single
/// task. Sessions for different repositories only share the cache store.
pub struct RepoSession {
    pub(crate) config: GitConfig,
    pub(crate) url: String,
    pub(crate) runner: Arc<dyn GitRunner>,
    pub(crate) cache: BranchStateCache,
    pub(crate) usage: Arc<dyn UsageCounter>,
    pub(crate) identity_provider: Arc<dyn IdentityProvider>,
    pub(crate) state: SessionState,
}

impl RepoSession {
    /// Session that shells out to the real `git` binary.
    pub fn new(config: GitConfig, url: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        Self::with_git_runner(config, url, store, Arc::new(RealGitRunner))
    }

    pub fn with_git_runner(
        config: GitConfig,
        url: impl Into<String>,
        store: Arc<dyn CacheStore>,
        runner: Arc<dyn GitRunner>,
    ) -> Self {
        let cache = BranchStateCache::new(store, Duration::from_secs(config.cache.ttl_secs));
        let identity_provider = Arc::new(StaticIdentity::from_config(&config));
        Self {
            config,
            url: url.into(),
            runner,
            cache,
            usage: Arc::new(NoopUsage),
            identity_provider,
            state: SessionState::default(),
        }
    }

    pub fn with_usage(mut self, usage: Arc<dyn UsageCounter>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_identity(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = provider;
        self
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Logical base branch, known once the mirror is synced.
    pub fn current_branch(&self) -> Option<&str> {
        self.state.current_branch.as_deref()
    }

    pub fn current_branch_sha(&self) -> Option<&str> {
        self.state.current_branch_sha.as_deref()
    }

    /// Whether the mirror has been synchronized in this session.
    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    /// Reset all session state and load the branch registry from the remote.
    pub async fn init_repo(&mut self) -> Result<()> {
        self.state = SessionState {
            ignored_authors: self.config.ignored_authors.clone(),
            ..SessionState::default()
        };
        tokio::fs::create_dir_all(&self.config.local_dir).await?;
        self.fetch_branch_commits().await
    }

    /// Per-repository overrides: authors whose commits do not count as human
    /// edits, and the committing identity.
    pub fn set_user_repo_config(
        &mut self,
        ignored_authors: Vec<String>,
        git_author: Option<&str>,
    ) -> Result<()> {
        self.state.ignored_authors = ignored_authors;
        if let Some(raw) = git_author {
            let author = GitAuthor::parse(raw).ok_or_else(|| {
                GitError::ConfigValidation(format!(
                    "git author is not a valid `Name <email>` address: {raw}"
                ))
            })?;
            self.state.author_override = Some(author);
        }
        Ok(())
    }

    /// The committing identity, fetched from the provider on first use.
    pub(crate) fn identity(&mut self) -> CommitIdentity {
        let provider = &self.identity_provider;
        let mut identity = self
            .state
            .identity
            .get_or_insert_with(|| provider.identity())
            .clone();
        if let Some(author) = &self.state.author_override {
            identity.author = author.clone();
        }
        identity
    }

    /// The base branch, or `Temporary` when the mirror has not resolved it.
    pub(crate) fn base_branch(&self) -> Result<String> {
        self.state
            .current_branch
            .clone()
            .ok_or_else(|| GitError::Temporary("base branch is not known yet".into()))
    }

    pub(crate) fn base_sha(&self) -> Result<CommitSha> {
        self.state
            .current_branch_sha
            .clone()
            .ok_or_else(|| GitError::Temporary("base branch sha is not known yet".into()))
    }

    // -----------------------------------------------------------------------
    // git plumbing
    // -----------------------------------------------------------------------

    /// Run git in the mirror, returning stdout or the raw failure.
    pub(crate) async fn git_raw(&self, args: &[&str]) -> std::result::Result<String, CommandError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        trace!(args = %args.join(" "), "git");
        match self.runner.run_git(&self.config.local_dir, &args).await {
            Ok(out) if out.success => Ok(out.stdout),
            Ok(out) => {
                debug!(args = %args.join(" "), exit_code = ?out.exit_code, stderr = %out.stderr.trim(), "git command failed");
                Err(CommandError {
                    args,
                    exit_code: out.exit_code,
                    stdout: out.stdout,
                    stderr: out.stderr,
                })
            }
            Err(err) => Err(CommandError {
                args,
                exit_code: None,
                stdout: String::new(),
                stderr: err.to_string(),
            }),
        }
    }

    /// Run git in the mirror with classified errors.
    pub(crate) async fn git(&self, args: &[&str]) -> Result<String> {
        Ok(self.git_raw(args).await?)
    }

    /// Like [`git`](Self::git), retrying host failures.
    pub(crate) async fn git_retry(&self, args: &[&str]) -> Result<String> {
        git_retry(&self.config.retry, move || self.git(args)).await
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    async fn fetch_branch_commits(&mut self) -> Result<()> {
        let mut args: Vec<&str> = Vec::new();
        for (key, value) in &self.config.extra_clone_opts {
            args.push(key);
            args.push(value);
        }
        args.extend(["ls-remote", "--heads", self.url.as_str()]);

        let this = &*self;
        let args = &args;
        let output = git_retry(&this.config.retry, move || this.git_raw_classified(args))
            .await
            .inspect_err(|err| debug!(error = %err, "failed to list remote branches"))?;
        self.state.branch_commits = crate::repo::parse_remote_heads(&output);
        debug!(branches = self.state.branch_commits.len(), "loaded branch registry");
        Ok(())
    }

    /// `git` with the `ls-remote` owner-account check folded in.
    async fn git_raw_classified(&self, args: &[&str]) -> Result<String> {
        self.git_raw(args).await.map_err(|cmd| {
            if cmd.contains("Please ask the owner to check their account") {
                GitError::RepositoryDisabled
            } else {
                GitError::from(cmd)
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn mark_synced_for_tests(&mut self, branch: &str, sha: &str) {
        self.state.initialized = true;
        self.state.current_branch = Some(branch.to_string());
        self.state.current_branch_sha = Some(sha.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

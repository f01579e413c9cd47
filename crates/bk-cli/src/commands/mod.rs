pub mod inspect;
pub mod report;
pub mod write;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bk_core::cache::open_store;
use bk_core::repo::GIT_MINIMUM_VERSION;
use bk_core::runner::RealGitRunner;
use bk_core::sync::validate_git_version;
use bk_core::{GitConfig, RepoSession};
use bk_telemetry::metrics::MetricsCollector;

/// Load config, check the git binary and load the branch registry.
pub async fn open_session(
    config_path: Option<&Path>,
    url: &str,
    metrics: Arc<MetricsCollector>,
) -> anyhow::Result<RepoSession> {
    let config = match config_path {
        Some(path) => GitConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GitConfig::load().context("failed to load config")?,
    };
    if !validate_git_version(&RealGitRunner).await {
        anyhow::bail!("git {GIT_MINIMUM_VERSION} or newer is required");
    }

    let store = open_store(&config.cache)
        .await
        .context("failed to open branch state cache")?;
    let mut session = RepoSession::new(config, url, store).with_usage(metrics);
    session.init_repo().await?;
    Ok(session)
}

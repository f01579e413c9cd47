//! Commits parked under a private ref namespace on the remote, outside
//! `refs/heads`.

use tracing::{debug, warn};

use crate::error::Result;
use crate::repo::parse_ls_remote;
use crate::session::RepoSession;

/// Section used when the caller does not name one.
const DEFAULT_SECTION: &str = "branches";

impl RepoSession {
    /// `<prefix>/<section>/<name>`.
    pub fn side_ref_name(&self, name: &str, section: Option<&str>) -> String {
        format!(
            "{}/{}/{}",
            self.config.side_ref_prefix.trim_end_matches('/'),
            section.unwrap_or(DEFAULT_SECTION),
            name
        )
    }

    /// Point a side ref at `commit_sha` locally and force-push it.
    pub async fn push_commit_to_side_ref(
        &mut self,
        commit_sha: &str,
        name: &str,
        section: Option<&str>,
    ) -> Result<()> {
        let ref_name = self.side_ref_name(name, section);
        debug!(ref_name = %ref_name, commit_sha, "pushing commit to side ref");
        self.git(&["update-ref", ref_name.as_str(), commit_sha]).await?;
        self.git_retry(&["push", "--force", "origin", ref_name.as_str()])
            .await?;
        self.state.side_refs_pushed = true;
        Ok(())
    }

    /// Delete this run's unsectioned and `branches` side refs from the
    /// remote. Only does work when something was pushed in this session.
    ///
    /// A listing that fails for any reason other than the host counts as
    /// no refs.
    pub async fn clear_side_refs(&mut self) -> Result<()> {
        if !self.state.initialized || !self.state.side_refs_pushed {
            return Ok(());
        }
        let prefix = self.config.side_ref_prefix.trim_end_matches('/').to_string();
        let pattern = format!("{prefix}/*");
        let listing = match self
            .git_retry(&["ls-remote", self.url.as_str(), pattern.as_str()])
            .await
        {
            Ok(output) => output,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                warn!(error = %err, "unable to list side refs");
                String::new()
            }
        };

        let scope = format!("{prefix}/");
        let branches_scope = format!("{prefix}/{DEFAULT_SECTION}/");
        let obsolete: Vec<String> = parse_ls_remote(&listing)
            .into_iter()
            .map(|(_, name)| name)
            .filter(|name| {
                let Some(rest) = name.strip_prefix(scope.as_str()) else {
                    return false;
                };
                !rest.contains('/') || name.starts_with(branches_scope.as_str())
            })
            .collect();

        if !obsolete.is_empty() {
            debug!(count = obsolete.len(), "clearing side refs");
            let mut push = vec!["push", "--delete", "origin"];
            push.extend(obsolete.iter().map(String::as_str));
            self.git_retry(&push).await?;
        }
        self.state.side_refs_pushed = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

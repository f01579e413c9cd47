//! Fault-tolerant wrapper for git calls that touch the remote.
//!
//! Failures are classified through [`GitError::is_transient`]; only host
//! failures are retried, everything else is returned on the spot. The
//! executor never touches session state, callers update it after success.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::RetryConfig;
use crate::error::Result;

impl RetryConfig {
    /// Delay before retry `round` (1-based): `base × factor^(round-1)`.
    pub fn delay_for_round(&self, round: u32) -> Duration {
        let exponent = round.saturating_sub(1);
        let factor = u64::from(self.backoff_factor).saturating_pow(exponent);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Run `op`, retrying host failures up to `policy.max_retries` extra times.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once retries are exhausted.
pub async fn git_retry<T, F, Fut>(policy: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut round: u32 = 0;
    loop {
        if round > 0 {
            debug!(round, "git retry round");
        }
        match op().await {
            Ok(value) => {
                if round > 0 {
                    debug!(round, "successful retry of git function");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && round < policy.max_retries => {
                round += 1;
                let delay = policy.delay_for_round(round);
                debug!(
                    error = %err,
                    round,
                    max_retries = policy.max_retries,
                    "external host error, retrying"
                );
                trace!(delay_ms = delay.as_millis() as u64, "delay next round");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

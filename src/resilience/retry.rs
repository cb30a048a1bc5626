//! Retry with exponential backoff for transient upstream failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::UpstreamError;
use crate::metrics;

/// Upper bound for a single backoff wait, whatever the attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Backoff unit. The wait after failed attempt `k` is `base_delay * 2^k`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. Returns the last error in the latter cases.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        error = %e,
                        "Retry {} for {} after {}s",
                        attempt,
                        e,
                        wait.as_secs_f64()
                    );
                    metrics::record_upstream_retry();
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

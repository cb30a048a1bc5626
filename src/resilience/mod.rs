//! Resilience policies for outbound calls.
//!
//! [`ResiliencePipeline`] composes a [`CircuitBreaker`] around a
//! [`RetryPolicy`]:
//!
//! ```text
//! execute(op)
//!   │
//!   ├─ breaker.try_acquire() ── Err ──► CircuitOpen (op never invoked)
//!   │
//!   ├─ retry.run(op)          transient failures retried with backoff
//!   │
//!   └─ permit.record_*()      one outcome per execute call
//! ```
//!
//! Only transient failures count against the breaker. A domain failure means
//! the upstream answered, so it is recorded as a healthy outcome.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;

use crate::config::Config;
use crate::error::UpstreamError;
use crate::metrics;

/// Retry-inside-breaker policy shared by every call to one dependency.
#[derive(Clone)]
pub struct ResiliencePipeline {
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ResiliencePipeline {
    pub fn new(retry: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { retry, breaker }
    }

    /// Build the upstream pipeline from application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay),
            Arc::new(CircuitBreaker::named(
                "exchange-rate-provider",
                CircuitBreakerConfig::new(
                    config.circuit_breaker_failure_threshold,
                    config.circuit_breaker_open_duration,
                ),
            )),
        )
    }

    /// Run `op` under the breaker and retry policies.
    pub async fn execute<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                metrics::record_upstream_call(operation, "rejected");
                return Err(e);
            }
        };

        let started = Instant::now();
        let result = self.retry.run(operation, op).await;
        metrics::record_upstream_duration(operation, started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => {
                permit.record_success();
                metrics::record_upstream_call(operation, "success");
            }
            Err(e) if e.is_transient() => {
                permit.record_failure(e);
                metrics::record_upstream_call(operation, "failure");
            }
            Err(_) => {
                permit.record_success();
                metrics::record_upstream_call(operation, "domain_error");
            }
        }

        result
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn pipeline(max_attempts: u32, threshold: u32) -> ResiliencePipeline {
        ResiliencePipeline::new(
            RetryPolicy::new(max_attempts, Duration::from_millis(10)),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new(
                threshold,
                Duration::from_secs(30),
            ))),
        )
    }

    async fn failing(pipeline: &ResiliencePipeline, calls: &Arc<AtomicU32>) -> Result<(), UpstreamError> {
        pipeline
            .execute("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(UpstreamError::Transport("connection refused".into()))
                }
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_counts_one_outcome_per_retry_sequence() {
        let pipeline = pipeline(5, 3);
        let calls = Arc::new(AtomicU32::new(0));

        failing(&pipeline, &calls).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(pipeline.breaker().state(), CircuitState::Closed);

        failing(&pipeline, &calls).await.unwrap_err();
        failing(&pipeline, &calls).await.unwrap_err();
        assert_eq!(pipeline.breaker().state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success_keep_breaker_closed() {
        // Threshold 1: a single failed execute would open the circuit
        let pipeline = pipeline(5, 1);
        let calls = Arc::new(AtomicU32::new(0));

        let value = pipeline
            .execute("test", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(UpstreamError::Status { status: 503 })
                    } else {
                        Ok("rates")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "rates");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
        assert_eq!(pipeline.breaker().times_opened(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_open_exactly_once() {
        let pipeline = pipeline(1, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Arc::new(tokio::sync::Barrier::new(32));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pipeline = pipeline.clone();
                let calls = calls.clone();
                let start = start.clone();
                tokio::spawn(async move {
                    start.wait().await;
                    pipeline
                        .execute("test", || {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::task::yield_now().await;
                                Err::<(), _>(UpstreamError::Transport("connection reset".into()))
                            }
                        })
                        .await
                })
            })
            .collect();

        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap().unwrap_err() {
                UpstreamError::CircuitOpen { .. } => rejected += 1,
                other => assert!(other.is_transient(), "unexpected {other:?}"),
            }
        }

        assert_eq!(pipeline.breaker().state(), CircuitState::Open);
        assert_eq!(pipeline.breaker().times_opened(), 1);
        assert_eq!(rejected + calls.load(Ordering::SeqCst), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_invoking_op() {
        let pipeline = pipeline(1, 1);
        let calls = Arc::new(AtomicU32::new(0));

        failing(&pipeline, &calls).await.unwrap_err();
        let err = failing(&pipeline, &calls).await.unwrap_err();

        assert!(matches!(err, UpstreamError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_failure_does_not_trip_breaker() {
        let pipeline = pipeline(5, 1);

        for _ in 0..3 {
            let err = pipeline
                .execute("test", || async {
                    Err::<(), _>(UpstreamError::MissingRate("EUR".into()))
                })
                .await
                .unwrap_err();
            assert_eq!(err, UpstreamError::MissingRate("EUR".into()));
        }

        assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_cooldown() {
        let pipeline = pipeline(1, 1);
        let calls = Arc::new(AtomicU32::new(0));
        failing(&pipeline, &calls).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(30)).await;

        let value = pipeline.execute("test", || async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
    }
}

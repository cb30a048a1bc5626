//! Shared application state for Axum handlers.
//!
//! - **Services**: currency operations over the resilient upstream client
//! - **Auth**: signing keys, the user directory, per-IP failure tracking
//! - **Resilience**: the upstream pipeline, read by `/health`
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::auth::{JwtKeys, UserDirectory};
use crate::config::Config;
use crate::error::AppResult;
use crate::middleware::{AuthFailureGuard, TrustedProxies};
use crate::resilience::ResiliencePipeline;
use crate::services::{Blocklist, CurrencyService};
use crate::upstream::{ExchangeRateProvider, FrankfurterClient};

/// How often idle per-IP auth failure state is dropped.
const AUTH_FAILURE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state for Axum handlers.
///
/// Cloned for each request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub currency: CurrencyService,
    /// Pipeline wrapping every upstream call
    pub resilience: ResiliencePipeline,
    pub jwt: Arc<JwtKeys>,
    pub users: Arc<UserDirectory>,
    pub auth_failures: Arc<AuthFailureGuard>,
    /// Proxies whose forwarding headers name the client
    pub trusted_proxies: Arc<TrustedProxies>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state around the Frankfurter client described by `config`.
    pub fn new(config: Config) -> AppResult<Self> {
        let client = FrankfurterClient::from_config(&config)?;
        let resilience = client.resilience().clone();
        Ok(Self::with_provider(config, Arc::new(client), resilience))
    }

    /// Build state around any provider.
    ///
    /// `resilience` should be the pipeline the provider calls through, so
    /// `/health` reports the breaker that actually guards it.
    pub fn with_provider(
        config: Config,
        provider: Arc<dyn ExchangeRateProvider>,
        resilience: ResiliencePipeline,
    ) -> Self {
        let currency = CurrencyService::new(provider, Blocklist::new(&config.blocked_currencies));
        let jwt = Arc::new(JwtKeys::from_config(&config));
        let trusted_proxies = Arc::new(TrustedProxies::new(&config.trusted_proxies));
        let auth_failures =
            Arc::new(AuthFailureGuard::default().with_trusted_proxies(trusted_proxies.clone()));

        let state = Self {
            currency,
            resilience,
            jwt,
            users: Arc::new(UserDirectory::default()),
            auth_failures,
            trusted_proxies,
            started_at: Instant::now(),
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_auth_failure_sweep();
        state
    }

    /// Periodically forget IPs whose failure budget has replenished, so the
    /// keyed limiter does not grow with every address ever seen.
    fn spawn_auth_failure_sweep(&self) {
        let guard = self.auth_failures.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(AUTH_FAILURE_SWEEP_INTERVAL);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Auth failure sweep received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        guard.retain_recent();
                        trace!("Auth failure state swept");
                    }
                }
            }

            debug!("Auth failure sweep shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

//! Circuit breaker guarding the upstream exchange-rate provider.
//!
//! The circuit breaker prevents request pile-up during upstream outages by
//! failing fast once the provider is known to be unavailable.
//!
//! # States
//!
//! ```text
//!  ┌─────────┐   failures ≥ threshold    ┌─────────┐
//!  │ Closed  │ ────────────────────────► │  Open   │ ◄──────────┐
//!  └────▲────┘                           └────┬────┘            │
//!       │                                     │ cooldown        │
//!       │ trial succeeds                      ▼ elapsed         │
//!       │                              ┌─────────────┐          │
//!       └───────────────────────────── │  HalfOpen   │ ─────────┘
//!                                      │ (one trial) │  trial fails
//!                                      └─────────────┘
//! ```
//!
//! # Concurrency
//!
//! One instance is built per upstream dependency and shared through an `Arc`.
//! Admission and outcome recording each run as a single critical section on a
//! `parking_lot::Mutex`, so concurrent callers can never both observe Closed
//! and push the failure counter past the threshold inconsistently. The lock is
//! never held across an `.await`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//!
//! let permit = breaker.try_acquire()?; // Err(CircuitOpen) while open
//! match operation().await {
//!     Ok(value) => { permit.record_success(); Ok(value) }
//!     Err(e) => { permit.record_failure(&e); Err(e) }
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::UpstreamError;
use crate::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - all requests pass through.
    Closed,
    /// Failing fast - all requests are rejected immediately.
    Open,
    /// Cooldown elapsed - a single trial request is allowed through.
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 = closed, 1 = half-open, 2 = open.
    fn as_gauge(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before admitting a trial call.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration.
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
        }
    }
}

/// State guarded by the breaker's mutex.
struct BreakerState {
    state: CircuitState,
    /// Calls are rejected until this instant while Open.
    open_until: Option<Instant>,
    /// Consecutive failed outcomes while Closed.
    consecutive_failures: u32,
    /// A HalfOpen trial call has been admitted and has not reported back.
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            open_until: None,
            consecutive_failures: 0,
            trial_in_flight: false,
        }
    }
}

/// Thread-safe circuit breaker implementation.
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    /// Total number of times the circuit has been opened (for metrics).
    times_opened: AtomicU32,
    /// Total number of calls rejected without being attempted (for metrics).
    requests_rejected: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("upstream", config)
    }

    /// Create a breaker whose log events carry `name` as the dependency.
    pub fn named(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(BreakerState::new()),
            times_opened: AtomicU32::new(0),
            requests_rejected: AtomicU64::new(0),
        }
    }

    /// Decide whether a call may proceed.
    ///
    /// - **Closed**: admitted.
    /// - **Open** before the cooldown elapses: rejected with
    ///   [`UpstreamError::CircuitOpen`].
    /// - **Open** after the cooldown: transitions to HalfOpen and admits this
    ///   caller as the single trial.
    /// - **HalfOpen** with a trial in flight: rejected.
    ///
    /// The returned permit must be resolved with `record_success` or
    /// `record_failure`; dropping it unresolved releases a trial slot without
    /// changing state.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, UpstreamError> {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let open_until = state.open_until.unwrap_or(now);
                if now < open_until {
                    drop(state);
                    return Err(self.reject(open_until - now));
                }
                state.state = CircuitState::HalfOpen;
                state.trial_in_flight = true;
                info!(
                    dependency = self.name,
                    "Circuit breaker half-open, admitting trial call"
                );
                metrics::set_circuit_breaker_state(CircuitState::HalfOpen.as_gauge());
                Ok(BreakerPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    drop(state);
                    return Err(self.reject(Duration::ZERO));
                }
                state.trial_in_flight = true;
                Ok(BreakerPermit::new(self, true))
            }
        }
    }

    fn reject(&self, retry_after: Duration) -> UpstreamError {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_rejection();
        debug!(
            dependency = self.name,
            retry_after = ?retry_after,
            "Circuit breaker rejected call"
        );
        UpstreamError::CircuitOpen { retry_after }
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                // Reset failure counter on success
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if trial => {
                state.state = CircuitState::Closed;
                state.open_until = None;
                state.consecutive_failures = 0;
                state.trial_in_flight = false;
                info!(dependency = self.name, "Circuit breaker reset.");
                metrics::set_circuit_breaker_state(CircuitState::Closed.as_gauge());
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // Outcome from a call admitted before the circuit opened.
                debug!(
                    dependency = self.name,
                    state = %state.state,
                    "Ignoring late success outcome"
                );
            }
        }
    }

    fn on_failure(&self, trial: bool, cause: &UpstreamError) {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                debug!(
                    dependency = self.name,
                    consecutive_failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );

                if state.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut state, now);
                    error!(
                        dependency = self.name,
                        error = %cause,
                        failures = state.consecutive_failures,
                        open_duration_secs = self.config.open_duration.as_secs_f64(),
                        "Circuit breaker triggered"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                self.open(&mut state, now);
                error!(
                    dependency = self.name,
                    error = %cause,
                    open_duration_secs = self.config.open_duration.as_secs_f64(),
                    "Circuit breaker reopened after failed trial call"
                );
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // Already open: late failures do not extend the cooldown.
                debug!(
                    dependency = self.name,
                    state = %state.state,
                    "Ignoring late failure outcome"
                );
            }
        }
    }

    fn open(&self, state: &mut BreakerState, now: Instant) {
        state.state = CircuitState::Open;
        state.open_until = Some(now + self.config.open_duration);
        state.trial_in_flight = false;
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_open();
        metrics::set_circuit_breaker_state(CircuitState::Open.as_gauge());
    }

    fn release_trial(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.trial_in_flight = false;
            warn!(
                dependency = self.name,
                "Trial call abandoned before completion, slot released"
            );
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Get the number of times the circuit has been opened.
    pub fn times_opened(&self) -> u32 {
        self.times_opened.load(Ordering::Relaxed)
    }

    /// Get the number of calls rejected without being attempted.
    pub fn requests_rejected(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    /// Configured consecutive-failure threshold.
    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`].
#[must_use = "resolve the permit with record_success or record_failure"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// Whether this call is the HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self, cause: &UpstreamError) {
        self.resolved = true;
        self.breaker.on_failure(self.trial, cause);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.release_trial();
        }
    }
}

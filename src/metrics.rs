//! Prometheus metrics for application observability.
//!
//! Metrics are exposed via a dedicated HTTP listener when `METRICS_PORT` is
//! set. Recording functions are no-ops until a recorder is installed, so
//! tests and metrics-disabled deployments can call them freely.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_upstream_calls_total` - Upstream calls (labels: operation, outcome)
//! - `gateway_upstream_retries_total` - Retry attempts against the upstream
//! - `gateway_circuit_breaker_opens_total` - Times the circuit breaker opened
//! - `gateway_circuit_breaker_rejections_total` - Calls rejected by the open circuit
//! - `gateway_rate_limit_rejections_total` - Requests answered with 429
//! - `gateway_auth_failures_total` - Rejected credentials (label: reason)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Request duration (labels: endpoint, method, status)
//! - `gateway_upstream_duration_seconds` - Upstream call duration (label: operation)
//!
//! ## Gauges
//! - `gateway_circuit_breaker_state` - Circuit breaker state (0 = closed, 1 = half-open, 2 = open)
//! - `gateway_rate_limit_queue_depth` - Requests currently waiting for a permit

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const UPSTREAM_CALLS_TOTAL: &str = "gateway_upstream_calls_total";
    pub const UPSTREAM_RETRIES_TOTAL: &str = "gateway_upstream_retries_total";
    pub const CIRCUIT_BREAKER_OPENS_TOTAL: &str = "gateway_circuit_breaker_opens_total";
    pub const CIRCUIT_BREAKER_REJECTIONS_TOTAL: &str = "gateway_circuit_breaker_rejections_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "gateway_rate_limit_rejections_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
    pub const CIRCUIT_BREAKER_STATE: &str = "gateway_circuit_breaker_state";
    pub const RATE_LIMIT_QUEUE_DEPTH: &str = "gateway_rate_limit_queue_depth";
}

/// Initialize the Prometheus metrics exporter.
///
/// Sets up metric descriptions and starts the Prometheus HTTP listener on
/// `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::UPSTREAM_CALLS_TOTAL,
        "Total number of calls to the exchange-rate provider"
    );
    describe_counter!(
        names::UPSTREAM_RETRIES_TOTAL,
        "Total number of retried upstream attempts"
    );
    describe_counter!(
        names::CIRCUIT_BREAKER_OPENS_TOTAL,
        "Total number of times the circuit breaker opened"
    );
    describe_counter!(
        names::CIRCUIT_BREAKER_REJECTIONS_TOTAL,
        "Total number of calls rejected by the circuit breaker"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected credentials"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Upstream call duration in seconds, retries included"
    );

    describe_gauge!(
        names::CIRCUIT_BREAKER_STATE,
        "Circuit breaker state (0 = closed, 1 = half-open, 2 = open)"
    );
    describe_gauge!(
        names::RATE_LIMIT_QUEUE_DEPTH,
        "Requests waiting for a rate-limit permit"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record the final outcome of one upstream operation.
pub fn record_upstream_call(operation: &'static str, outcome: &'static str) {
    counter!(names::UPSTREAM_CALLS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
}

/// Record a retried upstream attempt.
pub fn record_upstream_retry() {
    counter!(names::UPSTREAM_RETRIES_TOTAL).increment(1);
}

/// Record circuit breaker opening.
pub fn record_circuit_breaker_open() {
    counter!(names::CIRCUIT_BREAKER_OPENS_TOTAL).increment(1);
}

/// Record circuit breaker rejection.
pub fn record_circuit_breaker_rejection() {
    counter!(names::CIRCUIT_BREAKER_REJECTIONS_TOTAL).increment(1);
}

/// Record a request rejected with 429.
pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

/// Record a rejected credential.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record HTTP request duration.
pub fn record_request_duration(endpoint: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Record upstream call duration.
pub fn record_upstream_duration(operation: &'static str, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "operation" => operation).record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update circuit breaker state gauge.
///
/// States: 0 = closed, 1 = half-open, 2 = open
pub fn set_circuit_breaker_state(state: u8) {
    gauge!(names::CIRCUIT_BREAKER_STATE).set(f64::from(state));
}

/// Update the rate-limit queue depth gauge.
pub fn set_rate_limit_queue_depth(depth: usize) {
    gauge!(names::RATE_LIMIT_QUEUE_DEPTH).set(depth as f64);
}

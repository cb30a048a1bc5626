//! Health endpoint.
//!
//! `GET /health` is anonymous and exempt from rate limiting so health checks keep
//! working under load. It always returns 200; the body reports `degraded`
//! while the upstream circuit is not closed.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::resilience::CircuitState;
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "upstream_circuit": "closed",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let circuit = state.resilience.breaker().state();

    Json(HealthResponse {
        status: if circuit == CircuitState::Closed {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        upstream_circuit: circuit.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

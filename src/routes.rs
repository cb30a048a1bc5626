//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if window and queue are full (/health exempt)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Access Log    │ ← one INFO record per request
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Exception Mapper │ ← AppError → application/problem+json
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id set and propagated
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Tracing / CORS  │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← per route: 401 / 403
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Health (anonymous)
//! - `/api/v1/auth/token` - Token issuance (anonymous)
//! - `/api/v1/currency/*` - Rates and conversion (bearer token)
//! - `/api/v2/currency/convert` - Conversion, v2 query shape (bearer token)

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::routing::{MethodRouter, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::auth::AccessPolicy;
use crate::error::{AppError, AppResult};
use crate::handlers;
use crate::middleware::{
    AccessLogLayer, AuthLayer, ExceptionMapperLayer, REQUEST_ID_HEADER, RateLimitLayer,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: Enabled if `RATE_LIMIT_PERMITS > 0`
/// - **CORS**: Configured from `cors_allowed_origins`
/// - **Problem details**: Diagnostic detail on 500s only in development
///
/// # Errors
///
/// Returns `AppError::ConfigError` if the rate limit configuration is invalid.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let config = state.config.clone();
    let cors = build_cors_layer(&config.cors_allowed_origins);
    let trusted_proxies = state.trusted_proxies.clone();

    let guarded = |policy: AccessPolicy, route: MethodRouter<AppState>| {
        route.route_layer(AuthLayer::new(
            state.jwt.clone(),
            policy,
            Some(state.auth_failures.clone()),
        ))
    };

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/auth/token", post(handlers::issue_token))
        .route(
            "/api/v1/currency/latest",
            guarded(AccessPolicy::USER_OR_ADMIN, get(handlers::latest_rates)),
        )
        .route(
            "/api/v1/currency/convert",
            guarded(AccessPolicy::USER_OR_ADMIN, get(handlers::convert)),
        )
        .route(
            "/api/v1/currency/history",
            guarded(AccessPolicy::ADMIN_ONLY, get(handlers::historical_rates)),
        )
        .route(
            "/api/v2/currency/convert",
            guarded(AccessPolicy::USER_OR_ADMIN, get(handlers::convert_v2)),
        )
        .fallback(not_found)
        .with_state(state);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    // 1. CORS
    router = router.layer(cors);

    // 2. Tracing (one span per request, tagged with the request ID)
    router = router.layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id,
        )
    }));

    // 3. Request ID (generated if absent, echoed on the response)
    router = router.layer(PropagateRequestIdLayer::new(request_id.clone()));
    router = router.layer(SetRequestIdLayer::new(request_id, MakeRequestUuid));

    // 4. Problem details for every AppError
    router = router.layer(ExceptionMapperLayer::new(config.environment));

    // 5. Access log
    router = router.layer(AccessLogLayer::with_trusted_proxies(trusted_proxies));

    // 6. Rate Limiting (if enabled) - applied last, runs first in request pipeline
    if config.rate_limiting_enabled() {
        info!(
            permits = config.rate_limit_permits,
            window_secs = config.rate_limit_window.as_secs(),
            queue = config.rate_limit_queue,
            "Rate limiting enabled"
        );
        let limiter = RateLimitLayer::new(
            config.rate_limit_permits,
            config.rate_limit_window,
            config.rate_limit_queue,
        )
        .map_err(|e| AppError::ConfigError(e.to_string()))?;
        router = router.layer(limiter);
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_PERMITS=0)");
    }

    Ok(router)
}

async fn not_found(uri: axum::http::Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin; otherwise only the listed origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

//! JWT bearer authentication and role authorization.
//!
//! # Security Features
//!
//! - **HS256 verification**: signature, issuer, audience and expiry are all
//!   checked before a request reaches a handler
//! - **Per-route policy**: each route declares an [`AccessPolicy`]; the layer is
//!   installed with `route_layer` so unmatched paths still 404
//! - **Brute-force protection**: repeated failures from one IP are answered with
//!   429 instead of 401
//!
//! # Usage
//!
//! ```bash
//! TOKEN=$(curl -s -X POST localhost:3000/api/v1/auth/token \
//!     -H 'Content-Type: application/json' \
//!     -d '{"username":"user","password":"123"}' | jq -r .token)
//! curl -H "Authorization: Bearer $TOKEN" \
//!     'localhost:3000/api/v1/currency/latest?baseCurrency=EUR'
//! ```
//!
//! # Responses
//!
//! | Condition | Status |
//! |---|---|
//! | No `Authorization: Bearer` header, bad or expired token | 401 + `WWW-Authenticate: Bearer` |
//! | Valid token, role not allowed by the route | 403 |
//! | Failure budget for the client IP exhausted | 429 + `Retry-After` |

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, header};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::{TrustedProxies, extract_client_ip};
use super::rate_limit::too_many_requests;
use crate::auth::{AccessPolicy, AuthenticatedUser, JwtKeys, TokenError};
use crate::error::AppError;
use crate::metrics;

/// Scheme prefix of the `Authorization` header, matched case-insensitively.
const BEARER_PREFIX: &str = "bearer ";

/// Default maximum auth failures per IP per minute.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Default burst capacity for auth failure rate limiting.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Type alias for auth failure rate limiter (per-IP).
type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Tracks authentication failures per client IP.
///
/// Only failures consume budget, so a client holding a valid token is never
/// throttled by this guard. Once an IP has spent its budget, each further
/// failure is answered with 429 until the quota replenishes. Shared by the
/// bearer gate and the token endpoint.
///
/// Clients are keyed by [`AuthFailureGuard::client_ip`], which only believes
/// forwarding headers sent by a trusted proxy.
pub struct AuthFailureGuard {
    limiter: AuthFailureLimiter,
    proxies: Arc<TrustedProxies>,
}

impl Default for AuthFailureGuard {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_FAILURE_LIMIT, DEFAULT_AUTH_FAILURE_BURST)
    }
}

impl AuthFailureGuard {
    pub fn new(per_minute: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
            proxies: Arc::new(TrustedProxies::NONE),
        }
    }

    /// Believe forwarding headers from peers inside `proxies`.
    pub fn with_trusted_proxies(mut self, proxies: Arc<TrustedProxies>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Key under which failures of `req` are counted.
    pub fn client_ip<B>(&self, req: &Request<B>) -> String {
        extract_client_ip(req, &self.proxies).into_owned()
    }

    /// Record one failure for `client_ip`.
    ///
    /// Returns `Err(retry_after_secs)` when the IP is over budget.
    pub fn record_failure(&self, client_ip: &str) -> Result<(), u64> {
        self.limiter
            .check_key(&client_ip.to_string())
            .map_err(|not_until| {
                not_until
                    .wait_time_from(DefaultClock::default().now())
                    .as_secs()
                    .max(1)
            })
    }

    /// Turn a failure into the response the client gets: 401 normally, 429
    /// once the IP is over budget.
    pub fn reject(&self, client_ip: &str, error: AppError) -> Response<Body> {
        match self.record_failure(client_ip) {
            Ok(()) => unauthorized(error),
            Err(retry_after) => {
                error!(
                    client_ip = %client_ip,
                    retry_after_secs = retry_after,
                    "IP blocked due to excessive auth failures"
                );
                too_many_requests(retry_after)
            }
        }
    }

    /// Drop state for IPs whose budget has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

/// Bearer authentication layer for one access policy.
#[derive(Clone)]
pub struct AuthLayer {
    keys: Arc<JwtKeys>,
    policy: AccessPolicy,
    failures: Option<Arc<AuthFailureGuard>>,
}

impl AuthLayer {
    /// # Arguments
    ///
    /// * `keys` - Verification keys shared with the token endpoint
    /// * `policy` - Who may call the wrapped routes
    /// * `failures` - Brute-force guard, or `None` to always answer 401
    pub fn new(
        keys: Arc<JwtKeys>,
        policy: AccessPolicy,
        failures: Option<Arc<AuthFailureGuard>>,
    ) -> Self {
        Self {
            keys,
            policy,
            failures,
        }
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            keys: self.keys.clone(),
            policy: self.policy,
            failures: self.failures.clone(),
        }
    }
}

/// Bearer authentication service wrapper.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    keys: Arc<JwtKeys>,
    policy: AccessPolicy,
    failures: Option<Arc<AuthFailureGuard>>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let keys = self.keys.clone();
        let policy = self.policy;
        let failures = self.failures.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !policy.requires_token() {
                return inner.call(req).await;
            }

            let client_ip = match &failures {
                Some(guard) => guard.client_ip(&req),
                None => extract_client_ip(&req, &TrustedProxies::NONE).into_owned(),
            };
            let verified = match extract_bearer(&req) {
                Some(token) => keys.verify(token).map_err(AuthFailure::Token),
                None => Err(AuthFailure::Missing),
            };

            let user = match verified {
                Ok(claims) => AuthenticatedUser::from(claims),
                Err(failure) => {
                    metrics::record_auth_failure(failure.reason());
                    warn!(
                        path = %req.uri().path(),
                        client_ip = %client_ip,
                        reason = failure.reason(),
                        "Bearer authentication failed"
                    );
                    let error = AppError::Unauthenticated(failure.to_string());
                    return Ok(match failures {
                        Some(guard) => guard.reject(&client_ip, error),
                        None => unauthorized(error),
                    });
                }
            };

            if !policy.permits(user.role) {
                metrics::record_auth_failure("forbidden_role");
                warn!(
                    path = %req.uri().path(),
                    subject = %user.subject,
                    role = %user.role,
                    "Role not permitted for route"
                );
                let mut response =
                    AppError::Forbidden(format!("role {} is not permitted", user.role))
                        .into_response();
                response.extensions_mut().insert(user);
                return Ok(response);
            }

            debug!(subject = %user.subject, role = %user.role, "Bearer authentication successful");
            req.extensions_mut().insert(user.clone());
            let mut response = inner.call(req).await?;
            // Lets the access logger name the caller.
            response.extensions_mut().insert(user);
            Ok(response)
        })
    }
}

enum AuthFailure {
    Missing,
    Token(TokenError),
}

impl AuthFailure {
    fn reason(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "missing_token",
            AuthFailure::Token(e) => e.reason(),
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Missing => write!(f, "bearer token required"),
            AuthFailure::Token(e) => write!(f, "{e}"),
        }
    }
}

/// Token from `Authorization: Bearer <token>`.
fn extract_bearer<B>(req: &Request<B>) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let prefix = value.get(..BEARER_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BEARER_PREFIX) {
        return None;
    }
    let token = value.get(BEARER_PREFIX.len()..)?.trim();
    (!token.is_empty()).then_some(token)
}

/// 401 carrying the bearer challenge. The body is rendered by the exception
/// mapper.
fn unauthorized(error: AppError) -> Response<Body> {
    let mut response = error.into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

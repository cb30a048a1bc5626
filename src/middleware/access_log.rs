//! One structured record per request.
//!
//! The layer wraps everything except the rate limiter. It times the request,
//! buffers the response body so the record can carry its size, and hands the
//! same bytes back to the client. The record is kept in a scope guard and is
//! emitted when the guard drops, so a panic or cancelled request future still
//! produces exactly one line.
//!
//! ```text
//! HTTP GET /api/v1/currency/latest responded 200 in 12ms
//!   client_ip=203.0.113.50 client_id=user request_id=5f0c...
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{error, info};

use super::ip::{TrustedProxies, extract_client_ip};
use super::scopeguard::guard;
use crate::auth::AuthenticatedUser;
use crate::metrics;

/// Header set by the request-id layer.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `client_id` for requests without an authenticated caller.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// What the access logger knows about a request so far.
#[derive(Debug)]
struct AccessRecord {
    method: String,
    path: String,
    client_ip: String,
    started: Instant,
    /// Stays 500 unless a response is produced.
    status: u16,
    client_id: String,
    request_id: String,
    response_bytes: usize,
}

impl AccessRecord {
    fn emit(self) {
        let elapsed = self.started.elapsed();
        let elapsed_ms = elapsed.as_millis();
        info!(
            method = %self.method,
            path = %self.path,
            status = self.status,
            elapsed_ms = elapsed_ms as u64,
            client_ip = %self.client_ip,
            client_id = %self.client_id,
            request_id = %self.request_id,
            response_bytes = self.response_bytes,
            "HTTP {} {} responded {} in {}ms",
            self.method,
            self.path,
            self.status,
            elapsed_ms
        );
        metrics::record_request_duration(
            &self.path,
            &self.method,
            &self.status.to_string(),
            elapsed.as_secs_f64(),
        );
    }
}

#[derive(Clone, Default)]
pub struct AccessLogLayer {
    proxies: Arc<TrustedProxies>,
}

impl AccessLogLayer {
    /// Log the TCP peer as `client_ip`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the forwarded client IP when the peer is a trusted proxy.
    pub fn with_trusted_proxies(proxies: Arc<TrustedProxies>) -> Self {
        Self { proxies }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            proxies: self.proxies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    proxies: Arc<TrustedProxies>,
}

impl<S> Service<Request<Body>> for AccessLogService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let record = AccessRecord {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            client_ip: extract_client_ip(&req, &self.proxies).into_owned(),
            started: Instant::now(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            client_id: ANONYMOUS_CLIENT.to_string(),
            request_id: String::new(),
            response_bytes: 0,
        };
        // Created before the future so a request dropped unpolled is still logged.
        let mut record = guard(record, AccessRecord::emit);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            record.status = response.status().as_u16();
            if let Some(user) = response.extensions().get::<AuthenticatedUser>() {
                record.client_id = user.subject.clone();
            }
            if let Some(id) = response
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                record.request_id = id.to_string();
            }

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(path = %record.path, error = %e, "Failed to buffer response body");
                    record.status = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
                    return Ok(Response::from_parts(parts, Body::empty()));
                }
            };
            record.response_bytes = bytes.len();

            Ok(Response::from_parts(parts, Body::from(bytes)))
        })
    }
}

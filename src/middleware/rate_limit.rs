//! Global fixed-window rate limiting with a bounded FIFO wait queue.
//!
//! # Algorithm
//!
//! Time is cut into fixed windows of `window` length. Each window grants
//! `permits` admissions. A request arriving when the window is spent waits in
//! a queue of at most `queue_limit` entries and is admitted, oldest first, when
//! the next window opens. Anything beyond that is rejected immediately.
//!
//! ```text
//!  window 1 (10s)              window 2
//!  ├─ ✓ ✓ ✓ ✓ ✓ ─ q q ─ ✗ ──────┼─ q→✓ q→✓ ✓ ...
//!      5 permits   queue  429     queued requests admitted first
//! ```
//!
//! The limit is global, not per client. All state lives behind one
//! `parking_lot::Mutex`; the check-and-update is a single critical section and
//! the lock is never held across an `.await`.
//!
//! # Response
//!
//! Rejections get a fixed `429 Too Many Requests` with `Retry-After` (seconds
//! until the current window closes) and `Cache-Control: public`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::metrics;

/// Paths that are never rate limited.
const DEFAULT_BYPASS_PATHS: [&str; 1] = ["/health"];

/// Error type for rate limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Permit count cannot be zero.
    ZeroPermits,
    /// Window length cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroPermits => write!(
                f,
                "permits must be greater than 0; leave the layer out for no limiting"
            ),
            RateLimitError::ZeroWindow => write!(f, "window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Request was neither admitted nor queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Time until the current window closes.
    pub retry_after: Duration,
}

impl Rejected {
    /// `Retry-After` value in whole seconds, at least 1.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

struct WindowState {
    window_start: Instant,
    permits_used: u32,
    /// Waiters in arrival order. A closed sender is a cancelled waiter.
    queue: VecDeque<oneshot::Sender<()>>,
}

/// Fixed-window limiter shared by every request.
pub struct FixedWindowRateLimiter {
    permits: u32,
    window: Duration,
    queue_limit: usize,
    state: Mutex<WindowState>,
}

impl FixedWindowRateLimiter {
    pub fn new(permits: u32, window: Duration, queue_limit: usize) -> Result<Self, RateLimitError> {
        if permits == 0 {
            return Err(RateLimitError::ZeroPermits);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            permits,
            window,
            queue_limit,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                permits_used: 0,
                queue: VecDeque::with_capacity(queue_limit),
            }),
        })
    }

    /// Roll the window forward if it has closed and hand the fresh permits to
    /// queued waiters, oldest first.
    fn replenish_if_due(&self, state: &mut WindowState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed < self.window {
            return;
        }

        // Align to window boundaries so idle periods do not shift the grid.
        let into_window = elapsed.as_nanos() % self.window.as_nanos();
        state.window_start = now - Duration::from_nanos(u64::try_from(into_window).unwrap_or(0));
        state.permits_used = 0;

        while state.permits_used < self.permits {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                state.permits_used += 1;
            }
        }
        metrics::set_rate_limit_queue_depth(state.queue.len());
    }

    fn window_end(&self, state: &WindowState) -> Instant {
        state.window_start + self.window
    }

    /// Wait for a permit, or fail immediately when the queue is full.
    ///
    /// Dropping the returned future while queued gives up the queue slot.
    pub async fn acquire(&self) -> Result<(), Rejected> {
        let mut rx = {
            let now = Instant::now();
            let mut state = self.state.lock();
            self.replenish_if_due(&mut state, now);

            // Arrivals never overtake queued waiters.
            if state.permits_used < self.permits && state.queue.is_empty() {
                state.permits_used += 1;
                return Ok(());
            }

            state.queue.retain(|waiter| !waiter.is_closed());
            if state.queue.len() >= self.queue_limit {
                return Err(Rejected {
                    retry_after: self.window_end(&state).saturating_duration_since(now),
                });
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            metrics::set_rate_limit_queue_depth(state.queue.len());
            debug!(queued = state.queue.len(), "Request queued for next rate-limit window");
            rx
        };

        loop {
            let window_end = self.window_end(&self.state.lock());
            tokio::select! {
                biased;
                admitted = &mut rx => {
                    return admitted.map_err(|_| Rejected { retry_after: self.window });
                }
                _ = sleep_until(window_end) => {
                    let mut state = self.state.lock();
                    self.replenish_if_due(&mut state, Instant::now());
                }
            }
        }
    }

    /// Waiters currently queued (cancelled ones included until pruned).
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(5, Duration::from_secs(10), 2)?;
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<FixedWindowRateLimiter>,
    bypass_paths: Arc<Vec<String>>,
}

impl RateLimitLayer {
    /// Create a limiter layer with the default bypass paths (`/health`).
    pub fn new(permits: u32, window: Duration, queue_limit: usize) -> Result<Self, RateLimitError> {
        Ok(Self::with_limiter(Arc::new(FixedWindowRateLimiter::new(
            permits,
            window,
            queue_limit,
        )?)))
    }

    pub fn with_limiter(limiter: Arc<FixedWindowRateLimiter>) -> Self {
        Self {
            limiter,
            bypass_paths: Arc::new(
                DEFAULT_BYPASS_PATHS
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            ),
        }
    }

    /// Create a disabled rate limiter (allows all requests).
    pub fn disabled() -> Option<Self> {
        None
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            bypass_paths: self.bypass_paths.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<FixedWindowRateLimiter>,
    bypass_paths: Arc<Vec<String>>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        let bypass = self.bypass_paths.iter().any(|p| p == req.uri().path());

        Box::pin(async move {
            if bypass {
                return inner.call(req).await;
            }

            match limiter.acquire().await {
                Ok(()) => inner.call(req).await,
                Err(rejected) => {
                    warn!(
                        method = %req.method(),
                        path = %req.uri().path(),
                        retry_after_secs = rejected.retry_after_secs(),
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limit_rejection();
                    Ok(too_many_requests(rejected.retry_after_secs()))
                }
            }
        })
    }
}

/// Fixed 429 response.
pub fn too_many_requests(retry_after_secs: u64) -> Response<Body> {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        "Too many requests. Please try again later.",
    )
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public"));
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::Poll;

    fn limiter(permits: u32, queue: usize) -> Arc<FixedWindowRateLimiter> {
        Arc::new(FixedWindowRateLimiter::new(permits, Duration::from_secs(10), queue).unwrap())
    }

    /// Poll a future once without waiting.
    async fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        std::future::poll_fn(|cx| Poll::Ready(Pin::new(&mut *fut).poll(cx))).await
    }

    #[test]
    fn test_zero_permits_rejected() {
        assert_eq!(
            FixedWindowRateLimiter::new(0, Duration::from_secs(1), 0).err(),
            Some(RateLimitError::ZeroPermits)
        );
        assert_eq!(
            FixedWindowRateLimiter::new(1, Duration::ZERO, 0).err(),
            Some(RateLimitError::ZeroWindow)
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let rejected = Rejected {
            retry_after: Duration::from_millis(2500),
        };
        assert_eq!(rejected.retry_after_secs(), 3);
        assert_eq!(
            Rejected {
                retry_after: Duration::ZERO
            }
            .retry_after_secs(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permits_then_queue_then_reject() {
        let limiter = limiter(5, 2);

        for _ in 0..5 {
            limiter.acquire().await.unwrap();
        }

        let mut first = Box::pin(limiter.acquire());
        let mut second = Box::pin(limiter.acquire());
        assert!(poll_once(&mut first).await.is_pending());
        assert!(poll_once(&mut second).await.is_pending());
        assert_eq!(limiter.queued(), 2);

        let rejected = limiter.acquire().await.unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_requests_admitted_next_window_in_order() {
        let limiter = limiter(1, 2);
        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..2 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                order.lock().push(id);
            }));
            // Let the task enqueue before spawning the next one
            tokio::task::yield_now().await;
        }

        // Window 2 admits waiter 0, window 3 admits waiter 1
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_restores_permits() {
        let limiter = limiter(2, 0);
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(limiter.acquire().await.is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_frees_queue_slot() {
        let limiter = limiter(1, 1);
        limiter.acquire().await.unwrap();

        let mut waiter = Box::pin(limiter.acquire());
        assert!(poll_once(&mut waiter).await.is_pending());
        assert!(limiter.acquire().await.is_err());

        drop(waiter);

        let mut replacement = Box::pin(limiter.acquire());
        assert!(poll_once(&mut replacement).await.is_pending());
        tokio::time::advance(Duration::from_secs(10)).await;
        replacement.await.unwrap();
    }

    #[test]
    fn test_too_many_requests_headers() {
        let response = too_many_requests(7);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "public");
    }
}

//! HTTP middleware for admission control, security, and observability.
//!
//! - **Rate Limiting**: Global fixed window with a bounded FIFO wait queue
//! - **Access Log**: One structured record per request, response body buffered
//! - **Exception Mapper**: Renders every [`crate::AppError`] as problem+json
//! - **Bearer Authentication**: HS256 JWT with per-route role policies
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → Access Log → Exception Mapper → Request ID → Trace → CORS → Auth → Handler
//!               ↓                             ↓                                       ↓
//!           429 + Retry-After        problem+json bodies                         401 / 403
//! ```
//!
//! # Security Considerations
//!
//! - Token verification checks signature, issuer, audience and expiry
//! - Repeated auth failures from one IP are throttled
//! - Forwarded-for headers are only believed from trusted proxy ranges; see [`ip`]

pub mod access_log;
pub mod auth;
pub mod exception;
pub mod ip;
pub mod rate_limit;
mod scopeguard;

pub use access_log::{ANONYMOUS_CLIENT, AccessLogLayer, REQUEST_ID_HEADER};
pub use auth::{AuthFailureGuard, AuthLayer};
pub use exception::{CONTACT_SUPPORT, ExceptionMapperLayer, UNEXPECTED_TITLE, problem_for};
pub use ip::{CidrRange, TrustedProxies, UNKNOWN_IP, extract_client_ip};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitError, RateLimitLayer, too_many_requests};

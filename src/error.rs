use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failure classification used by the retry loop, the circuit breaker and
/// the exception mapper.
///
/// Every error type in the crate maps onto exactly one kind, and the mapper
/// matches on this enum exhaustively, so adding a kind forces a decision on
/// how it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or HTTP-status failure talking to the upstream. Retried, then
    /// counted by the circuit breaker.
    Transient,
    /// Upstream answered but the payload is semantically unusable. Never retried.
    Domain,
    /// Bad or disallowed input, rejected before any outbound call.
    Validation,
    /// Missing, malformed, expired or mis-signed credential.
    Unauthenticated,
    /// Valid credential without the role the route requires.
    Forbidden,
    /// Resource does not exist.
    NotFound,
    /// Circuit breaker rejected the call without invoking it.
    BreakerOpen,
    /// Anything else.
    Unexpected,
}

impl ErrorKind {
    /// HTTP status the exception mapper renders for this kind.
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient
            | ErrorKind::Domain
            | ErrorKind::BreakerOpen
            | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised while calling the upstream exchange-rate provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Transport error calling exchange-rate provider: {0}")]
    Transport(String),

    #[error("Exchange-rate provider responded with status {status}")]
    Status { status: u16 },

    #[error("Exchange-rate provider returned an empty payload")]
    NullPayload,

    #[error("Invalid payload from exchange-rate provider: {0}")]
    InvalidPayload(String),

    #[error("Missing or invalid conversion result: no rate for {0}")]
    MissingRate(String),

    #[error("Converting {amount} at rate {rate} overflows the decimal range")]
    ConversionOverflow { amount: Decimal, rate: Decimal },

    #[error("Circuit breaker is open, calls rejected for another {retry_after:?}")]
    CircuitOpen { retry_after: Duration },
}

impl UpstreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamError::Transport(_) | UpstreamError::Status { .. } => ErrorKind::Transient,
            UpstreamError::NullPayload
            | UpstreamError::InvalidPayload(_)
            | UpstreamError::MissingRate(_)
            | UpstreamError::ConversionOverflow { .. } => ErrorKind::Domain,
            UpstreamError::CircuitOpen { .. } => ErrorKind::BreakerOpen,
        }
    }

    /// Whether the retry loop should try again after this failure.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            UpstreamError::Status {
                status: status.as_u16(),
            }
        } else if e.is_decode() {
            UpstreamError::InvalidPayload(e.to_string())
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// Field name → messages, rendered as the `errors` member of a validation
/// problem document.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Application-wide error type.
///
/// Handlers and the auth gate return this; it is rendered into a problem
/// document by [`crate::middleware::ExceptionMapperLayer`].
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: FieldErrors,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Validation failure with a single field error.
    pub fn validation(
        message: impl Into<String>,
        field: impl Into<String>,
        field_message: impl Into<String>,
    ) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![field_message.into()]);
        AppError::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation { .. } => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Upstream(e) => e.kind(),
            AppError::Internal(_) | AppError::ConfigError(_) => ErrorKind::Unexpected,
        }
    }
}

/// Response extension carrying the failure from the handler to the
/// exception mapper.
#[derive(Debug, Clone)]
pub struct FailureReport(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // The body is rendered by the exception mapper, which knows the
        // request path and the deployment environment.
        let mut response = self.kind().status_code().into_response();
        response
            .extensions_mut()
            .insert(FailureReport(Arc::new(self)));
        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

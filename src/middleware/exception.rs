//! Renders failures as `application/problem+json`.
//!
//! Handlers and the auth gate return [`AppError`], whose `IntoResponse` leaves
//! a [`FailureReport`] in the response extensions. This layer is the single
//! place such failures are logged and turned into a [`ProblemDetails`] body
//! whose `instance` is the request path. Responses without a report pass
//! through untouched.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode, header};
use tower::{Layer, Service};
use tracing::{error, warn};

use crate::config::Environment;
use crate::error::{AppError, ErrorKind, FailureReport};
use crate::models::{PROBLEM_JSON, ProblemDetails};

/// Title of every 500 problem document.
pub const UNEXPECTED_TITLE: &str = "An unexpected error occurred.";

/// Detail of 500 problem documents outside development.
pub const CONTACT_SUPPORT: &str = "Please contact support.";

#[derive(Clone, Copy)]
pub struct ExceptionMapperLayer {
    environment: Environment,
}

impl ExceptionMapperLayer {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

impl<S> Layer<S> for ExceptionMapperLayer {
    type Service = ExceptionMapperService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExceptionMapperService {
            inner,
            environment: self.environment,
        }
    }
}

#[derive(Clone)]
pub struct ExceptionMapperService<S> {
    inner: S,
    environment: Environment,
}

impl<S> Service<Request<Body>> for ExceptionMapperService<S>
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
        let environment = self.environment;
        let path = req.uri().path().to_string();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            let Some(FailureReport(failure)) = response.extensions().get::<FailureReport>().cloned()
            else {
                return Ok(response);
            };

            let problem = problem_for(&failure, &path, environment);
            match failure.kind() {
                ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::Unauthenticated
                | ErrorKind::Forbidden => {
                    warn!(path = %path, status = problem.status, error = %failure, "Request failed");
                }
                ErrorKind::Transient
                | ErrorKind::Domain
                | ErrorKind::BreakerOpen
                | ErrorKind::Unexpected => {
                    error!(path = %path, error = %failure, "Unhandled exception occurred");
                }
            }

            Ok(render(response, problem))
        })
    }
}

/// Problem document for `failure` raised while serving `path`.
pub fn problem_for(failure: &AppError, path: &str, environment: Environment) -> ProblemDetails {
    let kind = failure.kind();
    let (title, detail, errors) = match kind {
        ErrorKind::Validation => {
            let (message, errors) = match failure {
                AppError::Validation { message, errors } => (message.clone(), Some(errors.clone())),
                other => (other.to_string(), None),
            };
            ("Validation Failed", message, errors)
        }
        ErrorKind::NotFound => ("Not Found", failure.to_string(), None),
        ErrorKind::Unauthenticated => ("Unauthorized", failure.to_string(), None),
        ErrorKind::Forbidden => ("Forbidden", failure.to_string(), None),
        ErrorKind::Transient | ErrorKind::Domain | ErrorKind::BreakerOpen | ErrorKind::Unexpected => {
            let detail = if environment.is_development() {
                format!("{failure:?}")
            } else {
                CONTACT_SUPPORT.to_string()
            };
            (UNEXPECTED_TITLE, detail, None)
        }
    };

    ProblemDetails {
        status: kind.status_code().as_u16(),
        title: title.to_string(),
        detail,
        instance: path.to_string(),
        errors,
    }
}

/// Replace the body of `original` with the serialized problem, keeping its
/// extensions and headers (`WWW-Authenticate`, `x-request-id`).
fn render(original: Response<Body>, problem: ProblemDetails) -> Response<Body> {
    let (mut parts, _) = original.into_parts();
    let body = match serde_json::to_vec(&problem) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Failed to serialize problem document");
            Vec::new()
        }
    };

    parts.status = StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
    Response::from_parts(parts, Body::from(body))
}

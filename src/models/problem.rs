use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::FieldErrors;

/// Media type of RFC 7807 problem documents.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// RFC 7807 problem document returned for every failed request.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    pub status: u16,
    pub title: String,
    pub detail: String,
    /// Request path that produced the failure
    pub instance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, axum::Json(self)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_response_uses_problem_media_type() {
        let response = ProblemDetails {
            status: 404,
            title: "Not Found".to_string(),
            detail: "Resource not found: /nope".to_string(),
            instance: "/nope".to_string(),
            errors: None,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
    }

    #[test]
    fn test_errors_omitted_when_absent() {
        let problem = ProblemDetails {
            status: 500,
            title: "An unexpected error occurred.".to_string(),
            detail: "Please contact support.".to_string(),
            instance: "/api/v1/currency/latest".to_string(),
            errors: None,
        };

        let json = serde_json::to_value(&problem).unwrap();
        assert!(json.get("errors").is_none());
        assert_eq!(json["instance"], "/api/v1/currency/latest");
    }
}

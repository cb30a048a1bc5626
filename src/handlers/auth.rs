//! Token issuance.
//!
//! # Endpoints
//!
//! - `POST /api/v1/auth/token` - Exchange username/password for a bearer token

use axum::Json;
use axum::extract::{FromRequest, Request, State};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::error::AppError;
use crate::metrics;
use crate::models::{TokenRequest, TokenResponse};
use crate::state::AppState;
use crate::validation::INVALID_INPUT;

/// Issue a bearer token for valid credentials.
///
/// # Request Body
///
/// ```json
/// { "username": "user", "password": "123" }
/// ```
///
/// # Response Body
///
/// ```json
/// { "token": "eyJhbGciOiJIUzI1NiIs..." }
/// ```
///
/// Wrong credentials give 401; repeated failures from one IP give 429.
pub async fn issue_token(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<TokenResponse>, Response> {
    let client_ip = state.auth_failures.client_ip(&request);

    let Json(login) = Json::<TokenRequest>::from_request(request, &state)
        .await
        .map_err(|rejection| {
            AppError::validation(INVALID_INPUT, "body", rejection.body_text()).into_response()
        })?;

    let Some(role) = state.users.authenticate(&login.username, &login.password) else {
        metrics::record_auth_failure("invalid_credentials");
        warn!(client_ip = %client_ip, username = %login.username, "Invalid login attempt");
        return Err(state.auth_failures.reject(
            &client_ip,
            AppError::Unauthenticated("Invalid username or password".to_string()),
        ));
    };

    let token = state
        .jwt
        .issue(&login.username, role)
        .map_err(IntoResponse::into_response)?;
    info!(username = %login.username, %role, "Issued bearer token");

    Ok(Json(TokenResponse { token }))
}

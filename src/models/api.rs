use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Credentials exchanged for a bearer token.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

/// Issued bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Query for `GET /currency/latest`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestRatesQuery {
    pub base_currency: String,
}

/// Query for `GET /currency/convert`.
#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
}

/// Query for the v2 convert endpoint.
///
/// `date` is accepted for forward compatibility and does not change the
/// conversion, which always uses the latest rate.
#[derive(Debug, Deserialize)]
pub struct ConvertV2Query {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Query for `GET /currency/history`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub base_currency: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Upstream circuit breaker state (closed, half-open, open)
    pub upstream_circuit: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

//! Exchange-rate handlers.
//!
//! # Endpoints
//!
//! - `GET /api/v1/currency/latest?baseCurrency=` - Latest rates (User, Admin)
//! - `GET /api/v1/currency/convert?from=&to=&amount=` - Convert an amount (User, Admin)
//! - `GET /api/v1/currency/history?baseCurrency=&start=&end=` - Daily rates (Admin)
//! - `GET /api/v2/currency/convert?from=&to=&amount=&date=` - Convert, date accepted (User, Admin)
//!
//! Role checks happen in the auth layer before these run. Blocked currencies
//! are rejected with 400 before any upstream call and stripped from results.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::models::{
    ConversionResult, ConvertQuery, ConvertV2Query, ExchangeRate, HistoryQuery, LatestRatesQuery,
};
use crate::state::AppState;
use crate::validation::INVALID_INPUT;

/// Unwrap a query string, reporting a malformed one as a validation failure.
fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(q)| q)
        .map_err(|rejection| AppError::validation(INVALID_INPUT, "query", rejection.body_text()))
}

/// Latest rates for a base currency.
///
/// # Response Body
///
/// ```json
/// {
///   "baseCurrency": "EUR",
///   "date": "2024-01-15",
///   "rates": { "GBP": "0.86", "USD": "1.09" }
/// }
/// ```
#[instrument(skip(state, query))]
pub async fn latest_rates(
    State(state): State<AppState>,
    query: Result<Query<LatestRatesQuery>, QueryRejection>,
) -> AppResult<Json<ExchangeRate>> {
    let query = parse_query(query)?;
    let rates = state.currency.latest(&query.base_currency).await?;
    Ok(Json(rates))
}

/// Convert an amount at the latest rate.
///
/// # Response Body
///
/// ```json
/// {
///   "fromCurrency": "USD",
///   "toCurrency": "EUR",
///   "originalAmount": "100",
///   "convertedAmount": "85.00",
///   "rate": "0.85"
/// }
/// ```
#[instrument(skip(state, query))]
pub async fn convert(
    State(state): State<AppState>,
    query: Result<Query<ConvertQuery>, QueryRejection>,
) -> AppResult<Json<ConversionResult>> {
    let query = parse_query(query)?;
    let result = state
        .currency
        .convert(&query.from, &query.to, query.amount)
        .await?;
    Ok(Json(result))
}

/// Daily rates between two dates, inclusive, oldest first.
#[instrument(skip(state, query))]
pub async fn historical_rates(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> AppResult<Json<Vec<ExchangeRate>>> {
    let query = parse_query(query)?;
    let series = state
        .currency
        .history(&query.base_currency, query.start, query.end)
        .await?;
    Ok(Json(series))
}

/// Version 2 conversion.
///
/// Accepts an optional `date` that does not change the result; conversion
/// always uses the latest rate.
#[instrument(skip(state, query))]
pub async fn convert_v2(
    State(state): State<AppState>,
    query: Result<Query<ConvertV2Query>, QueryRejection>,
) -> AppResult<Json<ConversionResult>> {
    let query = parse_query(query)?;
    if let Some(date) = query.date {
        debug!(%date, "Ignoring requested date, converting at latest rate");
    }

    let result = state
        .currency
        .convert(&query.from, &query.to, query.amount)
        .await?;
    Ok(Json(result))
}

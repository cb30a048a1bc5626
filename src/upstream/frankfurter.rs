//! Traced HTTP client for the Frankfurter exchange-rate API.
//!
//! Every operation runs inside its own span named after the operation, with
//! OpenTelemetry-style fields (`otel.kind`, `otel.status_code`,
//! `otel.status_description`) so a tracing-to-OTel bridge picks them up
//! unchanged. Attempts are retried and circuit-broken by the shared
//! [`ResiliencePipeline`].

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::field::Empty;
use tracing::{Instrument, Span, debug, error, info, info_span};

use super::ExchangeRateProvider;
use super::payloads::{LatestPayload, RangePayload};
use crate::config::Config;
use crate::error::{AppError, AppResult, UpstreamError};
use crate::models::{ConversionResult, ExchangeRate};
use crate::resilience::ResiliencePipeline;

/// Frankfurter API client.
#[derive(Clone)]
pub struct FrankfurterClient {
    http: reqwest::Client,
    base_url: String,
    resilience: ResiliencePipeline,
}

impl FrankfurterClient {
    /// Create a client for `base_url` with a per-request `timeout`.
    pub fn new(
        base_url: &str,
        timeout: std::time::Duration,
        resilience: ResiliencePipeline,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            resilience,
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            &config.upstream_base_url,
            config.upstream_timeout,
            ResiliencePipeline::from_config(config),
        )
    }

    pub fn resilience(&self) -> &ResiliencePipeline {
        &self.resilience
    }

    /// One upstream attempt: GET, check status, decode.
    ///
    /// A JSON `null` body decodes to `None`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, UpstreamError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "Calling exchange-rate provider");

        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        let decoded = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::InvalidPayload(e.to_string()));
        match &decoded {
            Ok(_) => debug!(%url, bytes = body.len(), "Exchange-rate provider responded"),
            Err(e) => debug!(%url, error = %e, "Undecodable provider response"),
        }
        decoded
    }
}

/// Record the outcome of an operation on its span.
fn finish<T>(span: &Span, result: Result<T, UpstreamError>, what: &str) -> Result<T, UpstreamError> {
    match &result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(e) => {
            span.record("otel.status_code", "ERROR");
            span.record("otel.status_description", tracing::field::display(e));
            error!(parent: span, error = %e, kind = ?e.kind(), "Failed to {}", what);
        }
    }
    result
}

#[async_trait::async_trait]
impl ExchangeRateProvider for FrankfurterClient {
    async fn latest_rates(&self, base: &str) -> Result<ExchangeRate, UpstreamError> {
        let span = info_span!(
            "get_latest_rates",
            otel.kind = "internal",
            currency.base = %base,
            otel.status_code = Empty,
            otel.status_description = Empty,
        );

        let result = self
            .resilience
            .execute("latest", move || async move {
                self.get_json::<LatestPayload>("latest", &[("base", base)])
                    .await?
                    .map(ExchangeRate::from)
                    .ok_or(UpstreamError::NullPayload)
            })
            .instrument(span.clone())
            .await;

        if let Ok(rates) = &result {
            info!(parent: &span, base, count = rates.rates.len(), "Successfully retrieved exchange rates");
        }
        finish(&span, result, "retrieve exchange rates")
    }

    async fn convert(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<ConversionResult, UpstreamError> {
        let span = info_span!(
            "convert_currency",
            otel.kind = "internal",
            currency.from = %from,
            currency.to = %to,
            currency.amount = %amount,
            otel.status_code = Empty,
            otel.status_description = Empty,
        );

        let result = self
            .resilience
            .execute("convert", move || async move {
                let payload = self
                    .get_json::<LatestPayload>("latest", &[("from", from), ("to", to)])
                    .await?
                    .ok_or(UpstreamError::NullPayload)?;
                payload
                    .rates
                    .get(to)
                    .copied()
                    .ok_or_else(|| UpstreamError::MissingRate(to.to_string()))
            })
            .instrument(span.clone())
            .await
            .and_then(|rate| ConversionResult::new(from, to, amount, rate));

        if let Ok(conversion) = &result {
            info!(
                parent: &span,
                %amount,
                from,
                to,
                rate = %conversion.rate,
                "Conversion successful"
            );
        }
        finish(&span, result, "convert currency")
    }

    async fn historical_rates(
        &self,
        base: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExchangeRate>, UpstreamError> {
        let span = info_span!(
            "get_historical_rates",
            otel.kind = "internal",
            currency.base = %base,
            date.start = %start,
            date.end = %end,
            otel.status_code = Empty,
            otel.status_description = Empty,
        );
        let range = format!("{}..{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"));
        let path = range.as_str();

        let result = self
            .resilience
            .execute("history", move || async move {
                self.get_json::<RangePayload>(path, &[("base", base)])
                    .await?
                    .and_then(RangePayload::into_series)
                    .ok_or(UpstreamError::NullPayload)
            })
            .instrument(span.clone())
            .await;

        if let Ok(series) = &result {
            info!(
                parent: &span,
                base,
                %start,
                %end,
                days = series.len(),
                "Successfully fetched historical rates"
            );
        }
        finish(&span, result, "fetch historical rates")
    }
}

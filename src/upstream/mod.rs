//! Exchange-rate provider port and its HTTP adapter.
//!
//! Handlers and services depend on [`ExchangeRateProvider`] only; the
//! production implementation is [`FrankfurterClient`], which wraps every call
//! in the shared [`crate::resilience::ResiliencePipeline`].

mod frankfurter;
mod payloads;

pub use frankfurter::FrankfurterClient;
pub use payloads::{LatestPayload, RangePayload};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::UpstreamError;
use crate::models::{ConversionResult, ExchangeRate};

/// Port trait for exchange-rate providers.
///
/// Currency codes passed in are already validated and upper-cased.
#[async_trait::async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Latest rates quoted against `base`.
    async fn latest_rates(&self, base: &str) -> Result<ExchangeRate, UpstreamError>;

    /// Convert `amount` of `from` into `to` at the latest rate.
    async fn convert(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<ConversionResult, UpstreamError>;

    /// Daily rates for `base` between `start` and `end` inclusive, ordered by date.
    async fn historical_rates(
        &self,
        base: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExchangeRate>, UpstreamError>;
}

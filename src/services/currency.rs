use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::models::{ConversionResult, ExchangeRate};
use crate::upstream::ExchangeRateProvider;
use crate::validation::{validate_amount, validate_currency_code, validate_date_range};

/// Message of every blocked-currency rejection.
pub const BLOCKED_CURRENCY_MESSAGE: &str = "Conversion with blocked currencies is not allowed.";

/// Field the blocked-currency error is reported under.
pub const BLOCKED_CURRENCY_FIELD: &str = "Currency";

/// Codes that may never be requested or returned, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    codes: HashSet<String>,
}

impl Blocklist {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(&code.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Currency operations exposed over HTTP.
///
/// Validates and normalizes input, enforces the blocklist before any upstream
/// call, and strips blocked codes from everything the provider returns.
#[derive(Clone)]
pub struct CurrencyService {
    provider: Arc<dyn ExchangeRateProvider>,
    blocklist: Arc<Blocklist>,
}

impl CurrencyService {
    pub fn new(provider: Arc<dyn ExchangeRateProvider>, blocklist: Blocklist) -> Self {
        Self {
            provider,
            blocklist: Arc::new(blocklist),
        }
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    fn reject_blocked(&self, field_message: &str, codes: &[&str]) -> AppResult<()> {
        if let Some(blocked) = codes.iter().find(|c| self.blocklist.contains(c)) {
            warn!(currency = %blocked, "Rejected request for blocked currency");
            return Err(AppError::validation(
                BLOCKED_CURRENCY_MESSAGE,
                BLOCKED_CURRENCY_FIELD,
                field_message,
            ));
        }
        Ok(())
    }

    fn strip_blocked(&self, rates: ExchangeRate) -> ExchangeRate {
        rates.without(|code| self.blocklist.contains(code))
    }

    /// Latest rates for `base`, with blocked codes removed.
    #[instrument(skip(self))]
    pub async fn latest(&self, base: &str) -> AppResult<ExchangeRate> {
        let base = validate_currency_code(base, "baseCurrency")?;
        self.reject_blocked("Base currency is blocked.", &[base.as_str()])?;

        let rates = self.provider.latest_rates(&base).await?;
        Ok(self.strip_blocked(rates))
    }

    /// Convert `amount` of `from` into `to`.
    #[instrument(skip(self))]
    pub async fn convert(&self, from: &str, to: &str, amount: Decimal) -> AppResult<ConversionResult> {
        let from = validate_currency_code(from, "from")?;
        let to = validate_currency_code(to, "to")?;
        validate_amount(amount)?;
        self.reject_blocked("One or both currencies are blocked.", &[from.as_str(), to.as_str()])?;

        Ok(self.provider.convert(&from, &to, amount).await?)
    }

    /// Daily rates for `base` over `[start, end]`, with blocked codes removed.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        base: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<ExchangeRate>> {
        let base = validate_currency_code(base, "baseCurrency")?;
        validate_date_range(start, end)?;
        self.reject_blocked("Base currency is blocked.", &[base.as_str()])?;

        let series = self.provider.historical_rates(&base, start, end).await?;
        debug!(days = series.len(), "Historical series received");
        Ok(series
            .into_iter()
            .map(|rates| self.strip_blocked(rates))
            .collect())
    }
}

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Exchange rates for one base currency on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    /// ISO 4217 code the rates are quoted against
    pub base_currency: String,
    /// Publication date of the rates
    pub date: NaiveDate,
    /// Currency code → units of that currency per one unit of base
    pub rates: BTreeMap<String, Decimal>,
}

impl ExchangeRate {
    /// Drop every rate whose code matches `is_blocked`.
    pub fn without(mut self, is_blocked: impl Fn(&str) -> bool) -> Self {
        self.rates.retain(|code, _| !is_blocked(code));
        self
    }
}

/// Result of converting an amount between two currencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub from_currency: String,
    pub to_currency: String,
    pub original_amount: Decimal,
    pub converted_amount: Decimal,
    pub rate: Decimal,
}

impl ConversionResult {
    /// Build a result, deriving `converted_amount = amount × rate`.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::ConversionOverflow`] when the product does not fit in
    /// a `Decimal`.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: Decimal,
        rate: Decimal,
    ) -> Result<Self, UpstreamError> {
        let converted_amount = amount
            .checked_mul(rate)
            .ok_or(UpstreamError::ConversionOverflow { amount, rate })?;
        Ok(Self {
            from_currency: from.into(),
            to_currency: to.into(),
            original_amount: amount,
            converted_amount,
            rate,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_conversion_multiplies_amount_by_rate() {
        let result = ConversionResult::new("USD", "EUR", dec("100"), dec("0.85")).unwrap();
        assert_eq!(result.converted_amount, dec("85.00"));
        assert_eq!(result.original_amount, dec("100"));
    }

    #[test]
    fn test_conversion_overflow_is_an_error() {
        let err = ConversionResult::new("USD", "JPY", Decimal::MAX, dec("148.2")).unwrap_err();

        assert_eq!(
            err,
            UpstreamError::ConversionOverflow {
                amount: Decimal::MAX,
                rate: dec("148.2"),
            }
        );
        assert_eq!(err.kind(), crate::error::ErrorKind::Domain);
    }

    #[test]
    fn test_without_removes_blocked_codes() {
        let rate = ExchangeRate {
            base_currency: "USD".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            rates: BTreeMap::from([
                ("EUR".to_string(), dec("0.91")),
                ("TRY".to_string(), dec("30.1")),
            ]),
        };

        let filtered = rate.without(|code| code == "TRY");
        assert!(filtered.rates.contains_key("EUR"));
        assert!(!filtered.rates.contains_key("TRY"));
    }

    #[test]
    fn test_exchange_rate_serializes_camel_case() {
        let rate = ExchangeRate {
            base_currency: "USD".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            rates: BTreeMap::new(),
        };

        let json = serde_json::to_value(&rate).expect("Serialization should succeed");
        assert_eq!(json["baseCurrency"], "USD");
        assert_eq!(json["date"], "2024-01-02");
    }
}

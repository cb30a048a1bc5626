use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Length of an ISO 4217 alphabetic currency code.
pub const CURRENCY_CODE_LENGTH: usize = 3;

/// Largest amount accepted for conversion.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Top-level message of every input validation failure.
pub const INVALID_INPUT: &str = "One or more validation errors occurred.";

/// Validate a currency code and return it upper-cased.
///
/// Rules:
/// - Exactly 3 characters after trimming surrounding whitespace
/// - ASCII letters only, any case
pub fn validate_currency_code(code: &str, field: &str) -> AppResult<String> {
    let code = code.trim();

    if code.is_empty() {
        return Err(AppError::validation(
            INVALID_INPUT,
            field,
            format!("{field} is required"),
        ));
    }

    if code.len() != CURRENCY_CODE_LENGTH {
        return Err(AppError::validation(
            INVALID_INPUT,
            field,
            format!("{field} must be a {CURRENCY_CODE_LENGTH}-letter ISO 4217 code"),
        ));
    }

    if let Some(pos) = code.chars().position(|c| !c.is_ascii_alphabetic()) {
        return Err(AppError::validation(
            INVALID_INPUT,
            field,
            format!("{field} contains invalid character at position {pos}"),
        ));
    }

    Ok(code.to_ascii_uppercase())
}

/// Validate an amount to convert. Must be strictly positive and at most
/// [`MAX_AMOUNT`].
pub fn validate_amount(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::validation(
            INVALID_INPUT,
            "amount",
            "amount must be greater than zero",
        ));
    }
    if amount > Decimal::from(MAX_AMOUNT) {
        return Err(AppError::validation(
            INVALID_INPUT,
            "amount",
            format!("amount must not exceed {MAX_AMOUNT}"),
        ));
    }
    Ok(())
}

/// Validate a historical date range. `start` may equal `end`.
pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> AppResult<()> {
    if start > end {
        return Err(AppError::validation(
            INVALID_INPUT,
            "start",
            format!("start ({start}) must not be after end ({end})"),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::str::FromStr;

    fn field_message(err: AppError, field: &str) -> String {
        match err {
            AppError::Validation { errors, .. } => errors[field][0].clone(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_codes_are_upper_cased() {
        assert_eq!(validate_currency_code("usd", "from").unwrap(), "USD");
        assert_eq!(validate_currency_code("Eur", "to").unwrap(), "EUR");
        assert_eq!(validate_currency_code(" GBP ", "to").unwrap(), "GBP");
    }

    #[test]
    fn test_empty_code() {
        let err = validate_currency_code("", "baseCurrency").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(field_message(err, "baseCurrency").contains("is required"));
    }

    #[test]
    fn test_code_wrong_length() {
        let err = validate_currency_code("EURO", "to").unwrap_err();
        assert!(field_message(err, "to").contains("3-letter"));
    }

    #[test]
    fn test_code_invalid_characters() {
        let err = validate_currency_code("U$D", "from").unwrap_err();
        assert!(field_message(err, "from").contains("position 1"));

        // Multi-byte input must not be mistaken for a 3-letter code
        assert!(validate_currency_code("ÄB", "from").is_err());
    }

    #[test]
    fn test_amount_must_be_positive() {
        assert!(validate_amount(Decimal::from_str("0.01").unwrap()).is_ok());
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(Decimal::from_str("-5").unwrap()).is_err());
    }

    #[test]
    fn test_amount_upper_bound() {
        assert!(validate_amount(Decimal::from(MAX_AMOUNT)).is_ok());

        let err = validate_amount(Decimal::from(MAX_AMOUNT) + Decimal::ONE).unwrap_err();
        assert!(field_message(err, "amount").contains("must not exceed"));
        assert!(validate_amount(Decimal::MAX).is_err());
    }

    #[test]
    fn test_date_range() {
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

        assert!(validate_date_range(jan1, jan5).is_ok());
        assert!(validate_date_range(jan1, jan1).is_ok());

        let err = validate_date_range(jan5, jan1).unwrap_err();
        assert!(field_message(err, "start").contains("must not be after"));
    }
}

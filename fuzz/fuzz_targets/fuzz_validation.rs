//! Fuzz testing for request validation.
//!
//! Ensures the validators never panic on arbitrary input and that every
//! accepted currency code is exactly three upper-case ASCII letters.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use currency_gateway::validation::{validate_amount, validate_currency_code};
use libfuzzer_sys::fuzz_target;
use rust_decimal::Decimal;
use std::str::FromStr;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(code) = validate_currency_code(s, "from") {
            assert_eq!(code.len(), 3);
            assert!(code.chars().all(|c| c.is_ascii_uppercase()));
        }

        if let Ok(amount) = Decimal::from_str(s)
            && validate_amount(amount).is_ok()
        {
            // Any accepted amount converts at realistic rates without overflow
            assert!(amount.checked_mul(Decimal::from(1_000_000)).is_some());
        }
    }
});

mod currency;

pub use currency::{BLOCKED_CURRENCY_FIELD, BLOCKED_CURRENCY_MESSAGE, Blocklist, CurrencyService};

mod auth;
mod currency;
mod health;

pub use auth::issue_token;
pub use currency::{convert, convert_v2, historical_rates, latest_rates};
pub use health::health_check;

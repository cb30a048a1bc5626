mod api;
mod problem;
mod rates;

pub use api::{
    ConvertQuery, ConvertV2Query, HealthResponse, HistoryQuery, LatestRatesQuery, TokenRequest,
    TokenResponse,
};
pub use problem::{PROBLEM_JSON, ProblemDetails};
pub use rates::{ConversionResult, ExchangeRate};

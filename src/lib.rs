//! # Currency Gateway
//!
//! An HTTP gateway in front of the Frankfurter exchange-rate API, featuring:
//!
//! - **Resilience**: Retry with exponential backoff inside a circuit breaker
//! - **Admission control**: Global fixed-window rate limiting with a wait queue
//! - **Security**: JWT bearer tokens with role-based route policies
//! - **Observability**: Access log, request IDs, problem+json errors, metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Rate Limit → Access Log → Problem → Auth)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (auth, currency, health)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CurrencyService (validation, blocklist)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FrankfurterClient ── ResiliencePipeline (breaker ∘ retry)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  api.frankfurter.app                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use currency_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state)?;
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Getting a Token
//!
//! ```bash
//! curl -X POST localhost:3000/api/v1/auth/token \
//!     -H 'Content-Type: application/json' \
//!     -d '{"username":"admin","password":"123"}'
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod resilience;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod upstream;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
pub use upstream::{ExchangeRateProvider, FrankfurterClient};

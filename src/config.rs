//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: Symmetric key used to sign and verify bearer tokens
//! - `JWT_ISSUER` / `JWT_AUDIENCE`: Expected `iss` / `aud` claims
//! - `BLOCKED_CURRENCIES`: Comma-separated currency codes that are never served
//! - `TRUSTED_PROXIES`: Comma-separated CIDR ranges whose `X-Forwarded-For` /
//!   `X-Real-IP` headers are believed (default: none, the TCP peer is the client)
//!
//! # Resilience Tuning
//!
//! - `RETRY_MAX_ATTEMPTS`: Total upstream attempts per call (default: 5)
//! - `RETRY_BASE_DELAY_MS`: Backoff unit; attempt k waits `unit * 2^k` (default: 1000)
//! - `CIRCUIT_BREAKER_FAILURE_THRESHOLD`: Consecutive failures before opening (default: 3)
//! - `CIRCUIT_BREAKER_OPEN_DURATION_SECS`: Cooldown while open (default: 30)
//!
//! # Observability
//!
//! - `RUST_LOG`: Log filter directive (default: info)
//! - `LOG_FORMAT`: `json` for JSON lines on stdout
//! - `LOG_DIR`: Directory for daily rolling JSON log files (default: unset, no file)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP/gRPC collector for spans (default: unset, no export)
//! - `METRICS_PORT`: Prometheus exporter port (default: 0 = disabled)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_PERMITS`: Requests accepted per window (default: 5, 0 = disabled)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length (default: 10)
//! - `RATE_LIMIT_QUEUE`: Requests allowed to wait for the next window (default: 2)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Deployment environment. Controls how much diagnostic detail error
/// responses expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{other}', expected 'development' or 'production'"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment environment (default: production)
    pub environment: Environment,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL of the Frankfurter-compatible exchange-rate API
    pub upstream_base_url: String,

    /// Per-request timeout for upstream calls (default: 10 seconds)
    pub upstream_timeout: Duration,

    // =========================================================================
    // Resilience Configuration
    // =========================================================================
    /// Total attempts per upstream call, including the first (default: 5)
    pub retry_max_attempts: u32,

    /// Backoff unit. After attempt k fails the pipeline waits `unit * 2^k`.
    pub retry_base_delay: Duration,

    /// Number of consecutive failures before opening the circuit (default: 3)
    pub circuit_breaker_failure_threshold: u32,

    /// How long the circuit stays open before a trial call (default: 30s)
    pub circuit_breaker_open_duration: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests accepted per window (default: 5). Set to 0 to disable.
    pub rate_limit_permits: u32,

    /// Fixed window length (default: 10s)
    pub rate_limit_window: Duration,

    /// Requests allowed to queue for the next window (default: 2)
    pub rate_limit_queue: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared secret for HS256 token signatures
    pub jwt_secret: String,

    /// Expected token issuer
    pub jwt_issuer: String,

    /// Expected token audience
    pub jwt_audience: String,

    /// Lifetime of issued tokens (default: 1 hour)
    pub jwt_ttl: Duration,

    /// Currency codes that are never accepted nor returned (upper-cased)
    pub blocked_currencies: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    /// Forwarding headers are only believed when the connection comes from
    /// one of these networks. Empty means the peer address is always used.
    pub trusted_proxies: Vec<String>,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,

    /// Directory for daily rolling log files, `None` to log to stdout only
    pub log_dir: Option<String>,

    /// OTLP/gRPC endpoint spans are exported to, `None` to disable export
    pub otlp_endpoint: Option<String>,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            environment: Self::parse_env("APP_ENV", defaults.environment)?,

            // Upstream
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upstream_base_url),
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 10)?),

            // Resilience
            retry_max_attempts: Self::parse_env("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_base_delay: Duration::from_millis(Self::parse_env("RETRY_BASE_DELAY_MS", 1000)?),
            circuit_breaker_failure_threshold: Self::parse_env(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                defaults.circuit_breaker_failure_threshold,
            )?,
            circuit_breaker_open_duration: Duration::from_secs(Self::parse_env(
                "CIRCUIT_BREAKER_OPEN_DURATION_SECS",
                30,
            )?),

            // Rate limiting
            rate_limit_permits: Self::parse_env("RATE_LIMIT_PERMITS", defaults.rate_limit_permits)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 10)?),
            rate_limit_queue: Self::parse_env("RATE_LIMIT_QUEUE", defaults.rate_limit_queue)?,

            // Security
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience),
            jwt_ttl: Duration::from_secs(Self::parse_env("JWT_TTL_SECS", 3600)?),
            blocked_currencies: env::var("BLOCKED_CURRENCIES")
                .map(|raw| Self::parse_list(&raw, |s| s.to_ascii_uppercase()))
                .unwrap_or(defaults.blocked_currencies),
            trusted_proxies: env::var("TRUSTED_PROXIES")
                .map(|raw| Self::parse_list(&raw, str::to_string))
                .unwrap_or(defaults.trusted_proxies),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| Self::parse_list(&raw, str::to_string))
                .unwrap_or(defaults.cors_allowed_origins),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            log_dir: Self::optional_env("LOG_DIR"),
            otlp_endpoint: Self::optional_env("OTEL_EXPORTER_OTLP_ENDPOINT"),
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.retry_max_attempts == 0 {
            return Err(AppError::ConfigError(
                "RETRY_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker_failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD must be greater than 0".to_string(),
            ));
        }

        if self.rate_limiting_enabled() && self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.jwt_secret.len() < 16 {
            return Err(AppError::ConfigError(
                "JWT_SECRET must be at least 16 bytes".to_string(),
            ));
        }

        if !self.upstream_base_url.starts_with("http://")
            && !self.upstream_base_url.starts_with("https://")
        {
            return Err(AppError::ConfigError(format!(
                "UPSTREAM_BASE_URL must be an http(s) URL, got '{}'",
                self.upstream_base_url
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_permits > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Non-empty value of an environment variable.
    fn optional_env(name: &str) -> Option<String> {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Split a comma-separated list, trimming entries and dropping empty ones.
    fn parse_list(raw: &str, normalize: impl Fn(&str) -> String) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(normalize)
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Production,
            // Upstream
            upstream_base_url: "https://api.frankfurter.app".to_string(),
            upstream_timeout: Duration::from_secs(10),
            // Resilience
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_open_duration: Duration::from_secs(30),
            // Rate limiting
            rate_limit_permits: 5,
            rate_limit_window: Duration::from_secs(10),
            rate_limit_queue: 2,
            // Security
            jwt_secret: "super_secret_jwt_key_change_me!!".to_string(),
            jwt_issuer: "currency-api".to_string(),
            jwt_audience: "currency-clients".to_string(),
            jwt_ttl: Duration::from_secs(3600),
            blocked_currencies: ["TRY", "PLN", "THB", "MXN"]
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            trusted_proxies: Vec::new(),
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_json: false,
            log_dir: None,
            otlp_endpoint: None,
            metrics_port: 0,
        }
    }
}

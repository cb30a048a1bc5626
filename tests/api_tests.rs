//! End-to-end tests of the HTTP surface against an in-process provider.
//!
//! Requests go through the full router (rate limiter, access log, exception
//! mapper, auth gate) with `tower::ServiceExt::oneshot`; no sockets involved.
//!
//! Run with: `cargo test --test api_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, Response, StatusCode, header};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

use currency_gateway::config::Environment;
use currency_gateway::error::UpstreamError;
use currency_gateway::models::{ConversionResult, ExchangeRate, PROBLEM_JSON};
use currency_gateway::resilience::ResiliencePipeline;
use currency_gateway::{AppState, Config, ExchangeRateProvider, build_router};

// =============================================================================
// Test Provider
// =============================================================================

/// Provider double: fixed USD/EUR rates, optional failure, call counting.
struct FakeProvider {
    calls: AtomicUsize,
    fail_with: Option<UpstreamError>,
}

impl FakeProvider {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
        })
    }

    fn failing(error: UpstreamError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(error),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn rates(base: &str, date: NaiveDate) -> ExchangeRate {
        ExchangeRate {
            base_currency: base.to_string(),
            date,
            rates: BTreeMap::from([
                ("EUR".to_string(), Decimal::from_str("0.85").unwrap()),
                ("GBP".to_string(), Decimal::from_str("0.79").unwrap()),
                ("TRY".to_string(), Decimal::from_str("32.10").unwrap()),
                ("MXN".to_string(), Decimal::from_str("17.05").unwrap()),
            ]),
        }
    }
}

#[async_trait::async_trait]
impl ExchangeRateProvider for FakeProvider {
    async fn latest_rates(&self, base: &str) -> Result<ExchangeRate, UpstreamError> {
        self.enter()?;
        Ok(Self::rates(base, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
    }

    async fn convert(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<ConversionResult, UpstreamError> {
        self.enter()?;
        let rate = Self::rates(from, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .rates
            .get(to)
            .copied()
            .ok_or_else(|| UpstreamError::MissingRate(to.to_string()))?;
        ConversionResult::new(from, to, amount, rate)
    }

    async fn historical_rates(
        &self,
        base: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExchangeRate>, UpstreamError> {
        self.enter()?;
        Ok(start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| Self::rates(base, d))
            .collect())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> Config {
    Config {
        // Most tests send more than one window's worth of requests
        rate_limit_permits: 0,
        ..Config::default()
    }
}

fn app_with(config: Config, provider: Arc<FakeProvider>) -> Router {
    let resilience = ResiliencePipeline::from_config(&config);
    let state = AppState::with_provider(config, provider, resilience);
    build_router(state).unwrap()
}

fn app(provider: Arc<FakeProvider>) -> Router {
    app_with(test_config(), provider)
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// Login attempt arriving over a connection from `peer`.
fn login_request(username: &str, password: &str, peer: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(peer.parse().unwrap(), 40000)));
    request
}

/// Login attempt from `peer` claiming to forward for `client`.
fn forwarded_login(password: &str, peer: &str, client: &str) -> Request<Body> {
    let mut request = login_request("admin", password, peer);
    request
        .headers_mut()
        .insert("x-forwarded-for", client.parse().unwrap());
    request
}

async fn login(app: &Router, username: &str) -> String {
    let response = send(app, login_request(username, "123", "198.51.100.1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}

fn assert_problem(response: &Response<Body>, status: StatusCode) {
    assert_eq!(response.status(), status);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        PROBLEM_JSON
    );
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_is_anonymous() {
    let app = app(FakeProvider::healthy());

    let response = send(&app, get("/health", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["upstream_circuit"], "closed");
}

#[tokio::test]
async fn test_request_id_is_generated_and_echoed() {
    let app = app(FakeProvider::healthy());

    let generated = send(&app, get("/health", None)).await;
    assert!(generated.headers().get("x-request-id").is_some());

    let mut request = get("/health", None);
    request
        .headers_mut()
        .insert("x-request-id", "my-correlation-id".parse().unwrap());
    let echoed = send(&app, request).await;
    assert_eq!(
        echoed.headers().get("x-request-id").unwrap(),
        "my-correlation-id"
    );
}

// =============================================================================
// Token Issuance
// =============================================================================

#[tokio::test]
async fn test_login_issues_token_for_each_role() {
    let app = app(FakeProvider::healthy());

    let admin = login(&app, "admin").await;
    let user = login(&app, "user").await;

    assert_eq!(admin.split('.').count(), 3);
    assert_ne!(admin, user);
}

#[tokio::test]
async fn test_bad_credentials_are_unauthorized() {
    let app = app(FakeProvider::healthy());

    let response = send(&app, login_request("admin", "wrong", "198.51.100.2")).await;

    assert_problem(&response, StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["title"], "Unauthorized");
    assert_eq!(body["instance"], "/api/v1/auth/token");
}

#[tokio::test]
async fn test_repeated_bad_logins_are_throttled_per_ip() {
    let app = app(FakeProvider::healthy());

    let mut last = StatusCode::OK;
    for _ in 0..6 {
        last = send(&app, login_request("admin", "guess", "198.51.100.3"))
            .await
            .status();
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);

    // A different client is unaffected
    let other = send(&app, login_request("admin", "guess", "198.51.100.4")).await;
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_spoofed_forwarded_for_does_not_evade_throttling() {
    let app = app(FakeProvider::healthy());

    let mut statuses = Vec::new();
    for i in 0..20 {
        let request = forwarded_login("guess", "198.51.100.5", &format!("203.0.113.{i}"));
        statuses.push(send(&app, request).await.status());
    }

    assert!(statuses.iter().take(5).all(|s| *s == StatusCode::UNAUTHORIZED));
    assert!(statuses.iter().skip(5).all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn test_trusted_proxy_forwards_distinct_clients() {
    let config = Config {
        trusted_proxies: vec!["10.0.0.0/8".to_string()],
        ..test_config()
    };
    let app = app_with(config, FakeProvider::healthy());

    for i in 0..10 {
        let request = forwarded_login("guess", "10.1.2.3", &format!("203.0.113.{i}"));
        assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
    }

    let mut last = StatusCode::OK;
    for _ in 0..6 {
        last = send(&app, forwarded_login("guess", "10.1.2.3", "203.0.113.200"))
            .await
            .status();
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_malformed_login_body_is_validation_error() {
    let app = app(FakeProvider::healthy());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"username\":"))
        .unwrap();

    let response = send(&app, request).await;

    assert_problem(&response, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["title"], "Validation Failed");
}

// =============================================================================
// Auth Gate
// =============================================================================

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let provider = FakeProvider::healthy();
    let app = app(provider.clone());

    let response = send(&app, get("/api/v1/currency/latest?baseCurrency=USD", None)).await;

    assert_problem(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_garbage_token_is_unauthorized() {
    let app = app(FakeProvider::healthy());

    let response = send(
        &app,
        get("/api/v1/currency/latest?baseCurrency=USD", Some("not-a-jwt")),
    )
    .await;

    assert_problem(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_history_requires_admin() {
    let provider = FakeProvider::healthy();
    let app = app(provider.clone());
    let token = login(&app, "user").await;

    let response = send(
        &app,
        get(
            "/api/v1/currency/history?baseCurrency=USD&start=2024-01-01&end=2024-01-03",
            Some(&token),
        ),
    )
    .await;

    assert_problem(&response, StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["title"], "Forbidden");
    assert_eq!(provider.calls(), 0);
}

// =============================================================================
// Currency Endpoints
// =============================================================================

#[tokio::test]
async fn test_latest_strips_blocked_currencies() {
    let app = app(FakeProvider::healthy());
    let token = login(&app, "user").await;

    let response = send(
        &app,
        get("/api/v1/currency/latest?baseCurrency=usd", Some(&token)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["baseCurrency"], "USD");
    let rates = body["rates"].as_object().unwrap();
    assert!(rates.contains_key("EUR"));
    assert!(!rates.contains_key("TRY"));
    assert!(!rates.contains_key("MXN"));
}

#[tokio::test]
async fn test_convert_returns_converted_amount() {
    let app = app(FakeProvider::healthy());
    let token = login(&app, "user").await;

    let response = send(
        &app,
        get(
            "/api/v1/currency/convert?from=USD&to=EUR&amount=100",
            Some(&token),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["fromCurrency"], "USD");
    assert_eq!(body["toCurrency"], "EUR");
    let converted = Decimal::from_str(body["convertedAmount"].as_str().unwrap()).unwrap();
    assert_eq!(converted, Decimal::from_str("85.00").unwrap());
}

#[tokio::test]
async fn test_blocked_currency_never_reaches_provider() {
    let provider = FakeProvider::healthy();
    let app = app(provider.clone());
    let token = login(&app, "admin").await;

    let response = send(
        &app,
        get(
            "/api/v1/currency/convert?from=USD&to=try&amount=10",
            Some(&token),
        ),
    )
    .await;

    assert_problem(&response, StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["status"], 400);
    assert_eq!(body["title"], "Validation Failed");
    assert_eq!(
        body["detail"],
        "Conversion with blocked currencies is not allowed."
    );
    assert_eq!(
        body["errors"]["Currency"][0],
        "One or both currencies are blocked."
    );
    assert_eq!(body["instance"], "/api/v1/currency/convert");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_v2_convert_accepts_date_and_enforces_blocklist() {
    let provider = FakeProvider::healthy();
    let app = app(provider.clone());
    let token = login(&app, "user").await;

    let ok = send(
        &app,
        get(
            "/api/v2/currency/convert?from=USD&to=GBP&amount=10&date=2020-01-01",
            Some(&token),
        ),
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);

    let blocked = send(
        &app,
        get(
            "/api/v2/currency/convert?from=PLN&to=GBP&amount=10",
            Some(&token),
        ),
    )
    .await;
    assert_problem(&blocked, StatusCode::BAD_REQUEST);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_history_for_admin_is_ordered_by_date() {
    let app = app(FakeProvider::healthy());
    let token = login(&app, "admin").await;

    let response = send(
        &app,
        get(
            "/api/v1/currency/history?baseCurrency=EUR&start=2024-01-01&end=2024-01-03",
            Some(&token),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let days: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["date"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(days, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
    assert!(body[0]["rates"].get("TRY").is_none());
}

#[tokio::test]
async fn test_invalid_inputs_are_validation_errors() {
    let provider = FakeProvider::healthy();
    let app = app(provider.clone());
    let token = login(&app, "admin").await;

    for uri in [
        "/api/v1/currency/latest?baseCurrency=US",
        "/api/v1/currency/latest",
        "/api/v1/currency/convert?from=USD&to=EUR&amount=-5",
        "/api/v1/currency/convert?from=USD&to=EUR&amount=abc",
        "/api/v1/currency/convert?from=USD&to=EUR&amount=1000000000001",
        "/api/v1/currency/convert?from=USD&to=EUR&amount=79228162514264337593543950335",
        "/api/v1/currency/history?baseCurrency=USD&start=2024-02-01&end=2024-01-01",
    ] {
        let response = send(&app, get(uri, Some(&token))).await;
        assert_problem(&response, StatusCode::BAD_REQUEST);
    }
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_unknown_route_is_not_found_problem() {
    let app = app(FakeProvider::healthy());

    let response = send(&app, get("/api/v1/nothing-here", None)).await;

    assert_problem(&response, StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["title"], "Not Found");
    assert_eq!(body["instance"], "/api/v1/nothing-here");
}

// =============================================================================
// Upstream Failures
// =============================================================================

#[tokio::test]
async fn test_upstream_failure_hides_detail_in_production() {
    let app = app(FakeProvider::failing(UpstreamError::MissingRate(
        "EUR".to_string(),
    )));
    let token = login(&app, "user").await;

    let response = send(
        &app,
        get(
            "/api/v1/currency/convert?from=USD&to=EUR&amount=1",
            Some(&token),
        ),
    )
    .await;

    assert_problem(&response, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["title"], "An unexpected error occurred.");
    assert_eq!(body["detail"], "Please contact support.");
}

#[tokio::test]
async fn test_upstream_failure_shows_diagnostic_in_development() {
    let config = Config {
        environment: Environment::Development,
        ..test_config()
    };
    let app = app_with(
        config,
        FakeProvider::failing(UpstreamError::MissingRate("EUR".to_string())),
    );
    let token = login(&app, "user").await;

    let response = send(
        &app,
        get(
            "/api/v1/currency/convert?from=USD&to=EUR&amount=1",
            Some(&token),
        ),
    )
    .await;

    assert_problem(&response, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().unwrap().contains("MissingRate"));
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_beyond_window_and_queue() {
    let config = Config {
        rate_limit_permits: 2,
        rate_limit_queue: 0,
        ..Config::default()
    };
    let app = app_with(config, FakeProvider::healthy());

    for _ in 0..2 {
        let response = send(&app, get("/api/v1/currency/latest?baseCurrency=USD", None)).await;
        // Admitted, then stopped by the auth gate
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(&app, get("/api/v1/currency/latest?baseCurrency=USD", None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get(header::RETRY_AFTER).is_some());
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Too many requests. Please try again later.");

    // Health checks are exempt
    let health = send(&app, get("/health", None)).await;
    assert_eq!(health.status(), StatusCode::OK);
}

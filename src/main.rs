use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};

use currency_gateway::{AppState, Config, build_router, metrics, telemetry, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration first; it decides the log format
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            let guard = telemetry::init(&Config::default());
            error!("Configuration error: {e}");
            if let Ok(guard) = guard {
                guard.shutdown();
            }
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };
    let telemetry = match telemetry::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    info!(
        "Starting Currency Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let exit = match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    };
    telemetry.shutdown();
    exit
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        environment = ?config.environment,
        upstream = %config.upstream_base_url,
        blocked = ?config.blocked_currencies,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Build application state and router
    let state = AppState::new(config.clone()).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health                     - Health check");
    info!("  POST /api/v1/auth/token          - Issue bearer token");
    info!("  GET  /api/v1/currency/latest     - Latest rates (User, Admin)");
    info!("  GET  /api/v1/currency/convert    - Convert amount (User, Admin)");
    info!("  GET  /api/v1/currency/history    - Historical rates (Admin)");
    info!("  GET  /api/v2/currency/convert    - Convert amount, v2 (User, Admin)");

    // Peer addresses feed the access log and auth failure tracking
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

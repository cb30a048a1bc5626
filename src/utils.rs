use tokio::signal;
use tracing::{error, warn};

/// Resolve when the process is asked to stop (Ctrl+C or SIGTERM).
///
/// A signal whose handler cannot be installed is logged and ignored; the
/// other one still triggers shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, draining in-flight requests...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, draining in-flight requests...");
        }
    }
}

//! Tracing subscriber setup.
//!
//! Every process logs to stdout (plain text or JSON lines). Two sinks are
//! optional:
//!
//! - **Rolling file**: `LOG_DIR` set → JSON lines in
//!   `<LOG_DIR>/currency-gateway.log.<YYYY-MM-DD>`, a new file each day,
//!   written off the request path by a non-blocking worker
//! - **OTLP export**: `OTEL_EXPORTER_OTLP_ENDPOINT` set → spans (including the
//!   `otel.*` fields recorded by the upstream client) are batched to a
//!   collector over gRPC
//!
//! [`init`] returns a [`TelemetryGuard`]; call [`TelemetryGuard::shutdown`]
//! before exit so buffered lines and spans are flushed.

use std::path::Path;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{Subscriber, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Service name reported to the trace collector.
pub const SERVICE_NAME: &str = "currency-gateway";

/// File name prefix of the daily log files.
pub const LOG_FILE_PREFIX: &str = "currency-gateway.log";

/// Keeps the optional sinks alive.
#[must_use = "dropping the guard stops the file writer"]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    _file_writer: Option<WorkerGuard>,
}

impl TelemetryGuard {
    /// Flush pending spans to the collector and stop the file writer.
    pub fn shutdown(self) {
        if let Some(provider) = &self.tracer_provider
            && let Err(e) = provider.shutdown()
        {
            warn!(error = %e, "Failed to flush trace exporter");
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// `AppError::ConfigError` if the OTLP exporter cannot be built, or
/// `AppError::Internal` if a global subscriber is already set.
pub fn init(config: &Config) -> AppResult<TelemetryGuard> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout = if config.log_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    let (file, file_writer) = match config.log_dir.as_deref() {
        Some(dir) => {
            let (layer, guard) = file_layer(Path::new(dir));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let tracer_provider = config
        .otlp_endpoint
        .as_deref()
        .map(tracer_provider)
        .transpose()?;
    if let Some(provider) = &tracer_provider {
        global::set_text_map_propagator(TraceContextPropagator::new());
        global::set_tracer_provider(provider.clone());
    }
    let otel = tracer_provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .with(otel)
        .try_init()
        .map_err(|e| AppError::Internal(format!("Failed to install tracing subscriber: {e}")))?;

    Ok(TelemetryGuard {
        tracer_provider,
        _file_writer: file_writer,
    })
}

/// JSON lines into a file under `dir` that rolls over daily.
pub(crate) fn file_layer<S>(dir: &Path) -> (impl Layer<S> + Send + Sync + 'static, WorkerGuard)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer);
    (layer, guard)
}

/// Batch span exporter sending OTLP/gRPC to `endpoint`.
pub(crate) fn tracer_provider(endpoint: &str) -> AppResult<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| AppError::ConfigError(format!("Invalid OTEL_EXPORTER_OTLP_ENDPOINT: {e}")))?;

    Ok(SdkTracerProvider::builder()
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .with_batch_exporter(exporter)
        .build())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tracing::info;

    #[test]
    fn test_file_layer_writes_json_lines() {
        let dir = std::env::temp_dir().join(format!("currency-gateway-{}", uuid::Uuid::new_v4()));
        let (layer, guard) = file_layer(&dir);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            info!(path = "/health", status = 200, "request served");
        });
        // Dropping the guard flushes the background writer
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(LOG_FILE_PREFIX));

        let contents = std::fs::read_to_string(&files[0]).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(line["fields"]["message"], "request served");
        assert_eq!(line["fields"]["status"], 200);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_tracer_provider_builds_for_endpoint() {
        let provider = tracer_provider("http://127.0.0.1:4317").unwrap();
        let _tracer = provider.tracer(SERVICE_NAME);
        provider.shutdown().unwrap();
    }
}

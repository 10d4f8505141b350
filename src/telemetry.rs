use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use std::{path::Path, time::Duration};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const SERVICE_NAME: &str = "delay_guardian";

/// Keeps the log writer and span exporter alive. Flushes both when dropped.
pub struct TelemetryGuard {
    _file_guard: WorkerGuard,
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            _ = provider.shutdown();
        }
    }
}

pub fn init(log_dir: &Path, otlp_endpoint: Option<&str>) -> Result<TelemetryGuard> {
    let provider = match otlp_endpoint {
        Some(endpoint) => Some(
            SdkTracerProvider::builder()
                .with_batch_exporter(
                    SpanExporter::builder()
                        .with_tonic()
                        .with_timeout(Duration::from_millis(1000))
                        .with_endpoint(endpoint)
                        .build()?,
                )
                .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                .build(),
        ),
        None => None,
    };

    let telemetry_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let appender = tracing_appender::rolling::daily(log_dir, "delay_guardian.log");
    let (non_blocking_appender, file_guard) = tracing_appender::non_blocking(appender);

    // A layer that logs events to rolling files.
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .pretty();

    // The terminal is for the rider, only problems go there
    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(LevelFilter::WARN);

    Registry::default()
        .with(telemetry_layer)
        .with(file_log)
        .with(stderr_log)
        .with(env_filter)
        .try_init()?;

    Ok(TelemetryGuard {
        _file_guard: file_guard,
        provider,
    })
}

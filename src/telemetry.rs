//! OpenTelemetry trace export for the staging service.
//!
//! Only compiled with the `otel` feature.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "guardian-staging";

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Console logging plus OTLP/HTTP span export.
///
/// The collector comes from `OTEL_EXPORTER_OTLP_ENDPOINT` (default
/// `http://localhost:4318`). If the exporter cannot be built, logging stays
/// console-only.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| crate::DEFAULT_LOG_FILTER.into());
    let json = crate::json_logs_requested();

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.clone())
        .build();

    let otel_layer = match exporter {
        Ok(exporter) => {
            let resource = opentelemetry_sdk::Resource::builder()
                .with_service_name(SERVICE_NAME)
                .build();
            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(resource)
                .build();
            let layer = OpenTelemetryLayer::new(provider.tracer(SERVICE_NAME));
            let _ = TRACER_PROVIDER.set(provider.clone());
            opentelemetry::global::set_tracer_provider(provider);
            Some(layer)
        }
        Err(e) => {
            eprintln!("OTLP exporter for {endpoint} unavailable, exporting nothing: {e}");
            None
        }
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Flush pending spans.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        tracing::error!("Error shutting down tracer provider: {e:?}");
    }
}

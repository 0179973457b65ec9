//! OpenTelemetry trace export
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: dispatch-daemon)
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//!     cargo run -p dispatch-daemon --features telemetry
//! ```

use anyhow::Result;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const DEFAULT_SERVICE_NAME: &str = "dispatch-daemon";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Configured OTLP endpoint, if any
pub fn endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
}

pub fn service_name() -> String {
    std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string())
}

/// Build the export layer
///
/// `None` when no endpoint is configured or the `telemetry` feature is off.
/// Must be called inside the Tokio runtime (batch exporter).
pub fn otel_layer<S>() -> Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    let Some(endpoint) = endpoint() else {
        return Ok(None);
    };

    #[cfg(feature = "telemetry")]
    {
        build_layer(&endpoint, &service_name()).map(Some)
    }

    #[cfg(not(feature = "telemetry"))]
    {
        let _ = endpoint;
        Ok(None)
    }
}

#[cfg(feature = "telemetry")]
fn build_layer<S>(endpoint: &str, service_name: &str) -> Result<BoxedLayer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::{runtime, Resource};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();

    let tracer = provider.tracer(service_name.to_string());
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}

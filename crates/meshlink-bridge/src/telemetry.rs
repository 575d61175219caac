//! Log and trace output for MeshLink hosts.
//!
//! A host calls [`init_tracing`] before anything else and keeps the returned
//! guard alive until exit. Bridge components never install subscribers of
//! their own; they only open spans under the parent the host hands them.
//!
//! Output is steered by three variables. `RUST_LOG` filters records and
//! defaults to `info`. `MESHLINK_LOG_FORMAT` picks the line layout (see
//! [`LogFormat`]). `OTEL_EXPORTER_OTLP_ENDPOINT`, when present, adds a span
//! exporter that ships to that collector over OTLP/HTTP.
//!
//! ```rust,no_run
//! let _telemetry = meshlink_bridge::telemetry::init_tracing("meshlink");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const FORMAT_VAR: &str = "MESHLINK_LOG_FORMAT";
const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Line layout of console log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One human-readable line per record.
    #[default]
    Compact,
    /// Newline-delimited JSON, for log shippers.
    Json,
}

impl LogFormat {
    /// Reads the layout from `MESHLINK_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(FORMAT_VAR).ok().as_deref())
    }

    /// `json` (any case) selects [`LogFormat::Json`]; anything else, or
    /// nothing, stays compact.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Installs the global subscriber.
///
/// Console records go through an [`EnvFilter`] in the layout chosen by
/// [`LogFormat::from_env`]. Spans are additionally exported when a collector
/// endpoint is configured. Panics if a global subscriber is already set.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("meshlink")));

    // `Option<Layer>` is itself a layer, so one registry covers both cases.
    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);
    match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .init(),
    }

    TracerProviderGuard(provider)
}

/// Keeps the span exporter alive; flushes and stops it when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being shipped to a collector.
    pub fn exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[meshlink] span exporter did not stop cleanly: {e}");
        }
    }
}

/// `None` without an endpoint, or when the exporter fails to build. Errors
/// go to stderr because no subscriber is installed yet.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var(ENDPOINT_VAR).ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[meshlink] cannot reach span collector: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Exports inline; hosts may start tracing before any runtime.
            .with_simple_exporter(exporter)
            .build(),
    )
}

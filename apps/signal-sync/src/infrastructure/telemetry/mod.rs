//! Logging and OpenTelemetry Tracing
//!
//! Installs the `tracing` subscriber: an env-filtered fmt layer, plus an
//! optional OTLP span exporter.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Filter directives applied on top of `signal_sync=info`;
//!   a directive for the same target replaces the built-in one
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: signal-sync)
//!
//! # Usage
//!
//! ```ignore
//! use signal_sync::infrastructure::telemetry;
//!
//! // Keep the guard alive for the life of the process
//! let _guard = telemetry::init()?;
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "signal-sync";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives applied beneath `RUST_LOG`.
const BASE_DIRECTIVES: [&str; 4] = [
    "signal_sync=info",
    "tungstenite=warn",
    "hyper=warn",
    "h2=warn",
];

/// Telemetry initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A filter directive failed to parse.
    #[error("invalid log directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),

    /// The OTLP exporter could not be built.
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether spans are exported over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("OTEL_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Initialize telemetry from the environment.
///
/// # Errors
///
/// Returns `TelemetryError` if the subscriber or exporter cannot be set up.
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// # Errors
///
/// Returns `TelemetryError` if the subscriber or exporter cannot be set up.
pub fn init_with_config(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = env_filter()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name);
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}

fn env_filter() -> Result<EnvFilter, TelemetryError> {
    let overrides = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    build_filter(overrides.as_deref())
}

/// Base directives first, then `overrides`, so a later directive for the
/// same target wins.
fn build_filter(overrides: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    let base = add_directives(EnvFilter::default(), BASE_DIRECTIVES)?;
    let user = overrides
        .into_iter()
        .flat_map(|raw| raw.split(','))
        .map(str::trim)
        .filter(|raw| !raw.is_empty());
    add_directives(base, user)
}

fn add_directives<'a>(
    filter: EnvFilter,
    directives: impl IntoIterator<Item = &'a str>,
) -> Result<EnvFilter, TelemetryError> {
    directives.into_iter().try_fold(
        filter,
        |filter, raw| -> Result<EnvFilter, TelemetryError> {
            Ok(filter.add_directive(raw.parse::<Directive>()?))
        },
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.service_name, "signal-sync");
    }

    #[test]
    fn base_directives_parse() {
        for raw in BASE_DIRECTIVES {
            assert!(raw.parse::<Directive>().is_ok(), "{raw}");
        }
        let rendered = build_filter(None).unwrap().to_string();
        assert!(rendered.contains("signal_sync=info"), "{rendered}");
    }

    #[test]
    fn rust_log_overrides_crate_level() {
        let rendered = build_filter(Some("signal_sync=debug")).unwrap().to_string();
        assert!(rendered.contains("signal_sync=debug"), "{rendered}");
        assert!(!rendered.contains("signal_sync=info"), "{rendered}");
        assert!(rendered.contains("tungstenite=warn"), "{rendered}");
    }

    #[test]
    fn rust_log_can_quiet_dependencies_and_add_targets() {
        let rendered = build_filter(Some(" hyper=error, ,reqwest=debug"))
            .unwrap()
            .to_string();
        assert!(rendered.contains("hyper=error"), "{rendered}");
        assert!(!rendered.contains("hyper=warn"), "{rendered}");
        assert!(rendered.contains("reqwest=debug"), "{rendered}");
    }

    #[test]
    fn invalid_rust_log_is_reported() {
        assert!(matches!(
            build_filter(Some("signal_sync=loud")),
            Err(TelemetryError::Directive(_))
        ));
    }
}

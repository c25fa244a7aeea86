//! Log output for the CLI, plus optional span export to an OTLP collector.
//!
//! Logs always go to stderr; stdout is reserved for command output such as
//! the `export EKKLESIA_TOKEN=...` line. Spans are exported over gRPC only
//! when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, time::Duration};
use tonic::metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

use crate::GIT_COMMIT_HASH;

/// Reported as `service.name`; every subcommand shares it.
const SERVICE_NAME: &str = "ekklesia-cli";
const SERVICE_NAMESPACE: &str = "ekklesia";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Collector settings taken from the standard `OTEL_*` variables.
#[derive(Debug)]
struct ExportSettings {
    endpoint: String,
    metadata: MetadataMap,
    instance_id: String,
}

impl ExportSettings {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
            return Ok(None);
        };
        if let Ok(protocol) = var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            if protocol != "grpc" {
                debug!(%protocol, "Only grpc export is supported, ignoring protocol");
            }
        }
        let metadata = match var("OTEL_EXPORTER_OTLP_HEADERS") {
            Ok(headers) => collector_metadata(&headers)?,
            Err(_) => MetadataMap::new(),
        };
        Ok(Some(Self {
            endpoint: with_scheme(&endpoint),
            metadata,
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        }))
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new("service.name", SERVICE_NAME),
                KeyValue::new("service.namespace", SERVICE_NAMESPACE),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
                KeyValue::new("vcs.revision", GIT_COMMIT_HASH),
            ])
            .build()
    }
}

/// Parse `key=value,key=value` into gRPC metadata. Keys ending in `-bin`
/// carry base64 values.
fn collector_metadata(raw: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();
    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }

        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("failed to base64-decode collector header {key}: {e}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid collector header name {key}: {e}"))?;
            metadata.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid collector header name {key}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid collector header value for {key}: {e}"))?;
            metadata.insert(name, value);
        }
    }
    Ok(metadata)
}

/// Bare `host:port` endpoints are reached over TLS.
fn with_scheme(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn span_exporter(settings: ExportSettings) -> Result<Tracer> {
    let resource = settings.resource();
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .with_metadata(settings.metadata)
        .build()
        .context("failed to build OTLP span exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();
    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
    Ok(provider.tracer(SERVICE_NAME))
}

/// Install the global subscriber. `RUST_LOG` directives override the
/// verbosity; HTTP client and server internals stay quiet unless asked for.
///
/// # Errors
/// Returns an error if the collector settings are invalid or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    match ExportSettings::from_env()? {
        Some(settings) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(span_exporter(settings)?);
            let subscriber = Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Flush pending spans before the process exits. Does nothing when export
/// was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("Flushing span exporter");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_metadata_skips_malformed_pairs() {
        let metadata =
            collector_metadata("Authorization = Bearer abc ,malformed,=orphan, x-tenant=ekklesia")
                .unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
        assert_eq!(
            metadata.get("x-tenant").and_then(|v| v.to_str().ok()),
            Some("ekklesia")
        );
        assert!(collector_metadata("").unwrap().is_empty());
    }

    #[test]
    fn test_collector_metadata_binary_values() {
        // "binary data"
        let metadata = collector_metadata("trace-bin=YmluYXJ5IGRhdGE=").unwrap();
        assert_eq!(metadata.len(), 1);

        let err = collector_metadata("trace-bin=not-valid-base64!!!").unwrap_err();
        assert!(err.to_string().contains("failed to base64-decode"));
    }

    #[test]
    fn test_with_scheme() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(
            with_scheme(" otel.ekklesia.is:4317/ "),
            "https://otel.ekklesia.is:4317"
        );
    }

    #[test]
    fn test_export_disabled_without_endpoint() {
        temp_env::with_vars_unset(["OTEL_EXPORTER_OTLP_ENDPOINT"], || {
            assert!(ExportSettings::from_env().unwrap().is_none());
        });
    }

    #[test]
    fn test_export_settings_from_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector:4317")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("x-tenant=ekklesia")),
                ("OTEL_SERVICE_INSTANCE_ID", Some("cli-1")),
            ],
            || {
                let settings = ExportSettings::from_env().unwrap().unwrap();
                assert_eq!(settings.endpoint, "https://collector:4317");
                assert_eq!(settings.metadata.len(), 1);
                assert_eq!(settings.instance_id, "cli-1");
            },
        );
    }

    #[test]
    fn test_shutdown_without_exporter_is_noop() {
        shutdown_tracer();
    }
}

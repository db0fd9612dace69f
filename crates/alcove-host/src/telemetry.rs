//! Tracing and OpenTelemetry bootstrap for the Alcove stack.
//!
//! Call [`init_tracing`] once, before any thread is spawned, and hold the
//! returned guard until the process exits.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter, `tracing_subscriber::EnvFilter` syntax (default `info`). |
//! | `ALCOVE_LOG_FORMAT=json` | Newline-delimited JSON log lines instead of the compact console format. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | When set, spans are exported to this OTLP/HTTP collector. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = alcove_host::telemetry::init_tracing("alcove");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber, with span export to an OTLP
/// collector when `OTEL_EXPORTER_OTLP_ENDPOINT` is set and plain console
/// output otherwise.
///
/// The returned [`TracerProviderGuard`] flushes pending span batches on drop,
/// so it must live as long as the process.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);

    let base = tracing_subscriber::registry().with(filter).with(fmt_layer());
    match &provider {
        Some(p) => {
            let otel = tracing_opentelemetry::layer().with_tracer(p.tracer("alcove"));
            base.with(otel).init();
        }
        None => base.init(),
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts the OTel [`SdkTracerProvider`] down on drop, flushing whatever spans
/// are still buffered. Hold it in `main` for the whole program lifetime.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[alcove] tracer provider shutdown: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Console formatter: compact by default, JSON when `ALCOVE_LOG_FORMAT=json`.
fn fmt_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if std::env::var("ALCOVE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().compact().boxed()
    }
}

/// Build the exporting provider, or `None` when no collector endpoint is
/// configured or the exporter refuses to initialise. The error goes to
/// stderr: this runs before the subscriber exists.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[alcove] OTLP exporter init failed: {e}"))
        .ok()?;

    // A simple (synchronous) exporter, not a batch one: batching spawns Tokio
    // tasks, and no runtime exists yet when this runs. The frontend host
    // builds its runtime on its own thread later.
    Some(
        SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_provider() {
        // SAFETY: single-threaded test; no other thread reads this env-var.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("alcove-test").is_none());
    }

    #[test]
    fn empty_guard_drops_without_panicking() {
        drop(TracerProviderGuard(None));
    }
}

//! Telemetry sink boundary and tracing pipeline initialisation.
//!
//! Workers hand their cycle results to a [`TelemetrySink`]; any
//! time-series/event backend can sit behind it. Sink calls are
//! fire-and-forget by contract: an implementation that hits a backend
//! error logs it and carries on, it never aborts the control loop.
//!
//! [`init_tracing`] wires up the global `tracing` subscriber once per
//! process, with an optional OTLP span exporter:
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `TELEOP_LOG_FORMAT=json` | Newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Enables the OTLP/HTTP span exporter. |

use std::sync::{Arc, Mutex};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{debug, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use teleop_types::{ImageFrame, JOINT_NAMES};

// ─────────────────────────────────────────────────────────────────────────────
// Sink boundary
// ─────────────────────────────────────────────────────────────────────────────

/// The pipeline's telemetry boundary.
///
/// One sink instance per worker process. `start_session` is called on
/// every `SessionStart` control envelope so the backend can rotate to a
/// new recording before cycle 0 of the session is logged.
pub trait TelemetrySink: Send {
    /// Rotate to (or open) the recording session with the given id.
    fn start_session(&mut self, session_id: &str);

    /// Record one scalar sample under a slash-separated metric path.
    fn log_scalar(&mut self, path: &str, step: u64, value: f64);

    /// Record one image frame under a metric path.
    fn log_image(&mut self, path: &str, step: u64, frame: &ImageFrame);

    /// Record one worker-cycle latency sample.
    fn log_latency(&mut self, step: u64, worker: &str, latency_ms: f64);
}

/// Log a joint vector as one scalar per joint, using the arm's joint
/// names for the first six entries (`<prefix>/<joint>`) and positional
/// labels beyond that.
pub fn log_joint_vector(sink: &mut dyn TelemetrySink, prefix: &str, step: u64, values: &[f32]) {
    for (i, value) in values.iter().enumerate() {
        let path = match JOINT_NAMES.get(i) {
            Some(joint) => format!("{prefix}/{joint}"),
            None => format!("{prefix}/joint{i}"),
        };
        sink.log_scalar(&path, step, f64::from(*value));
    }
}

/// Default sink: structured `tracing` events, one per sample.
///
/// With the OTLP exporter enabled these flow to the collector with the
/// rest of the process's spans; without it they land in the process log.
#[derive(Default)]
pub struct TracingSink {
    session: Option<String>,
}

impl TelemetrySink for TracingSink {
    fn start_session(&mut self, session_id: &str) {
        info!(session_id, "telemetry session started");
        self.session = Some(session_id.to_string());
    }

    fn log_scalar(&mut self, path: &str, step: u64, value: f64) {
        trace!(target: "teleop::telemetry", path, step, value, "scalar");
    }

    fn log_image(&mut self, path: &str, step: u64, frame: &ImageFrame) {
        trace!(
            target: "teleop::telemetry",
            path,
            step,
            width = frame.width,
            height = frame.height,
            "image"
        );
    }

    fn log_latency(&mut self, step: u64, worker: &str, latency_ms: f64) {
        debug!(
            target: "teleop::telemetry",
            session = self.session.as_deref().unwrap_or("-"),
            worker,
            step,
            latency_ms,
            "latency"
        );
    }
}

/// Sink that discards everything.
#[derive(Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn start_session(&mut self, _session_id: &str) {}
    fn log_scalar(&mut self, _path: &str, _step: u64, _value: f64) {}
    fn log_image(&mut self, _path: &str, _step: u64, _frame: &ImageFrame) {}
    fn log_latency(&mut self, _step: u64, _worker: &str, _latency_ms: f64) {}
}

/// Everything a [`RecordingSink`] has captured.
#[derive(Debug, Default, Clone)]
pub struct RecordedTelemetry {
    pub sessions: Vec<String>,
    /// (path, step, value)
    pub scalars: Vec<(String, u64, f64)>,
    /// (path, step, width, height)
    pub images: Vec<(String, u64, u32, u32)>,
    /// (worker, step, latency_ms)
    pub latencies: Vec<(String, u64, f64)>,
}

/// In-memory capturing sink. Cloning shares the underlying store, so a
/// test can keep one handle while the harness owns the other.
#[derive(Default, Clone)]
pub struct RecordingSink(Arc<Mutex<RecordedTelemetry>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> RecordedTelemetry {
        self.0.lock().expect("telemetry store poisoned").clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn start_session(&mut self, session_id: &str) {
        if let Ok(mut store) = self.0.lock() {
            store.sessions.push(session_id.to_string());
        }
    }

    fn log_scalar(&mut self, path: &str, step: u64, value: f64) {
        if let Ok(mut store) = self.0.lock() {
            store.scalars.push((path.to_string(), step, value));
        }
    }

    fn log_image(&mut self, path: &str, step: u64, frame: &ImageFrame) {
        if let Ok(mut store) = self.0.lock() {
            store
                .images
                .push((path.to_string(), step, frame.width, frame.height));
        }
    }

    fn log_latency(&mut self, step: u64, worker: &str, latency_ms: f64) {
        if let Ok(mut store) = self.0.lock() {
            store.latencies.push((worker.to_string(), step, latency_ms));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise the global `tracing` subscriber, with an OTLP span exporter
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// The returned [`TracerProviderGuard`] must be held for the lifetime of
/// the process; dropping it flushes pending span batches.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("TELEOP_LOG_FORMAT").as_deref() == Ok("json");

    let provider = build_provider(service_name);

    match (&provider, use_json) {
        (Some(p), true) => {
            let otel = tracing_opentelemetry::layer().with_tracer(p.tracer("teleop"));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        (Some(p), false) => {
            let otel = tracing_opentelemetry::layer().with_tracer(p.tracer("teleop"));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        (None, true) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        (None, false) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }

    TracerProviderGuard(provider)
}

/// RAII guard that shuts down the OTel provider on drop, flushing pending
/// spans before process exit.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[teleop] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// Build the tracer provider when an OTLP endpoint is configured.
///
/// A simple (synchronous) exporter is used so no async runtime needs to
/// exist at init time; the worker processes are single-threaded.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[teleop] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

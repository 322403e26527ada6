/*!
Observability for connector operations.

- Structured logging through a `tracing-subscriber` registry
- Prometheus counters and histograms per backend and verb (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry as TracingRegistry};

use crate::{ConnectorError, Result};

/// Filter applied when neither an explicit filter nor `RUST_LOG` is set
pub const DEFAULT_LOG_FILTER: &str = "conduit=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<ConnectorMetrics> = OnceLock::new();

#[cfg(feature = "metrics")]
const LABELS: [&str; 2] = ["backend", "verb"];

/// Prometheus metrics for connector verbs, labelled by backend and verb
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct ConnectorMetrics {
    pub requests_total: CounterVec,
    pub errors_total: CounterVec,
    pub retries_total: CounterVec,
    pub latency_seconds: HistogramVec,
    pub payload_bytes: Histogram,
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(what: &str, e: prometheus::Error) -> ConnectorError {
    ConnectorError::backend("metrics", what, e.to_string())
}

#[cfg(feature = "metrics")]
impl ConnectorMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("conduit_requests_total", "Connector verbs started"),
            &LABELS,
        )
        .map_err(|e| metric_error("conduit_requests_total", e))?;
        let errors_total = CounterVec::new(
            Opts::new("conduit_errors_total", "Connector verbs that surfaced an error"),
            &LABELS,
        )
        .map_err(|e| metric_error("conduit_errors_total", e))?;
        let retries_total = CounterVec::new(
            Opts::new("conduit_retries_total", "Transfer attempts retried after a transient failure"),
            &LABELS,
        )
        .map_err(|e| metric_error("conduit_retries_total", e))?;
        let latency_seconds = HistogramVec::new(
            HistogramOpts::new("conduit_latency_seconds", "Duration of connector verbs in seconds"),
            &LABELS,
        )
        .map_err(|e| metric_error("conduit_latency_seconds", e))?;
        let payload_bytes = Histogram::with_opts(
            HistogramOpts::new("conduit_payload_bytes", "Size of payloads read or written")
                .buckets(prometheus::exponential_buckets(256.0, 4.0, 10).map_err(|e| metric_error("conduit_payload_bytes", e))?),
        )
        .map_err(|e| metric_error("conduit_payload_bytes", e))?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(|e| metric_error("conduit_requests_total", e))?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(|e| metric_error("conduit_errors_total", e))?;
        registry
            .register(Box::new(retries_total.clone()))
            .map_err(|e| metric_error("conduit_retries_total", e))?;
        registry
            .register(Box::new(latency_seconds.clone()))
            .map_err(|e| metric_error("conduit_latency_seconds", e))?;
        registry
            .register(Box::new(payload_bytes.clone()))
            .map_err(|e| metric_error("conduit_payload_bytes", e))?;

        Ok(Self {
            requests_total,
            errors_total,
            retries_total,
            latency_seconds,
            payload_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> &'static ConnectorMetrics {
        METRICS.get_or_init(|| Self::new().expect("metric definitions are static and valid"))
    }

    pub fn record_request(&self, backend: &str, verb: &str) {
        self.requests_total.with_label_values(&[backend, verb]).inc();
    }

    pub fn record_error(&self, backend: &str, verb: &str) {
        self.errors_total.with_label_values(&[backend, verb]).inc();
    }

    pub fn record_retry(&self, backend: &str, verb: &str) {
        self.retries_total.with_label_values(&[backend, verb]).inc();
    }

    pub fn record_latency(&self, backend: &str, verb: &str, duration: std::time::Duration) {
        self.latency_seconds
            .with_label_values(&[backend, verb])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_payload(&self, size_bytes: usize) {
        self.payload_bytes.observe(size_bytes as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| metric_error("gather", e))?;
        String::from_utf8(buffer)
            .map_err(|e| ConnectorError::backend("metrics", "gather", e.to_string()))
    }
}

/// Render the global metrics in Prometheus text format
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    ConnectorMetrics::global().gather_metrics()
}

/// Measures one connector verb
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    backend: &'static str,
    verb: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    /// Start timing, counting the request immediately
    pub fn start(backend: &'static str, verb: &'static str) -> Self {
        ConnectorMetrics::global().record_request(backend, verb);
        Self {
            start: Instant::now(),
            backend,
            verb,
        }
    }

    pub fn finish(self) {
        ConnectorMetrics::global().record_latency(self.backend, self.verb, self.start.elapsed());
    }

    pub fn finish_with_error(self) {
        let metrics = ConnectorMetrics::global();
        metrics.record_latency(self.backend, self.verb, self.start.elapsed());
        metrics.record_error(self.backend, self.verb);
    }

    /// Finish according to the outcome of the verb
    pub fn finish_with<T>(self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.finish(),
            Err(_) => self.finish_with_error(),
        }
    }
}

/// Install the global tracing subscriber
///
/// `filter` takes `EnvFilter` directive syntax; when absent, `RUST_LOG` is
/// consulted and then [`DEFAULT_LOG_FILTER`]. With `json` set, events are
/// written as JSON lines, otherwise in the compact human format.
///
/// Fails with `Validation` on a malformed filter and with `Backend` when a
/// global subscriber is already installed.
pub fn init_observability(json: bool, filter: Option<&str>) -> Result<()> {
    #[cfg(feature = "metrics")]
    ConnectorMetrics::global();

    let env_filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| ConnectorError::validation(format!("invalid log filter '{directives}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
    });
    let text_layer = (!json).then(|| fmt::layer().compact().with_target(false));

    let subscriber = TracingRegistry::default()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    set_global_default(subscriber).map_err(|e| {
        ConnectorError::backend("init_observability", "tracing", format!("failed to set global subscriber: {e}"))
    })?;

    tracing::info!(json, "Conduit observability initialized");
    Ok(())
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability(false, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_filter_is_rejected() {
        let err = init_observability(false, Some("conduit=loudest")).unwrap_err();
        assert!(matches!(err, ConnectorError::Validation(_)));
    }

    #[test]
    fn test_second_init_fails_without_panicking() {
        let _ = init_observability(true, Some("conduit=debug"));
        let err = init_observability(false, None).unwrap_err();
        assert!(matches!(err, ConnectorError::Backend { .. }));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_timer_and_gathering() {
        MetricsTimer::start("memory", "load").finish();
        let timer = MetricsTimer::start("memory", "persist");
        timer.finish_with(&Err::<(), _>(ConnectorError::validation("boom")));
        ConnectorMetrics::global().record_retry("memory", "persist");
        ConnectorMetrics::global().observe_payload(1024);

        let text = gather_metrics().unwrap();
        assert!(text.contains("conduit_requests_total"));
        assert!(text.contains("conduit_errors_total"));
        assert!(text.contains("backend=\"memory\""));
        assert!(text.contains("conduit_payload_bytes"));
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::latency::{LatencySummary, WindowSummaries};
use crate::sink::ForwardError;

const NAMESPACE: &str = "sentinel";

/// Prometheus metrics for ingestion health.
///
/// All metrics use the "sentinel" namespace. They are purely observational;
/// nothing in the ingestion path reads them back.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total payloads received from the transport.
    pub messages_received: Counter,
    /// Total payloads decoded into records.
    pub records_decoded: Counter,
    /// Total payloads that failed to decode.
    pub decode_errors: Counter,
    /// Total batches accepted by the sink.
    pub batches_forwarded: Counter,
    /// Total entries accepted by the sink.
    pub entries_forwarded: Counter,
    /// Forward failures by kind (transport/rejected/encode).
    pub forward_errors: CounterVec,
    /// Time spent in a single forward call (1ms-5s buckets).
    pub forward_duration: Histogram,
    /// Last reported latency percentiles in microseconds by window and quantile.
    pub latency_summary_us: GaugeVec,
    /// Sample count of the last summarized window.
    pub latency_window_count: GaugeVec,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let messages_received = Counter::with_opts(
            Opts::new(
                "messages_received_total",
                "Total payloads received from the transport.",
            )
            .namespace(NAMESPACE),
        )?;
        let records_decoded = Counter::with_opts(
            Opts::new(
                "records_decoded_total",
                "Total payloads decoded into records.",
            )
            .namespace(NAMESPACE),
        )?;
        let decode_errors = Counter::with_opts(
            Opts::new(
                "decode_errors_total",
                "Total payloads that failed to decode.",
            )
            .namespace(NAMESPACE),
        )?;
        let batches_forwarded = Counter::with_opts(
            Opts::new(
                "batches_forwarded_total",
                "Total batches accepted by the sink.",
            )
            .namespace(NAMESPACE),
        )?;
        let entries_forwarded = Counter::with_opts(
            Opts::new(
                "entries_forwarded_total",
                "Total entries accepted by the sink.",
            )
            .namespace(NAMESPACE),
        )?;
        let forward_errors = CounterVec::new(
            Opts::new("forward_errors_total", "Total forward failures by kind.")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        let forward_duration = Histogram::with_opts(
            HistogramOpts::new(
                "forward_duration_seconds",
                "Time to forward one batch to the sink.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let latency_summary_us = GaugeVec::new(
            Opts::new(
                "latency_summary_us",
                "Last reported latency percentile in microseconds.",
            )
            .namespace(NAMESPACE),
            &["window", "quantile"],
        )?;
        let latency_window_count = GaugeVec::new(
            Opts::new(
                "latency_window_count",
                "Samples in the last summarized latency window.",
            )
            .namespace(NAMESPACE),
            &["window"],
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(records_decoded.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(batches_forwarded.clone()))?;
        registry.register(Box::new(entries_forwarded.clone()))?;
        registry.register(Box::new(forward_errors.clone()))?;
        registry.register(Box::new(forward_duration.clone()))?;
        registry.register(Box::new(latency_summary_us.clone()))?;
        registry.register(Box::new(latency_window_count.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            messages_received,
            records_decoded,
            decode_errors,
            batches_forwarded,
            entries_forwarded,
            forward_errors,
            forward_duration,
            latency_summary_us,
            latency_window_count,
        })
    }

    /// Records the outcome of one forward call.
    pub fn observe_forward(
        &self,
        entries: usize,
        elapsed: Duration,
        result: Result<(), &ForwardError>,
    ) {
        self.forward_duration.observe(elapsed.as_secs_f64());
        match result {
            Ok(()) => {
                self.batches_forwarded.inc();
                self.entries_forwarded.inc_by(entries as f64);
            }
            Err(e) => {
                self.forward_errors.with_label_values(&[e.kind()]).inc();
            }
        }
    }

    /// Publishes both window summaries as gauges.
    pub fn observe_summaries(&self, summaries: &WindowSummaries) {
        self.set_summary(&summaries.end_to_end);
        self.set_summary(&summaries.internal);
    }

    fn set_summary(&self, s: &LatencySummary) {
        let window = s.kind.as_str();
        for (quantile, value) in [("0.5", s.p50), ("0.9", s.p90), ("0.99", s.p99)] {
            self.latency_summary_us
                .with_label_values(&[window, quantile])
                .set(value.as_micros() as f64);
        }
        self.latency_window_count
            .with_label_values(&[window])
            .set(s.count as f64);
    }

    /// Renders all registered metrics in Prometheus text format.
    pub fn encode_text(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Serves /metrics and /healthz until [`HealthMetrics::stop`].
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        let bind_addr = bind_address(&self.addr);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("binding health server to {bind_addr}"))?;
        let local_addr = listener.local_addr().context("reading bound address")?;

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(Arc::new(AppState {
                registry: self.registry.clone(),
            }));

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "serving health metrics");

            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "health metrics server failed");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// Expands the ":port" shorthand to all interfaces; empty means ":9090".
fn bind_address(addr: &str) -> String {
    match addr {
        "" => "0.0.0.0:9090".to_string(),
        a if a.starts_with(':') => format!("0.0.0.0{a}"),
        a => a.to_string(),
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::latency::WindowKind;

    fn summary(kind: WindowKind, count: usize, us: u64) -> LatencySummary {
        LatencySummary {
            kind,
            count,
            p50: Duration::from_micros(us),
            p90: Duration::from_micros(us * 2),
            p99: Duration::from_micros(us * 3),
        }
    }

    #[test]
    fn test_metrics_registered_with_namespace() {
        let m = HealthMetrics::new(":0").expect("metrics");
        m.messages_received.inc();
        let text = m.encode_text().expect("encode");
        assert!(text.contains("sentinel_messages_received_total 1"));
    }

    #[test]
    fn test_observe_forward() {
        let m = HealthMetrics::new(":0").expect("metrics");
        m.observe_forward(256, Duration::from_millis(3), Ok(()));
        m.observe_forward(10, Duration::from_millis(1), Err(&ForwardError::Rejected(500)));

        assert_eq!(m.batches_forwarded.get(), 1.0);
        assert_eq!(m.entries_forwarded.get(), 256.0);
        assert_eq!(
            m.forward_errors.with_label_values(&["rejected"]).get(),
            1.0
        );
        assert_eq!(m.forward_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_observe_summaries() {
        let m = HealthMetrics::new(":0").expect("metrics");
        m.observe_summaries(&WindowSummaries {
            end_to_end: summary(WindowKind::EndToEnd, 900, 100),
            internal: summary(WindowKind::Internal, 1000, 5),
        });

        assert_eq!(
            m.latency_summary_us
                .with_label_values(&["e2e", "0.99"])
                .get(),
            300.0
        );
        assert_eq!(
            m.latency_summary_us
                .with_label_values(&["internal", "0.5"])
                .get(),
            5.0
        );
        assert_eq!(
            m.latency_window_count.with_label_values(&["e2e"]).get(),
            900.0
        );
    }

    #[test]
    fn test_bind_address_shorthand() {
        assert_eq!(bind_address(":9191"), "0.0.0.0:9191");
        assert_eq!(bind_address(""), "0.0.0.0:9090");
        assert_eq!(bind_address("127.0.0.1:0"), "127.0.0.1:0");
    }

    #[tokio::test]
    async fn test_server_serves_healthz_and_metrics() {
        let m = HealthMetrics::new("127.0.0.1:0").expect("metrics");
        let addr = m.start().await.expect("start");

        let get = |path: &'static str| async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
            let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
            stream.write_all(req.as_bytes()).await.expect("write");
            let mut resp = String::new();
            stream.read_to_string(&mut resp).await.expect("read");
            resp
        };

        let health = get("/healthz").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("ok"));

        m.decode_errors.inc();
        let metrics = get("/metrics").await;
        assert!(metrics.contains("sentinel_decode_errors_total 1"));

        m.stop();
    }
}

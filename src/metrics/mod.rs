//! Metrics sink injected into the messaging core.
//!
//! Components receive an `Arc<dyn MetricsSink>` instead of touching process-wide
//! collectors, so tests can run any number of publishers and consumers side by
//! side. [`PrometheusMetrics`] owns its own registry and renders the text
//! exposition format for `/metrics`; [`NoopMetrics`] discards everything.

use crate::circuit_breaker::CircuitState;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::time::Duration;

const NAMESPACE: &str = "care";

/// Observability hooks of the messaging core. Every method defaults to a no-op.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// An alert reached the broker
    fn alert_published(&self, _alert_type: &str, _latency: Duration) {}

    /// An alert could not be published; `reason` is a short error class
    fn alert_publish_failed(&self, _reason: &str) {}

    /// A creation request was settled with `outcome` (acked, rejected, requeued)
    fn creation_message(&self, _outcome: &str, _elapsed: Duration) {}

    /// A reconnection attempt finished for a supervisor of `role`
    fn broker_reconnect(&self, _role: &str, _succeeded: bool) {}

    /// A circuit breaker changed state
    fn circuit_state(&self, _name: &str, _state: CircuitState) {}

    /// A circuit breaker rejected a call without running it
    fn circuit_rejected(&self, _name: &str) {}
}

/// Sink that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Prometheus-backed sink with a private registry
pub struct PrometheusMetrics {
    registry: Registry,

    pub alerts_published: CounterVec,
    pub alert_publish_failures: CounterVec,
    pub alert_publish_latency: HistogramVec,
    pub creation_messages: CounterVec,
    pub creation_processing: HistogramVec,
    pub broker_reconnects: CounterVec,
    pub circuit_breaker_state: GaugeVec,
    pub circuit_breaker_rejected: CounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let alerts_published = CounterVec::new(
            Opts::new("alerts_published_total", "Alerts delivered to the broker").namespace(NAMESPACE),
            &["alert_type"],
        )?;
        let alert_publish_failures = CounterVec::new(
            Opts::new("alert_publish_failures_total", "Alerts that could not be published")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        let alert_publish_latency = HistogramVec::new(
            HistogramOpts::new(
                "alert_publish_latency_seconds",
                "Time from publish call to broker acceptance",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0]),
            &["alert_type"],
        )?;
        let creation_messages = CounterVec::new(
            Opts::new("creation_messages_total", "Creation requests settled by the consumer")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        let creation_processing = HistogramVec::new(
            HistogramOpts::new(
                "creation_processing_seconds",
                "Time spent handling one creation request",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["outcome"],
        )?;
        let broker_reconnects = CounterVec::new(
            Opts::new("broker_reconnects_total", "Broker reconnection attempts").namespace(NAMESPACE),
            &["role", "result"],
        )?;
        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            )
            .namespace(NAMESPACE),
            &["name"],
        )?;
        let circuit_breaker_rejected = CounterVec::new(
            Opts::new("circuit_breaker_rejected_total", "Calls rejected by an open circuit")
                .namespace(NAMESPACE),
            &["name"],
        )?;

        registry.register(Box::new(alerts_published.clone()))?;
        registry.register(Box::new(alert_publish_failures.clone()))?;
        registry.register(Box::new(alert_publish_latency.clone()))?;
        registry.register(Box::new(creation_messages.clone()))?;
        registry.register(Box::new(creation_processing.clone()))?;
        registry.register(Box::new(broker_reconnects.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(circuit_breaker_rejected.clone()))?;

        Ok(Self {
            registry,
            alerts_published,
            alert_publish_failures,
            alert_publish_latency,
            creation_messages,
            creation_processing,
            broker_reconnects,
            circuit_breaker_state,
            circuit_breaker_rejected,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::from("# Error encoding metrics\n");
        }

        String::from_utf8(buffer).unwrap_or_else(|e| {
            tracing::error!("Failed to convert metrics to string: {}", e);
            String::from("# Error converting metrics\n")
        })
    }
}

impl fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn alert_published(&self, alert_type: &str, latency: Duration) {
        self.alerts_published.with_label_values(&[alert_type]).inc();
        self.alert_publish_latency
            .with_label_values(&[alert_type])
            .observe(latency.as_secs_f64());
    }

    fn alert_publish_failed(&self, reason: &str) {
        self.alert_publish_failures.with_label_values(&[reason]).inc();
    }

    fn creation_message(&self, outcome: &str, elapsed: Duration) {
        self.creation_messages.with_label_values(&[outcome]).inc();
        self.creation_processing
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    fn broker_reconnect(&self, role: &str, succeeded: bool) {
        let result = if succeeded { "success" } else { "failure" };
        self.broker_reconnects.with_label_values(&[role, result]).inc();
    }

    fn circuit_state(&self, name: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[name])
            .set(state.to_metric_value());
    }

    fn circuit_rejected(&self, name: &str) {
        self.circuit_breaker_rejected.with_label_values(&[name]).inc();
    }
}

pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::messaging::{ConsumerLifecycle, EventPublisher};
use crate::metrics::PrometheusMetrics;
use crate::services::AlertDispatcher;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<EventPublisher>,
    /// Alert trigger for measurement-recording handlers
    pub alerts: AlertDispatcher,
    pub consumer: Option<ConsumerLifecycle>,
    pub metrics: Option<Arc<PrometheusMetrics>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(publisher: Arc<EventPublisher>) -> Self {
        Self {
            alerts: AlertDispatcher::new(publisher.clone()),
            publisher,
            consumer: None,
            metrics: None,
            started_at: Instant::now(),
        }
    }

    /// Report consumer state in readiness checks
    pub fn with_consumer(mut self, consumer: ConsumerLifecycle) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Serve `/metrics` from this registry
    pub fn with_metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

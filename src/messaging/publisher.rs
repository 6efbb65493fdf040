//! Alert event publisher
//!
//! Every publish runs under the circuit breaker. Inside the breaker the
//! publisher makes a bounded number of attempts against the supervisor's
//! connection, asking for a reconnect whenever the connection is missing,
//! closed, or rejects the message.

use crate::circuit_breaker::CircuitBreaker;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::supervisor::{ConnectionSupervisor, RetryPolicy};
use crate::messaging::traits::PublishProperties;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::models::{AlertEvent, AlertThresholds, Measurement};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the breaker guarding broker publishes
pub const PUBLISH_BREAKER_NAME: &str = "rabbitmq";

/// Port used by domain services to raise alerts
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    /// Build an alert for `measurement` and deliver it to the broker
    async fn publish_alert(&self, baby_id: Uuid, measurement: Measurement) -> MessagingResult<()>;
}

/// Publishes [`AlertEvent`]s to the durable alerts queue
pub struct EventPublisher {
    supervisor: ConnectionSupervisor,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    thresholds: AlertThresholds,
    metrics: Arc<dyn MetricsSink>,
}

impl EventPublisher {
    pub fn new(supervisor: ConnectionSupervisor, breaker: CircuitBreaker, policy: RetryPolicy) -> Self {
        Self {
            supervisor,
            breaker,
            policy,
            thresholds: AlertThresholds::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn queue(&self) -> &str {
        &self.supervisor.queue().name
    }

    /// Deliver `event` as a persistent JSON message.
    ///
    /// Fails fast with [`MessagingError::CircuitOpen`] while the breaker is open,
    /// and with [`MessagingError::PublishExhausted`] once all attempts failed.
    pub async fn publish(&self, event: &AlertEvent) -> MessagingResult<()> {
        if self.supervisor.is_shut_down() {
            return Err(MessagingError::Shutdown);
        }

        let payload = serde_json::to_vec(event)?;
        let alert_type = event.alert_type().to_string();

        info!(
            event = "alert_publish_attempt",
            baby_id = %event.baby_id(),
            measurement_id = %event.measurement().id,
            alert_type = %alert_type,
            safety_status = %event.safety_status(),
            "Publishing alert"
        );

        let started = Instant::now();
        let result = self
            .breaker
            .execute(|| self.publish_with_retry(&payload))
            .await
            .map_err(MessagingError::from);
        let elapsed = started.elapsed();

        if elapsed > self.policy.latency_budget {
            warn!(
                alert_type = %alert_type,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.policy.latency_budget.as_millis() as u64,
                "Alert publish exceeded latency budget"
            );
        }

        match &result {
            Ok(()) => {
                self.metrics.alert_published(&alert_type, elapsed);
                info!(
                    event = "alert_published",
                    baby_id = %event.baby_id(),
                    alert_type = %alert_type,
                    queue = %self.queue(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Alert published"
                );
            }
            Err(e) => {
                self.metrics.alert_publish_failed(e.kind());
                error!(
                    baby_id = %event.baby_id(),
                    alert_type = %alert_type,
                    error = %e,
                    "Failed to publish alert"
                );
            }
        }

        result
    }

    async fn publish_with_retry(&self, payload: &[u8]) -> MessagingResult<()> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = MessagingError::ConnectionClosed;

        for attempt in 1..=max_attempts {
            match self.supervisor.connection().await {
                Some(connection) if !connection.is_closed() => {
                    match connection
                        .publish(self.queue(), payload, &PublishProperties::persistent_json())
                        .await
                    {
                        Ok(()) => {
                            debug!(attempt, "Alert accepted by broker");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(attempt, max_attempts, error = %e, "Publish attempt failed");
                            self.supervisor.request_reconnect();
                            last_error = e;
                        }
                    }
                }
                _ => {
                    warn!(attempt, max_attempts, "No live broker connection, requesting reconnect");
                    self.supervisor.request_reconnect();
                    last_error = MessagingError::ConnectionClosed;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(MessagingError::PublishExhausted {
            attempts: max_attempts,
            last_error: last_error.to_string(),
        })
    }

    /// Stop reconnecting and close the publisher's connection
    pub async fn close(&self) {
        self.supervisor.shutdown().await;
    }
}

#[async_trait]
impl AlertPublisher for EventPublisher {
    async fn publish_alert(&self, baby_id: Uuid, measurement: Measurement) -> MessagingResult<()> {
        let event = AlertEvent::new(baby_id, measurement, &self.thresholds);
        self.publish(&event).await
    }
}

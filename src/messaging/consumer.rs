//! Creation-request consumer
//!
//! Turns deliveries from the creation queue into calls to the creation
//! service, one message at a time. Malformed requests are rejected outright;
//! downstream failures are requeued for redelivery.

use crate::messaging::supervisor::ConnectionSupervisor;
use crate::messaging::traits::{Delivery, DeliveryStream};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::models::CreationRequest;
use crate::services::BabyCreationService;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processed and acknowledged
    Acked,
    /// Poison message, nacked without requeue
    Rejected,
    /// Downstream failure, nacked with requeue
    Requeued,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Acked => "acked",
            MessageOutcome::Rejected => "rejected",
            MessageOutcome::Requeued => "requeued",
        }
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a consumption loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The run signal was cancelled
    Cancelled,
    /// The delivery channel closed underneath the loop
    ChannelClosed,
}

/// Consumer tag unique to one registration
pub fn consumer_tag() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("baby-consumer-{}", nanos)
}

/// Processes creation requests against a [`BabyCreationService`]
pub struct CreationConsumer {
    service: Arc<dyn BabyCreationService>,
    metrics: Arc<dyn MetricsSink>,
}

impl CreationConsumer {
    pub fn new(service: Arc<dyn BabyCreationService>) -> Self {
        Self {
            service,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Consume from `stream` until `token` is cancelled or the channel closes.
    ///
    /// The token is checked before waiting for each message and again once a
    /// message is settled, never while one is being processed. When the
    /// channel closes unexpectedly the supervisor is asked to reconnect.
    pub async fn run(
        &self,
        mut stream: Box<dyn DeliveryStream>,
        token: CancellationToken,
        supervisor: &ConnectionSupervisor,
    ) -> ConsumerExit {
        info!("Creation consumer started");

        loop {
            if token.is_cancelled() {
                info!("Creation consumer cancelled");
                return ConsumerExit::Cancelled;
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Creation consumer cancelled");
                    return ConsumerExit::Cancelled;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.process_delivery(&delivery).await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Delivery channel failed, requesting reconnect");
                    supervisor.request_reconnect();
                    return ConsumerExit::ChannelClosed;
                }
                None => {
                    warn!("Delivery channel closed, requesting reconnect");
                    supervisor.request_reconnect();
                    return ConsumerExit::ChannelClosed;
                }
            }
        }
    }

    /// Handle one delivery and settle it
    pub async fn process_delivery(&self, delivery: &Delivery) -> MessageOutcome {
        let started = Instant::now();
        debug!(
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            "Creation request received"
        );

        let outcome = match CreationRequest::parse(&delivery.body) {
            Err(e) => {
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Rejecting invalid creation request"
                );
                Self::nack(delivery, false).await;
                MessageOutcome::Rejected
            }
            Ok(request) => {
                match self
                    .service
                    .create_baby(&request.last_name, &request.room_number, request.parent_id, true)
                    .await
                {
                    Ok(baby) => {
                        info!(
                            baby_id = %baby.id,
                            parent_id = %request.parent_id,
                            room_number = %request.room_number,
                            "Baby created from creation request"
                        );
                        if let Err(e) = delivery.ack().await {
                            warn!(
                                delivery_tag = delivery.delivery_tag,
                                error = %e,
                                "Failed to acknowledge creation request, it may be redelivered"
                            );
                        }
                        MessageOutcome::Acked
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(
                            delivery_tag = delivery.delivery_tag,
                            parent_id = %request.parent_id,
                            error = %e,
                            "Creation failed, requeueing request"
                        );
                        Self::nack(delivery, true).await;
                        MessageOutcome::Requeued
                    }
                    Err(e) => {
                        warn!(
                            delivery_tag = delivery.delivery_tag,
                            parent_id = %request.parent_id,
                            error = %e,
                            "Creation request refused by service, rejecting"
                        );
                        Self::nack(delivery, false).await;
                        MessageOutcome::Rejected
                    }
                }
            }
        };

        self.metrics.creation_message(outcome.as_str(), started.elapsed());
        outcome
    }

    async fn nack(delivery: &Delivery, requeue: bool) {
        if let Err(e) = delivery.nack(requeue).await {
            warn!(
                delivery_tag = delivery.delivery_tag,
                requeue,
                error = %e,
                "Failed to nack creation request"
            );
        }
    }
}

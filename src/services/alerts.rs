//! Alert trigger invoked when a measurement is recorded

use crate::messaging::AlertPublisher;
use crate::models::Measurement;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// Raises alerts for critical measurements without blocking the caller
#[derive(Clone)]
pub struct AlertDispatcher {
    publisher: Arc<dyn AlertPublisher>,
}

impl AlertDispatcher {
    pub fn new(publisher: Arc<dyn AlertPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish an alert for `measurement` if it is red.
    ///
    /// The publish runs on a detached task that outlives the caller's request;
    /// failures are logged there and never reach the caller. The handle is
    /// returned for callers that want to wait on delivery.
    pub fn on_measurement_recorded(&self, baby_id: Uuid, measurement: Measurement) -> Option<JoinHandle<()>> {
        if !measurement.is_critical() {
            debug!(
                baby_id = %baby_id,
                measurement_id = %measurement.id,
                safety_status = %measurement.safety_status,
                "Measurement not critical, no alert"
            );
            return None;
        }

        let publisher = self.publisher.clone();
        Some(tokio::spawn(async move {
            let measurement_id = measurement.id;
            if let Err(e) = publisher.publish_alert(baby_id, measurement).await {
                error!(
                    baby_id = %baby_id,
                    measurement_id = %measurement_id,
                    error = %e,
                    "Alert could not be delivered"
                );
            }
        }))
    }
}

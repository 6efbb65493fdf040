//! Shared harness for the messaging integration tests
//!
//! Everything runs against the in-memory broker with short retry delays.

#![allow(dead_code)]

use async_trait::async_trait;
use care_messaging::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use care_messaging::messaging::{
    ConnectionRole, ConnectionSupervisor, ConsumerLifecycle, CreationConsumer, EventPublisher,
    InMemoryBroker, QueueSpec, RetryPolicy, PUBLISH_BREAKER_NAME,
};
use care_messaging::metrics::{MetricsSink, NoopMetrics};
use care_messaging::models::Baby;
use care_messaging::services::{BabyCreationService, ServiceError};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const ALERTS_QUEUE: &str = "baby_alerts";
pub const CREATION_QUEUE: &str = "baby.creation.requests";

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(20),
        reconnect_backoff: Duration::from_millis(20),
        latency_budget: Duration::from_secs(15),
    }
}

pub async fn start_publisher(broker: &InMemoryBroker, metrics: Arc<dyn MetricsSink>) -> EventPublisher {
    let supervisor = ConnectionSupervisor::start(
        ConnectionRole::Publisher,
        Arc::new(broker.clone()),
        "memory://",
        QueueSpec::durable(ALERTS_QUEUE),
        fast_policy(),
        metrics.clone(),
    )
    .await
    .expect("publisher supervisor");
    let breaker = CircuitBreaker::new(PUBLISH_BREAKER_NAME, CircuitBreakerConfig::for_broker())
        .with_metrics(metrics.clone());
    EventPublisher::new(supervisor, breaker, fast_policy()).with_metrics(metrics)
}

pub async fn start_consumer(
    broker: &InMemoryBroker,
    service: Arc<dyn BabyCreationService>,
    metrics: Arc<dyn MetricsSink>,
) -> ConsumerLifecycle {
    let supervisor = ConnectionSupervisor::start(
        ConnectionRole::Consumer,
        Arc::new(broker.clone()),
        "memory://",
        QueueSpec::durable(CREATION_QUEUE),
        fast_policy(),
        metrics.clone(),
    )
    .await
    .expect("consumer supervisor");
    let consumer = CreationConsumer::new(service).with_metrics(metrics);
    ConsumerLifecycle::new(supervisor, consumer)
}

pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

/// One call seen by [`RecordingService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCall {
    pub last_name: String,
    pub room_number: String,
    pub parent_id: Uuid,
    pub acting_as_system: bool,
}

/// Creation service that records calls and fails the first `failures` of them
#[derive(Default)]
pub struct RecordingService {
    calls: Mutex<Vec<CreateCall>>,
    failures: Mutex<u32>,
}

impl RecordingService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(failures),
        })
    }

    pub fn calls(&self) -> Vec<CreateCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BabyCreationService for RecordingService {
    async fn create_baby(
        &self,
        last_name: &str,
        room_number: &str,
        parent_id: Uuid,
        acting_as_system: bool,
    ) -> Result<Baby, ServiceError> {
        self.calls.lock().push(CreateCall {
            last_name: last_name.to_string(),
            room_number: room_number.to_string(),
            parent_id,
            acting_as_system,
        });

        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(ServiceError::Unavailable("database unavailable".to_string()));
        }
        Ok(Baby::new(last_name, room_number, parent_id))
    }
}

pub fn creation_request(parent_id: Uuid, last_name: &str, room_number: &str) -> String {
    serde_json::json!({
        "user_id": parent_id.to_string(),
        "last_name": last_name,
        "room_number": room_number,
    })
    .to_string()
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Value of the sample `name{labels}` in Prometheus text output
pub fn sample_value(output: &str, name: &str, labels: &str) -> Option<f64> {
    let prefix = format!("{}{{{}}} ", name, labels);
    output
        .lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .and_then(|value| value.trim().parse().ok())
}

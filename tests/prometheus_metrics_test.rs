//! Metrics recorded by a running publisher and consumer

mod common;

use care_messaging::messaging::{AlertPublisher, InMemoryBroker};
use care_messaging::metrics::PrometheusMetrics;
use care_messaging::models::{Measurement, MeasurementType};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn test_publish_and_consume_are_counted() {
    let broker = InMemoryBroker::new();
    let metrics = Arc::new(PrometheusMetrics::new().unwrap());

    let publisher = start_publisher(&broker, metrics.clone()).await;
    let baby_id = Uuid::new_v4();
    let fever = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Temperature, 39.4);
    publisher.publish_alert(baby_id, fever).await.unwrap();

    let lifecycle = start_consumer(&broker, RecordingService::new(), metrics.clone()).await;
    broker.push(CREATION_QUEUE, creation_request(Uuid::new_v4(), "Smith", "101"));
    broker.push(CREATION_QUEUE, "{}");
    lifecycle.start(CancellationToken::new()).await.unwrap();
    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 1 && broker.rejected(CREATION_QUEUE).len() == 1 }).await;

    let output = metrics.gather_text();
    assert_eq!(
        sample_value(
            &output,
            "care_alerts_published_total",
            r#"alert_type="high_temperature_critical""#
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&output, "care_creation_messages_total", r#"outcome="acked""#),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&output, "care_creation_messages_total", r#"outcome="rejected""#),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&output, "care_circuit_breaker_state", r#"name="rabbitmq""#),
        Some(0.0)
    );
    assert!(output.contains("# TYPE care_alert_publish_latency_seconds histogram"));

    lifecycle.stop().await;
    publisher.close().await;
}

#[tokio::test]
async fn test_failed_publish_and_reconnect_are_counted() {
    let broker = InMemoryBroker::new();
    let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    let publisher = start_publisher(&broker, metrics.clone()).await;

    broker.set_unreachable(true);
    let baby_id = Uuid::new_v4();
    let cold = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Temperature, 34.8);
    assert!(publisher.publish_alert(baby_id, cold).await.is_err());

    // Let at least one full reconnection round fail
    tokio::time::sleep(Duration::from_millis(150)).await;
    broker.set_unreachable(false);
    eventually(|| async {
        metrics
            .broker_reconnects
            .with_label_values(&["publisher", "success"])
            .get()
            >= 1.0
    })
    .await;

    let output = metrics.gather_text();
    assert_eq!(
        sample_value(
            &output,
            "care_alert_publish_failures_total",
            r#"reason="retries_exhausted""#
        ),
        Some(1.0)
    );
    assert!(
        sample_value(
            &output,
            "care_broker_reconnects_total",
            r#"result="failure",role="publisher""#
        )
        .unwrap_or_default()
            >= 1.0
    );

    publisher.close().await;
}

//! End-to-end behavior of the publisher, consumer and lifecycle on the in-memory broker

mod common;

use care_messaging::messaging::{AlertPublisher, ConsumerStart, InMemoryBroker};
use care_messaging::models::{Measurement, MeasurementType};
use care_messaging::services::AlertDispatcher;
use common::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn test_high_temperature_alert_reaches_queue() {
    let broker = InMemoryBroker::new();
    let publisher = start_publisher(&broker, noop()).await;
    let baby_id = Uuid::new_v4();
    let measurement = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Temperature, 39.0);

    publisher.publish_alert(baby_id, measurement).await.unwrap();

    let messages = broker.messages(ALERTS_QUEUE);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].properties.persistent);

    let body: serde_json::Value = serde_json::from_slice(&messages[0].body).unwrap();
    assert_eq!(body["alert_type"], "high_temperature_critical");
    assert_eq!(body["severity"], "critical");
    assert_eq!(body["safety_status"], "red");
    assert_eq!(body["baby_id"], baby_id.to_string());
    assert_eq!(body["measurement"]["type"], "temperature");
    assert_eq!(body["measurement"]["value"], 39.0);

    publisher.close().await;
}

#[tokio::test]
async fn test_dispatcher_publishes_only_critical_measurements() {
    let broker = InMemoryBroker::new();
    let publisher = Arc::new(start_publisher(&broker, noop()).await);
    let dispatcher = AlertDispatcher::new(publisher.clone());
    let baby_id = Uuid::new_v4();

    let fine = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Temperature, 37.0);
    assert!(dispatcher.on_measurement_recorded(baby_id, fine).is_none());

    let cold = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Temperature, 35.2);
    dispatcher
        .on_measurement_recorded(baby_id, cold)
        .unwrap()
        .await
        .unwrap();

    let messages = broker.messages(ALERTS_QUEUE);
    assert_eq!(messages.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&messages[0].body).unwrap();
    assert_eq!(body["alert_type"], "low_temperature_critical");

    publisher.close().await;
}

#[tokio::test]
async fn test_publisher_recovers_after_broker_restart() {
    let broker = InMemoryBroker::new();
    let publisher = start_publisher(&broker, noop()).await;
    broker.sever_connections();

    let baby_id = Uuid::new_v4();
    let measurement = Measurement::new(baby_id, Uuid::new_v4(), MeasurementType::Weight, 0.0);
    publisher.publish_alert(baby_id, measurement).await.unwrap();

    let messages = broker.messages(ALERTS_QUEUE);
    assert_eq!(messages.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&messages[0].body).unwrap();
    assert_eq!(body["alert_type"], "invalid_weight");

    publisher.close().await;
}

#[tokio::test]
async fn test_valid_request_creates_once_and_acks_once() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::new();
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    let parent_id = Uuid::new_v4();

    broker.push(CREATION_QUEUE, creation_request(parent_id, "Smith", "101"));
    lifecycle.start(CancellationToken::new()).await.unwrap();

    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 1 }).await;
    assert_eq!(
        service.calls(),
        vec![CreateCall {
            last_name: "Smith".to_string(),
            room_number: "101".to_string(),
            parent_id,
            acting_as_system: true,
        }]
    );
    assert_eq!(broker.ready_len(CREATION_QUEUE), 0);
    assert_eq!(broker.unacked_len(CREATION_QUEUE), 0);

    lifecycle.stop().await;
}

#[tokio::test]
async fn test_poison_message_does_not_block_queue() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::new();
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    let parent_id = Uuid::new_v4();

    broker.push(CREATION_QUEUE, creation_request(parent_id, "", "101"));
    broker.push(CREATION_QUEUE, creation_request(parent_id, "Jones", "102"));
    lifecycle.start(CancellationToken::new()).await.unwrap();

    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 1 }).await;
    assert_eq!(broker.rejected(CREATION_QUEUE).len(), 1);
    assert_eq!(service.calls().len(), 1);
    assert_eq!(service.calls()[0].last_name, "Jones");

    lifecycle.stop().await;
}

#[tokio::test]
async fn test_transient_failure_is_redelivered_and_retried() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::failing_first(1);
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    let parent_id = Uuid::new_v4();

    broker.push(CREATION_QUEUE, creation_request(parent_id, "Smith", "101"));
    lifecycle.start(CancellationToken::new()).await.unwrap();

    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 1 }).await;
    let calls = service.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    assert!(broker.rejected(CREATION_QUEUE).is_empty());

    lifecycle.stop().await;
}

#[tokio::test]
async fn test_concurrent_starts_register_one_consumer() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::new();
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    let token = CancellationToken::new();

    let (a, b) = tokio::join!(lifecycle.start(token.clone()), lifecycle.start(token.clone()));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o == ConsumerStart::AlreadyRunning);
    assert_eq!(outcomes, vec![ConsumerStart::Started, ConsumerStart::AlreadyRunning]);

    for i in 0..3 {
        broker.push(
            CREATION_QUEUE,
            creation_request(Uuid::new_v4(), "Smith", &format!("10{}", i)),
        );
    }
    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 3 }).await;
    assert_eq!(service.calls().len(), 3);

    lifecycle.stop().await;
}

#[tokio::test]
async fn test_consumption_resumes_after_reconnect() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::new();
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    lifecycle.start(CancellationToken::new()).await.unwrap();

    broker.sever_connections();
    eventually(|| async { broker.live_connections() == 1 && lifecycle.is_running().await }).await;

    broker.push(CREATION_QUEUE, creation_request(Uuid::new_v4(), "Smith", "101"));
    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 1 }).await;
    assert_eq!(service.calls().len(), 1);

    lifecycle.stop().await;
}

#[tokio::test]
async fn test_cancelled_signal_is_not_restarted_after_reconnect() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::new();
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    let token = CancellationToken::new();
    lifecycle.start(token.clone()).await.unwrap();

    token.cancel();
    eventually(|| async { !lifecycle.is_running().await }).await;

    broker.sever_connections();
    broker.push(CREATION_QUEUE, creation_request(Uuid::new_v4(), "Smith", "101"));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(!lifecycle.is_running().await);
    assert!(service.calls().is_empty());

    lifecycle.stop().await;
}

#[tokio::test]
async fn test_consumer_started_during_outage_runs_once_broker_returns() {
    let broker = InMemoryBroker::new();
    let service = RecordingService::new();
    let lifecycle = start_consumer(&broker, service.clone(), noop()).await;
    broker.set_unreachable(true);
    broker.sever_connections();

    assert!(lifecycle.start(CancellationToken::new()).await.is_err());
    assert!(!lifecycle.is_running().await);

    broker.set_unreachable(false);
    eventually(|| async { broker.live_connections() == 1 && lifecycle.is_running().await }).await;

    broker.push(CREATION_QUEUE, creation_request(Uuid::new_v4(), "Smith", "101"));
    eventually(|| async { broker.acked_count(CREATION_QUEUE) == 1 }).await;
    assert_eq!(service.calls().len(), 1);

    lifecycle.stop().await;
}

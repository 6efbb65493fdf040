//! Broker transport abstractions
//!
//! The supervisor, publisher and consumer only talk to these traits. The AMQP
//! transport and the in-memory broker both implement them.

use crate::messaging::error::MessagingResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Queue declaration parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl QueueSpec {
    /// Durable, shared, never auto-deleted queue
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            exclusive: false,
        }
    }
}

/// Properties stamped on a published message
#[derive(Debug, Clone, PartialEq)]
pub struct PublishProperties {
    pub content_type: String,
    /// Survives a broker restart (AMQP delivery mode 2)
    pub persistent: bool,
    pub timestamp: DateTime<Utc>,
}

impl PublishProperties {
    /// Persistent JSON message stamped now
    pub fn persistent_json() -> Self {
        Self {
            content_type: "application/json".to_string(),
            persistent: true,
            timestamp: Utc::now(),
        }
    }
}

/// Dials the broker
#[async_trait]
pub trait BrokerConnector: Send + Sync + fmt::Debug {
    /// Open a connection and channel to `address` and declare `queue` on it.
    /// Declaring is idempotent.
    async fn connect(&self, address: &str, queue: &QueueSpec) -> MessagingResult<Arc<dyn BrokerConnection>>;
}

/// A live session to the broker: transport plus one channel
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// True once either the transport or the channel is gone
    fn is_closed(&self) -> bool;

    /// Publish `payload` directly to `queue` through the default exchange
    async fn publish(&self, queue: &str, payload: &[u8], properties: &PublishProperties) -> MessagingResult<()>;

    /// Register a manual-ack consumer on `queue` with the given prefetch
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> MessagingResult<Box<dyn DeliveryStream>>;

    /// Close channel and transport
    async fn close(&self) -> MessagingResult<()>;
}

/// Deliveries pushed by the broker to one consumer
#[async_trait]
pub trait DeliveryStream: Send {
    /// Next delivery; `None` once the delivery channel has closed
    async fn next(&mut self) -> Option<MessagingResult<Delivery>>;
}

/// Settles one delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> MessagingResult<()>;

    async fn nack(&self, requeue: bool) -> MessagingResult<()>;
}

/// A message handed to a consumer, awaiting ack or nack
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, redelivered: bool, body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            delivery_tag,
            redelivered,
            body,
            acker,
        }
    }

    pub async fn ack(&self) -> MessagingResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> MessagingResult<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

//! RabbitMQ transport over AMQP 0-9-1

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    Acknowledger, BrokerConnection, BrokerConnector, Delivery, DeliveryStream, PublishProperties,
    QueueSpec,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use tracing::{debug, warn};

/// AMQP delivery mode for messages written to disk
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Connector dialing RabbitMQ
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    connection_name: String,
}

impl AmqpConnector {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
        }
    }
}

impl Default for AmqpConnector {
    fn default() -> Self {
        Self::new("care-messaging")
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, address: &str, queue: &QueueSpec) -> MessagingResult<Arc<dyn BrokerConnection>> {
        let properties =
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into());

        let connection = Connection::connect(address, properties)
            .await
            .map_err(|e| MessagingError::Transient(format!("AMQP dial failed: {}", e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(0, "channel open failed").await;
                return Err(MessagingError::Transient(format!("AMQP channel open failed: {}", e)));
            }
        };

        let declare = QueueDeclareOptions {
            durable: queue.durable,
            auto_delete: queue.auto_delete,
            exclusive: queue.exclusive,
            ..QueueDeclareOptions::default()
        };
        if let Err(e) = channel
            .queue_declare(&queue.name, declare, FieldTable::default())
            .await
        {
            let _ = channel.close(0, "queue declare failed").await;
            let _ = connection.close(0, "queue declare failed").await;
            return Err(MessagingError::Transient(format!(
                "AMQP queue declare '{}' failed: {}",
                queue.name, e
            )));
        }

        debug!(queue = %queue.name, "AMQP connection established");
        Ok(Arc::new(AmqpConnection { connection, channel }))
    }
}

/// Connection plus its single channel
pub struct AmqpConnection {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_closed(&self) -> bool {
        !self.connection.status().connected() || !self.channel.status().connected()
    }

    async fn publish(&self, queue: &str, payload: &[u8], properties: &PublishProperties) -> MessagingResult<()> {
        let mut amqp_properties = BasicProperties::default()
            .with_content_type(properties.content_type.clone().into())
            .with_timestamp(properties.timestamp.timestamp().max(0) as u64);
        if properties.persistent {
            amqp_properties = amqp_properties.with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        }

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, amqp_properties)
            .await
            .map_err(|e| MessagingError::Transient(format!("AMQP publish failed: {}", e)))?
            .await
            .map_err(|e| MessagingError::Transient(format!("AMQP publish not confirmed: {}", e)))?;

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> MessagingResult<Box<dyn DeliveryStream>> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::Transient(format!("AMQP qos failed: {}", e)))?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Transient(format!("AMQP consume failed: {}", e)))?;

        Ok(Box::new(AmqpDeliveryStream { consumer }))
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "OK").await {
                warn!(error = %e, "Error closing AMQP channel");
            }
        }
        if self.connection.status().connected() {
            self.connection.close(200, "OK").await?;
        }
        Ok(())
    }
}

/// Stream over an AMQP consumer
pub struct AmqpDeliveryStream {
    consumer: Consumer,
}

#[async_trait]
impl DeliveryStream for AmqpDeliveryStream {
    async fn next(&mut self) -> Option<MessagingResult<Delivery>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|d| {
                    Delivery::new(
                        d.delivery_tag,
                        d.redelivered,
                        d.data,
                        Box::new(AmqpAcker { acker: d.acker }),
                    )
                })
                .map_err(MessagingError::from),
        )
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> MessagingResult<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> MessagingResult<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

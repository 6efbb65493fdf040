//! Connection supervisor shared by the publisher and the consumer
//!
//! Each owning component gets its own supervisor. The supervisor dials with a
//! bounded retry, keeps the live connection behind a read-biased lock, and runs a
//! background reconnection loop fed by a coalescing signal queue.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{BrokerConnection, BrokerConnector, QueueSpec};
use crate::metrics::MetricsSink;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which component owns a supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    Publisher,
    Consumer,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Publisher => "publisher",
            ConnectionRole::Consumer => "consumer",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry and latency constants for broker operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per dial and per publish
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Pause before a failed reconnection is re-queued
    pub reconnect_backoff: Duration,
    /// Soft bound on a full publish; exceeding it only logs
    pub latency_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(5),
            latency_budget: Duration::from_secs(15),
        }
    }
}

struct SupervisorInner {
    role: ConnectionRole,
    address: String,
    queue: QueueSpec,
    connector: Arc<dyn BrokerConnector>,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
    connection: RwLock<Option<Arc<dyn BrokerConnection>>>,
    reconnect_tx: mpsc::Sender<()>,
    generation: watch::Sender<u64>,
    stop: CancellationToken,
}

/// Owns one broker connection and keeps it alive
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
    reconnect_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Dial the broker and start the reconnection loop.
    ///
    /// Fails with [`MessagingError::Transient`] once every dial attempt has failed.
    pub async fn start(
        role: ConnectionRole,
        connector: Arc<dyn BrokerConnector>,
        address: impl Into<String>,
        queue: QueueSpec,
        policy: RetryPolicy,
        metrics: Arc<dyn MetricsSink>,
    ) -> MessagingResult<Self> {
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (generation, _) = watch::channel(0);

        let inner = Arc::new(SupervisorInner {
            role,
            address: address.into(),
            queue,
            connector,
            policy,
            metrics,
            connection: RwLock::new(None),
            reconnect_tx,
            generation,
            stop: CancellationToken::new(),
        });

        let connection = inner.connect_with_retry().await?;
        *inner.connection.write().await = Some(connection);

        info!(role = %role, queue = %inner.queue.name, "Broker connection established");

        let handle = tokio::spawn(SupervisorInner::reconnection_loop(inner.clone(), reconnect_rx));

        Ok(Self {
            inner,
            reconnect_loop: parking_lot::Mutex::new(Some(handle)),
        })
    }

    pub fn role(&self) -> ConnectionRole {
        self.inner.role
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.inner.queue
    }

    /// Current connection, if one is installed. It may still have closed underneath.
    pub async fn connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.inner.connection.read().await.clone()
    }

    /// Ask the reconnection loop to replace the connection. Never blocks; at most
    /// one request is kept pending.
    pub fn request_reconnect(&self) {
        self.inner.request_reconnect();
    }

    /// Number of successful reconnections so far
    pub fn generation(&self) -> u64 {
        *self.inner.generation.borrow()
    }

    /// Notified after every successful reconnection
    pub fn subscribe_reconnects(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Stop the reconnection loop and close the connection. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.stop.cancel();

        let handle = self.reconnect_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(role = %self.inner.role, error = %e, "Reconnection loop panicked");
            }
        }

        let connection = self.inner.connection.write().await.take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!(role = %self.inner.role, error = %e, "Error closing broker connection");
            }
            info!(role = %self.inner.role, "Broker connection closed");
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.inner.stop.cancel();
    }
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("role", &self.inner.role)
            .field("queue", &self.inner.queue.name)
            .field("generation", &self.generation())
            .finish()
    }
}

impl SupervisorInner {
    fn request_reconnect(&self) {
        match self.reconnect_tx.try_send(()) {
            Ok(()) => debug!(role = %self.role, "Reconnect requested"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!(role = %self.role, "Reconnect already pending")
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!(role = %self.role, "Reconnection loop stopped, ignoring request")
            }
        }
    }

    async fn connect_with_retry(&self) -> MessagingResult<Arc<dyn BrokerConnection>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if self.stop.is_cancelled() {
                return Err(MessagingError::Shutdown);
            }

            let dial = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(MessagingError::Shutdown),
                dial = self.connector.connect(&self.address, &self.queue) => dial,
            };

            match dial {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!(
                        role = %self.role,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Broker connection attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => return Err(MessagingError::Shutdown),
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }
        }

        Err(MessagingError::Transient(format!(
            "{} could not connect after {} attempts: {}",
            self.role, max_attempts, last_error
        )))
    }

    async fn reconnection_loop(inner: Arc<Self>, mut signals: mpsc::Receiver<()>) {
        debug!(role = %inner.role, "Reconnection loop started");

        loop {
            tokio::select! {
                biased;
                _ = inner.stop.cancelled() => break,
                signal = signals.recv() => {
                    if signal.is_none() {
                        break;
                    }
                }
            }

            match inner.reconnect().await {
                Ok(()) => {
                    // Requests raised against the old connection are satisfied
                    while signals.try_recv().is_ok() {}
                }
                Err(MessagingError::Shutdown) => break,
                Err(e) => {
                    warn!(
                        role = %inner.role,
                        error = %e,
                        backoff_ms = inner.policy.reconnect_backoff.as_millis() as u64,
                        "Reconnection failed, retrying after backoff"
                    );
                    tokio::select! {
                        biased;
                        _ = inner.stop.cancelled() => break,
                        _ = tokio::time::sleep(inner.policy.reconnect_backoff) => {}
                    }
                    inner.request_reconnect();
                }
            }
        }

        debug!(role = %inner.role, "Reconnection loop stopped");
    }

    async fn reconnect(&self) -> MessagingResult<()> {
        {
            let mut current = self.connection.write().await;
            if let Some(stale) = current.take() {
                if let Err(e) = stale.close().await {
                    debug!(role = %self.role, error = %e, "Error closing stale connection");
                }
            }
        }

        let result = self.connect_with_retry().await;
        match result {
            Ok(connection) => {
                *self.connection.write().await = Some(connection);
                self.generation.send_modify(|g| *g += 1);
                self.metrics.broker_reconnect(self.role.as_str(), true);
                info!(
                    role = %self.role,
                    generation = *self.generation.borrow(),
                    "Reconnected to broker"
                );
                Ok(())
            }
            Err(MessagingError::Shutdown) => Err(MessagingError::Shutdown),
            Err(e) => {
                self.metrics.broker_reconnect(self.role.as_str(), false);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::memory::InMemoryBroker;
    use crate::metrics::NoopMetrics;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
            reconnect_backoff: Duration::from_millis(20),
            latency_budget: Duration::from_secs(1),
        }
    }

    async fn start(broker: &InMemoryBroker) -> MessagingResult<ConnectionSupervisor> {
        ConnectionSupervisor::start(
            ConnectionRole::Publisher,
            Arc::new(broker.clone()),
            "memory://",
            QueueSpec::durable("baby_alerts"),
            fast_policy(),
            Arc::new(NoopMetrics),
        )
        .await
    }

    #[tokio::test]
    async fn test_initial_connect_retries() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(2);

        let supervisor = start(&broker).await.unwrap();
        assert_eq!(broker.connect_count(), 3);
        assert!(supervisor.connection().await.is_some());
        assert!(broker.queue_spec("baby_alerts").unwrap().durable);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_initial_connect_exhausts_to_transient() {
        let broker = InMemoryBroker::new();
        broker.set_unreachable(true);

        let result = start(&broker).await;
        assert!(matches!(result, Err(MessagingError::Transient(_))));
        assert_eq!(broker.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_connection() {
        let broker = InMemoryBroker::new();
        let supervisor = start(&broker).await.unwrap();
        let mut reconnects = supervisor.subscribe_reconnects();
        let first = supervisor.connection().await.unwrap();

        broker.sever_connections();
        assert!(first.is_closed());
        supervisor.request_reconnect();
        supervisor.request_reconnect();

        tokio::time::timeout(Duration::from_secs(1), reconnects.changed())
            .await
            .unwrap()
            .unwrap();
        let second = supervisor.connection().await.unwrap();
        assert!(!second.is_closed());
        assert_eq!(supervisor.generation(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_reconnect_requeues_itself() {
        let broker = InMemoryBroker::new();
        let supervisor = start(&broker).await.unwrap();
        let mut reconnects = supervisor.subscribe_reconnects();

        broker.fail_next_connects(4);
        supervisor.request_reconnect();

        tokio::time::timeout(Duration::from_secs(2), reconnects.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(broker.connect_count(), 1 + 5);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let broker = InMemoryBroker::new();
        let supervisor = start(&broker).await.unwrap();

        supervisor.shutdown().await;
        supervisor.shutdown().await;
        assert!(supervisor.is_shut_down());
        assert!(supervisor.connection().await.is_none());
        assert_eq!(broker.live_connections(), 0);
    }
}

//! In-process broker implementing the transport seam
//!
//! Used by the test suite and by `broker.backend = "in_memory"`. It models the
//! parts of RabbitMQ the messaging core relies on: durable queues, per-consumer
//! prefetch, manual ack/nack with requeue to the head of the queue, and
//! redelivery of unacknowledged messages when a connection goes away.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    Acknowledger, BrokerConnection, BrokerConnector, Delivery, DeliveryStream, PublishProperties,
    QueueSpec,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// A message held by the broker
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub properties: PublishProperties,
    pub redelivered: bool,
}

struct Unacked {
    connection_id: u64,
    consumer_id: u64,
    message: StoredMessage,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
    acked: u64,
    rejected: Vec<StoredMessage>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            acked: 0,
            rejected: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn in_flight(&self, consumer_id: u64) -> usize {
        self.unacked
            .values()
            .filter(|u| u.consumer_id == consumer_id)
            .count()
    }
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, QueueState>>,
    connections: Mutex<Vec<(u64, Arc<AtomicBool>)>>,
    unreachable: AtomicBool,
    fail_connects: AtomicU32,
    fail_publishes: AtomicU32,
    connect_count: AtomicU64,
    next_id: AtomicU64,
}

impl BrokerState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn queue_notify(&self, queue: &str) -> Arc<Notify> {
        let mut queues = self.queues.lock();
        queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(QueueSpec::durable(queue)))
            .notify
            .clone()
    }

    /// Close `connection_id` and hand its unacknowledged messages back to their queues
    fn release_connection(&self, connection_id: u64) {
        let mut notifies = Vec::new();
        {
            let mut queues = self.queues.lock();
            for queue in queues.values_mut() {
                let mut tags: Vec<u64> = queue
                    .unacked
                    .iter()
                    .filter(|(_, u)| u.connection_id == connection_id)
                    .map(|(tag, _)| *tag)
                    .collect();
                tags.sort_unstable_by(|a, b| b.cmp(a));
                for tag in tags {
                    if let Some(entry) = queue.unacked.remove(&tag) {
                        let mut message = entry.message;
                        message.redelivered = true;
                        queue.ready.push_front(message);
                    }
                }
                notifies.push(queue.notify.clone());
            }
        }
        self.connections.lock().retain(|(id, _)| *id != connection_id);
        for notify in notifies {
            notify.notify_waiters();
        }
    }
}

/// Decrement `counter` if positive; true when a failure should be injected
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Shared handle to an in-process broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every dial and publish fails
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `n` dial attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` publishes
    pub fn fail_next_publishes(&self, n: u32) {
        self.state.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Drop every live connection, as a broker restart would
    pub fn sever_connections(&self) {
        let live: Vec<(u64, Arc<AtomicBool>)> = self.state.connections.lock().clone();
        for (id, closed) in live {
            closed.store(true, Ordering::SeqCst);
            self.state.release_connection(id);
        }
    }

    /// Enqueue a message as an external producer would
    pub fn push(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let notify = {
            let mut queues = self.state.queues.lock();
            let q = queues
                .entry(queue.to_string())
                .or_insert_with(|| QueueState::new(QueueSpec::durable(queue)));
            q.ready.push_back(StoredMessage {
                body: body.into(),
                properties: PublishProperties::persistent_json(),
                redelivered: false,
            });
            q.notify.clone()
        };
        notify.notify_waiters();
    }

    /// Messages waiting for delivery on `queue`
    pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.state
            .queues
            .lock()
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ready_len(&self, queue: &str) -> usize {
        self.state.queues.lock().get(queue).map_or(0, |q| q.ready.len())
    }

    pub fn unacked_len(&self, queue: &str) -> usize {
        self.state.queues.lock().get(queue).map_or(0, |q| q.unacked.len())
    }

    pub fn acked_count(&self, queue: &str) -> u64 {
        self.state.queues.lock().get(queue).map_or(0, |q| q.acked)
    }

    /// Messages rejected without requeue
    pub fn rejected(&self, queue: &str) -> Vec<StoredMessage> {
        self.state
            .queues
            .lock()
            .get(queue)
            .map(|q| q.rejected.clone())
            .unwrap_or_default()
    }

    /// Declaration of `queue`, if it exists
    pub fn queue_spec(&self, queue: &str) -> Option<QueueSpec> {
        self.state.queues.lock().get(queue).map(|q| q.spec.clone())
    }

    /// Dial attempts so far, failed ones included
    pub fn connect_count(&self) -> u64 {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    pub fn live_connections(&self) -> usize {
        self.state.connections.lock().len()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("live_connections", &self.live_connections())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self, address: &str, queue: &QueueSpec) -> MessagingResult<Arc<dyn BrokerConnection>> {
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);

        if self.state.unreachable.load(Ordering::SeqCst) || take_one(&self.state.fail_connects) {
            return Err(MessagingError::Transient(format!("connection refused: {}", address)));
        }

        self.state
            .queues
            .lock()
            .entry(queue.name.clone())
            .or_insert_with(|| QueueState::new(queue.clone()));

        let id = self.state.next_id();
        let closed = Arc::new(AtomicBool::new(false));
        self.state.connections.lock().push((id, closed.clone()));

        debug!(connection_id = id, queue = %queue.name, "In-memory connection opened");
        Ok(Arc::new(MemoryConnection {
            id,
            closed,
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    closed: Arc<AtomicBool>,
    state: Arc<BrokerState>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> MessagingResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MessagingError::Transient("channel closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn publish(&self, queue: &str, payload: &[u8], properties: &PublishProperties) -> MessagingResult<()> {
        self.ensure_open()?;
        if self.state.unreachable.load(Ordering::SeqCst) || take_one(&self.state.fail_publishes) {
            return Err(MessagingError::Transient("publish not confirmed".to_string()));
        }

        let notify = {
            let mut queues = self.state.queues.lock();
            let q = queues
                .entry(queue.to_string())
                .or_insert_with(|| QueueState::new(QueueSpec::durable(queue)));
            q.ready.push_back(StoredMessage {
                body: payload.to_vec(),
                properties: properties.clone(),
                redelivered: false,
            });
            q.notify.clone()
        };
        notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        prefetch: u16,
    ) -> MessagingResult<Box<dyn DeliveryStream>> {
        self.ensure_open()?;
        let notify = self.state.queue_notify(queue);
        Ok(Box::new(MemoryDeliveryStream {
            queue: queue.to_string(),
            consumer_id: self.state.next_id(),
            connection_id: self.id,
            prefetch: usize::from(prefetch.max(1)),
            closed: self.closed.clone(),
            state: self.state.clone(),
            notify,
        }))
    }

    async fn close(&self) -> MessagingResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.release_connection(self.id);
        }
        Ok(())
    }
}

struct MemoryDeliveryStream {
    queue: String,
    consumer_id: u64,
    connection_id: u64,
    prefetch: usize,
    closed: Arc<AtomicBool>,
    state: Arc<BrokerState>,
    notify: Arc<Notify>,
}

impl MemoryDeliveryStream {
    fn try_take(&self) -> Option<Delivery> {
        let mut queues = self.state.queues.lock();
        let q = queues.get_mut(&self.queue)?;
        if q.in_flight(self.consumer_id) >= self.prefetch {
            return None;
        }
        let message = q.ready.pop_front()?;
        let tag = self.state.next_id();
        let delivery = Delivery::new(
            tag,
            message.redelivered,
            message.body.clone(),
            Box::new(MemoryAcker {
                queue: self.queue.clone(),
                tag,
                closed: self.closed.clone(),
                state: self.state.clone(),
            }),
        );
        q.unacked.insert(
            tag,
            Unacked {
                connection_id: self.connection_id,
                consumer_id: self.consumer_id,
                message,
            },
        );
        Some(delivery)
    }
}

#[async_trait]
impl DeliveryStream for MemoryDeliveryStream {
    async fn next(&mut self) -> Option<MessagingResult<Delivery>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(delivery) = self.try_take() {
                return Some(Ok(delivery));
            }

            notified.await;
        }
    }
}

struct MemoryAcker {
    queue: String,
    tag: u64,
    closed: Arc<AtomicBool>,
    state: Arc<BrokerState>,
}

impl MemoryAcker {
    fn settle(&self, apply: impl FnOnce(&mut QueueState, StoredMessage)) -> MessagingResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::Transient("channel closed".to_string()));
        }
        let notify = {
            let mut queues = self.state.queues.lock();
            let q = queues
                .get_mut(&self.queue)
                .ok_or_else(|| MessagingError::Transient(format!("unknown queue '{}'", self.queue)))?;
            let entry = q
                .unacked
                .remove(&self.tag)
                .ok_or_else(|| MessagingError::Transient(format!("unknown delivery tag {}", self.tag)))?;
            apply(q, entry.message);
            q.notify.clone()
        };
        notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> MessagingResult<()> {
        self.settle(|q, _| q.acked += 1)
    }

    async fn nack(&self, requeue: bool) -> MessagingResult<()> {
        self.settle(|q, mut message| {
            if requeue {
                message.redelivered = true;
                q.ready.push_front(message);
            } else {
                q.rejected.push(message);
            }
        })
    }
}

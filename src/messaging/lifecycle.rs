//! Start/stop control of the creation consumer
//!
//! At most one consumption loop runs per lifecycle. The run state is guarded by
//! an async mutex that is held for the whole of a start, so concurrent starts
//! and reconnect-driven restarts cannot both register a consumer. After every
//! reconnection the loop is restarted with the original run signal, unless
//! that signal has been cancelled.

use crate::messaging::consumer::{consumer_tag, ConsumerExit, CreationConsumer};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::supervisor::ConnectionSupervisor;
use crate::messaging::traits::DeliveryStream;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Unacknowledged deliveries allowed per consumer. Processing is strictly
/// sequential, so this is fixed rather than configurable.
pub const CONSUMER_PREFETCH: u16 = 1;

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStart {
    Started,
    /// A loop was already active; nothing changed
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct ConsumerRunState {
    active: bool,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct LifecycleInner {
    supervisor: ConnectionSupervisor,
    consumer: CreationConsumer,
    state: Mutex<ConsumerRunState>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
    stopped: CancellationToken,
}

/// Owns the consumer's supervisor and its consumption loop
#[derive(Clone)]
pub struct ConsumerLifecycle {
    inner: Arc<LifecycleInner>,
}

impl ConsumerLifecycle {
    pub fn new(supervisor: ConnectionSupervisor, consumer: CreationConsumer) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                supervisor,
                consumer,
                state: Mutex::new(ConsumerRunState::default()),
                watcher: parking_lot::Mutex::new(None),
                stopped: CancellationToken::new(),
            }),
        }
    }

    /// Begin consuming, bound to `token`.
    ///
    /// Returns [`ConsumerStart::AlreadyRunning`] if a loop is active and
    /// [`MessagingError::ConnectionClosed`] if there is no live connection. In
    /// the latter case the signal stays bound and a reconnect is requested, so
    /// consumption begins once the broker is reachable again.
    pub async fn start(&self, token: CancellationToken) -> MessagingResult<ConsumerStart> {
        if self.inner.stopped.is_cancelled() || token.is_cancelled() {
            return Err(MessagingError::Shutdown);
        }

        let mut state = self.inner.state.lock().await;
        if state.active {
            debug!("Consumer already running, start ignored");
            return Ok(ConsumerStart::AlreadyRunning);
        }

        state.token = Some(token.clone());
        self.ensure_watcher();
        let spawned = LifecycleInner::spawn_consumption(&self.inner, &mut state, token).await;
        drop(state);

        match spawned {
            Ok(()) => Ok(ConsumerStart::Started),
            Err(e) => {
                warn!(error = %e, "Consumer start deferred until reconnect");
                self.inner.supervisor.request_reconnect();
                Err(e)
            }
        }
    }

    /// Whether a consumption loop is active
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.active
    }

    /// Cancel consumption, wait for the in-flight message to settle, and close
    /// the connection. Idempotent.
    pub async fn stop(&self) {
        self.inner.stopped.cancel();

        let task = {
            let mut state = self.inner.state.lock().await;
            if let Some(token) = &state.token {
                token.cancel();
            }
            state.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Consumption loop panicked");
            }
        }

        let watcher = self.inner.watcher.lock().take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                error!(error = %e, "Reconnect watcher panicked");
            }
        }

        self.inner.supervisor.shutdown().await;
        info!("Creation consumer stopped");
    }

    fn ensure_watcher(&self) {
        let mut watcher = self.inner.watcher.lock();
        if watcher.is_none() {
            let reconnects = self.inner.supervisor.subscribe_reconnects();
            *watcher = Some(tokio::spawn(LifecycleInner::watch_reconnects(
                self.inner.clone(),
                reconnects,
            )));
        }
    }
}

impl LifecycleInner {
    /// Register a consumer on the current connection and spawn its loop.
    /// Caller holds the run-state lock.
    async fn spawn_consumption(
        inner: &Arc<Self>,
        state: &mut ConsumerRunState,
        token: CancellationToken,
    ) -> MessagingResult<()> {
        let generation = inner.supervisor.generation();
        let connection = inner
            .supervisor
            .connection()
            .await
            .filter(|c| !c.is_closed())
            .ok_or(MessagingError::ConnectionClosed)?;

        let tag = consumer_tag();
        let queue = inner.supervisor.queue().name.clone();
        let stream = connection.consume(&queue, &tag, CONSUMER_PREFETCH).await?;

        info!(queue = %queue, consumer_tag = %tag, prefetch = CONSUMER_PREFETCH, "Consumer registered");

        state.active = true;
        state.task = Some(tokio::spawn(Self::consumption_task(
            inner.clone(),
            stream,
            token,
            generation,
        )));
        Ok(())
    }

    fn consumption_task(
        inner: Arc<Self>,
        stream: Box<dyn DeliveryStream>,
        token: CancellationToken,
        generation: u64,
    ) -> BoxFuture<'static, ()> {
        async move {
            let exit = inner.consumer.run(stream, token, &inner.supervisor).await;

            inner.state.lock().await.active = false;

            // A reconnect that completed while this loop was still winding down
            // was skipped by the watcher
            if exit == ConsumerExit::ChannelClosed && inner.supervisor.generation() != generation {
                Self::try_restart(&inner).await;
            }
        }
        .boxed()
    }

    async fn watch_reconnects(inner: Arc<Self>, mut reconnects: watch::Receiver<u64>) {
        loop {
            tokio::select! {
                biased;
                _ = inner.stopped.cancelled() => break,
                changed = reconnects.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            Self::try_restart(&inner).await;
        }
        debug!("Reconnect watcher stopped");
    }

    async fn try_restart(inner: &Arc<Self>) {
        let mut state = inner.state.lock().await;
        if state.active || inner.stopped.is_cancelled() {
            return;
        }
        let token = match &state.token {
            Some(token) if !token.is_cancelled() => token.clone(),
            _ => return,
        };

        match Self::spawn_consumption(inner, &mut state, token).await {
            Ok(()) => info!("Consumption restarted after reconnect"),
            Err(e) => {
                warn!(error = %e, "Could not restart consumption, requesting reconnect");
                inner.supervisor.request_reconnect();
            }
        }
    }
}

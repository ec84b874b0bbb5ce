//! Queues.
//!
//! A queue has one ready list and one rejected list shared by every
//! connection, plus one unacked list per consuming connection. Consuming is
//! driven by a fetch loop that moves payloads from ready to unacked and a set
//! of consumer tasks that resolve them (see [`worker`]).
//!
//! Consuming goes `Idle -> Consuming -> Stopped`; a stopped queue handle can
//! not consume again.

pub(crate) mod worker;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;
use crate::core::connection::unique_name;
use crate::core::consumer::{BatchConsumer, Consumer, Handler};
use crate::core::delivery::Delivery;
use crate::core::error::{QueueError, QueueResult};
use crate::core::keys::Keys;
use crate::core::store::Store;
use crate::metrics;

/// State shared between a queue handle and its background tasks.
pub(crate) struct QueueInner {
    pub(crate) name: String,
    pub(crate) connection_name: String,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) ready_key: String,
    pub(crate) rejected_key: String,
    pub(crate) unacked_key: String,
    consumers_key: String,
    pub(crate) connection_queues_key: String,
    queues_key: String,
    push_key: RwLock<Option<String>>,
}

impl QueueInner {
    pub(crate) fn delivery(&self, payload: Bytes) -> Delivery {
        Delivery::new(
            payload,
            self.unacked_key.clone(),
            self.rejected_key.clone(),
            self.push_key.read().clone(),
            self.store.clone(),
        )
    }
}

enum ConsumeState {
    Idle,
    Consuming(Consuming),
    Stopped,
}

struct Consuming {
    stop: watch::Sender<bool>,
    fetcher: JoinHandle<()>,
    deliveries: flume::Receiver<Delivery>,
}

struct ConsumerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Queue {
    inner: Arc<QueueInner>,
    state: Mutex<ConsumeState>,
    consumers: DashMap<String, ConsumerTask>,
}

/// Moves up to `limit` entries (all of them when `None`) from the tail of
/// `source` to the head of `destination`, one atomic call per entry.
pub(crate) async fn move_list(
    store: &dyn Store,
    source: &str,
    destination: &str,
    limit: Option<u64>,
) -> QueueResult<u64> {
    let mut moved = 0u64;
    while limit.map_or(true, |limit| moved < limit) {
        if store.rpoplpush(source, destination).await?.is_none() {
            break;
        }
        moved += 1;
    }
    Ok(moved)
}

impl Queue {
    pub(crate) fn new(name: &str, connection_name: &str, keys: Keys, store: Arc<dyn Store>) -> Self {
        let inner = QueueInner {
            name: name.to_string(),
            connection_name: connection_name.to_string(),
            store,
            ready_key: keys.ready(name),
            rejected_key: keys.rejected(name),
            unacked_key: keys.unacked(connection_name, name),
            consumers_key: keys.consumers(connection_name, name),
            connection_queues_key: keys.connection_queues(connection_name),
            queues_key: keys.queues(),
            push_key: RwLock::new(None),
        };
        Self {
            inner: Arc::new(inner),
            state: Mutex::new(ConsumeState::Idle),
            consumers: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn connection_name(&self) -> &str {
        &self.inner.connection_name
    }

    pub fn is_consuming(&self) -> bool {
        matches!(*self.state.lock(), ConsumeState::Consuming(_))
    }

    /// Appends `payload` to the ready list. No deduplication.
    pub async fn publish(&self, payload: impl AsRef<[u8]>) -> QueueResult<()> {
        self.inner
            .store
            .lpush(&self.inner.ready_key, payload.as_ref())
            .await?;
        metrics::inc_published(1);
        Ok(())
    }

    /// Deliveries constructed from now on push to `push_queue`'s ready list.
    pub fn set_push_queue(&self, push_queue: &Queue) {
        *self.inner.push_key.write() = Some(push_queue.inner.ready_key.clone());
    }

    pub async fn ready_count(&self) -> QueueResult<u64> {
        self.inner.store.llen(&self.inner.ready_key).await
    }

    /// Unacked deliveries held by this queue's connection.
    pub async fn unacked_count(&self) -> QueueResult<u64> {
        self.inner.store.llen(&self.inner.unacked_key).await
    }

    pub async fn rejected_count(&self) -> QueueResult<u64> {
        self.inner.store.llen(&self.inner.rejected_key).await
    }

    /// Empties the ready list, returns how many payloads were dropped.
    pub async fn purge_ready(&self) -> QueueResult<u64> {
        self.inner.store.drain(&self.inner.ready_key).await
    }

    pub async fn purge_rejected(&self) -> QueueResult<u64> {
        self.inner.store.drain(&self.inner.rejected_key).await
    }

    /// Moves up to `count` rejected payloads back to ready.
    pub async fn return_rejected(&self, count: u64) -> QueueResult<u64> {
        let moved = move_list(
            self.inner.store.as_ref(),
            &self.inner.rejected_key,
            &self.inner.ready_key,
            Some(count),
        )
        .await?;
        metrics::inc_returned(moved);
        Ok(moved)
    }

    pub async fn return_all_rejected(&self) -> QueueResult<u64> {
        let moved = move_list(
            self.inner.store.as_ref(),
            &self.inner.rejected_key,
            &self.inner.ready_key,
            None,
        )
        .await?;
        metrics::inc_returned(moved);
        Ok(moved)
    }

    /// Moves this connection's unacked payloads back to ready.
    pub async fn return_all_unacked(&self) -> QueueResult<u64> {
        let moved = move_list(
            self.inner.store.as_ref(),
            &self.inner.unacked_key,
            &self.inner.ready_key,
            None,
        )
        .await?;
        metrics::inc_returned(moved);
        Ok(moved)
    }

    /// Starts the fetch loop.
    ///
    /// At most `prefetch_limit` deliveries are unacked for this connection at
    /// any time; when the limit is reached the loop stops fetching until
    /// consumers resolve some. Returns `false` if this handle was already
    /// started (or stopped).
    pub async fn start_consuming(
        &self,
        prefetch_limit: usize,
        poll_interval: Duration,
    ) -> QueueResult<bool> {
        if prefetch_limit == 0 {
            return Err(QueueError::InvalidConfig(
                "prefetch limit must be positive".to_string(),
            ));
        }
        if !matches!(*self.state.lock(), ConsumeState::Idle) {
            return Ok(false);
        }

        self.inner
            .store
            .sadd(&self.inner.connection_queues_key, &self.inner.name)
            .await?;

        let mut state = self.state.lock();
        if !matches!(*state, ConsumeState::Idle) {
            return Ok(false);
        }

        let (tx, rx) = flume::bounded(prefetch_limit);
        let (stop, stop_rx) = watch::channel(false);
        let fetcher = tokio::spawn(worker::consume_loop(
            self.inner.clone(),
            prefetch_limit,
            poll_interval,
            tx,
            stop_rx,
        ));
        *state = ConsumeState::Consuming(Consuming {
            stop,
            fetcher,
            deliveries: rx,
        });

        info!(
            target: "relq::queue",
            queue = %self.inner.name,
            connection = %self.inner.connection_name,
            prefetch_limit,
            ?poll_interval,
            "Started consuming"
        );
        Ok(true)
    }

    /// [`Queue::start_consuming`] with the `[consumer]` section of the config.
    pub async fn start_consuming_with(&self, config: &ConsumerConfig) -> QueueResult<bool> {
        self.start_consuming(config.prefetch_limit, config.poll_interval())
            .await
    }

    /// Stops the fetch loop once its current iteration is done.
    ///
    /// Deliveries already fetched are still handed to consumers; unresolved
    /// ones stay unacked. Waits for the consumers to drain them, then
    /// unregisters the consumers. Returns `false` if the queue was not
    /// consuming.
    pub async fn stop_consuming(&self) -> bool {
        let consuming = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ConsumeState::Stopped) {
                ConsumeState::Consuming(consuming) => consuming,
                other => {
                    *state = other;
                    return false;
                }
            }
        };

        consuming.stop.send_replace(true);
        if let Err(e) = consuming.fetcher.await {
            warn!(target: "relq::queue", queue = %self.inner.name, error = %e, "Fetch loop ended abnormally");
        }
        // Consumers drain what is left in the channel, then see it disconnected.
        drop(consuming.deliveries);

        let names: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, task)) = self.consumers.remove(&name) {
                if let Err(e) = task.handle.await {
                    warn!(target: "relq::queue", queue = %self.inner.name, consumer = %name, error = %e, "Consumer ended abnormally");
                }
            }
        }
        if let Err(e) = self.inner.store.del(&self.inner.consumers_key).await {
            warn!(target: "relq::queue", queue = %self.inner.name, error = %e, "Failed to unregister consumers");
        }

        info!(target: "relq::queue", queue = %self.inner.name, connection = %self.inner.connection_name, "Stopped consuming");
        true
    }

    /// Registers a consumer under `tag-<random>` and returns that name.
    pub async fn add_consumer(&self, tag: &str, consumer: impl Consumer) -> QueueResult<String> {
        self.add_handler(tag, Handler::Single(Box::new(consumer)))
            .await
    }

    /// Registers a batch consumer. Batches hold up to `batch_size`
    /// deliveries; a partial batch is handed over once `batch_timeout` has
    /// passed since its first delivery arrived.
    pub async fn add_batch_consumer(
        &self,
        tag: &str,
        batch_size: usize,
        batch_timeout: Duration,
        consumer: impl BatchConsumer,
    ) -> QueueResult<String> {
        let handler = Handler::Batch {
            consumer: Box::new(consumer),
            size: batch_size.max(1),
            timeout: batch_timeout,
        };
        self.add_handler(tag, handler).await
    }

    async fn add_handler(&self, tag: &str, handler: Handler) -> QueueResult<String> {
        let deliveries = self.deliveries()?;
        let name = unique_name(tag);
        self.inner
            .store
            .sadd(&self.inner.consumers_key, &name)
            .await?;

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker::run_handler(
            self.inner.clone(),
            name.clone(),
            handler,
            deliveries,
            stop_rx,
        ));
        self.consumers.insert(
            name.clone(),
            ConsumerTask { stop, handle },
        );

        debug!(target: "relq::queue", queue = %self.inner.name, consumer = %name, "Consumer added");
        Ok(name)
    }

    fn deliveries(&self) -> QueueResult<flume::Receiver<Delivery>> {
        match &*self.state.lock() {
            ConsumeState::Consuming(consuming) => Ok(consuming.deliveries.clone()),
            _ => Err(QueueError::NotConsuming {
                queue: self.inner.name.clone(),
            }),
        }
    }

    /// Stops the named consumer after its current delivery and unregisters it.
    pub async fn remove_consumer(&self, name: &str) -> QueueResult<bool> {
        if let Some((_, task)) = self.consumers.remove(name) {
            task.stop.send_replace(true);
        }
        let removed = self.inner.store.srem(&self.inner.consumers_key, name).await?;
        debug!(target: "relq::queue", queue = %self.inner.name, consumer = %name, removed, "Consumer removed");
        Ok(removed)
    }

    pub async fn remove_all_consumers(&self) -> QueueResult<usize> {
        let names: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        for name in &names {
            if let Some((_, task)) = self.consumers.remove(name) {
                task.stop.send_replace(true);
            }
        }
        self.inner.store.del(&self.inner.consumers_key).await?;
        Ok(names.len())
    }

    /// Consumer names registered for this queue on this connection.
    pub async fn consumers(&self) -> QueueResult<Vec<String>> {
        self.inner.store.smembers(&self.inner.consumers_key).await
    }

    /// Removes the queue from the global queue registry.
    pub async fn close(&self) -> QueueResult<bool> {
        self.inner
            .store
            .srem(&self.inner.queues_key, &self.inner.name)
            .await
    }

    /// Detaches this connection from the queue: stops consuming, returns its
    /// unacked payloads to ready and removes its per-queue keys.
    pub async fn close_in_connection(&self) -> QueueResult<u64> {
        self.stop_consuming().await;
        self.remove_all_consumers().await?;

        let returned = self.return_all_unacked().await?;
        let store = self.inner.store.as_ref();
        store.del(&self.inner.unacked_key).await?;
        store
            .srem(&self.inner.connection_queues_key, &self.inner.name)
            .await?;

        info!(target: "relq::queue", queue = %self.inner.name, connection = %self.inner.connection_name, returned, "Closed in connection");
        Ok(returned)
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} conn:{}]", self.inner.name, self.inner.connection_name)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("connection", &self.inner.connection_name)
            .field("consuming", &self.is_consuming())
            .finish()
    }
}

//! Background tasks of a consuming queue.
//!
//! The fetch loop moves payloads from the ready list to this connection's
//! unacked list with one `RPOPLPUSH` each, so a payload is always in exactly
//! one of the two lists. It then hands a [`Delivery`] to the consumer tasks
//! over a bounded channel; whichever consumer is free takes it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::core::consumer::Handler;
use crate::core::delivery::Delivery;
use crate::core::error::QueueResult;
use crate::core::queue::QueueInner;
use crate::metrics;

/// Resolves once `stop` is set or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

pub(crate) async fn consume_loop(
    inner: Arc<QueueInner>,
    prefetch_limit: usize,
    poll_interval: Duration,
    deliveries: flume::Sender<Delivery>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        let want_more = match fetch_batch(&inner, prefetch_limit, &deliveries, &mut stop).await {
            Ok(want_more) => want_more,
            Err(e) => {
                warn!(target: "relq::queue", queue = %inner.name, connection = %inner.connection_name, error = %e, "Fetch failed");
                false
            }
        };
        if want_more {
            continue;
        }

        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = sleep(poll_interval) => {}
        }
    }
    info!(target: "relq::queue", queue = %inner.name, connection = %inner.connection_name, "Fetch loop exited");
}

/// Fetches up to `prefetch_limit - unacked` payloads. Returns `true` when the
/// whole capacity was used, meaning the ready list may hold more.
async fn fetch_batch(
    inner: &QueueInner,
    prefetch_limit: usize,
    deliveries: &flume::Sender<Delivery>,
    stop: &mut watch::Receiver<bool>,
) -> QueueResult<bool> {
    let unacked = inner.store.llen(&inner.unacked_key).await?;
    let capacity = (prefetch_limit as u64).saturating_sub(unacked);
    if capacity == 0 {
        return Ok(false);
    }

    // A cleaner that found this connection's heartbeat lapsed has dropped the
    // queue from its consuming set; it has to be back there before anything
    // lands in the unacked list.
    inner
        .store
        .sadd(&inner.connection_queues_key, &inner.name)
        .await?;

    let mut fetched = 0u64;
    while fetched < capacity {
        let Some(payload) = inner
            .store
            .rpoplpush(&inner.ready_key, &inner.unacked_key)
            .await?
        else {
            break;
        };
        fetched += 1;
        metrics::inc_delivered(1);

        // On stop or with no receiver left the payload stays unacked until
        // the connection is cleaned or the queue is closed in it.
        tokio::select! {
            biased;
            sent = deliveries.send_async(inner.delivery(payload)) => {
                if sent.is_err() {
                    return Ok(false);
                }
            }
            _ = stopped(stop) => return Ok(false),
        }
    }

    if fetched > 0 {
        debug!(target: "relq::queue", queue = %inner.name, fetched, capacity, "Fetched batch");
    }
    Ok(fetched == capacity)
}

/// Runs one registered consumer until it is removed or the queue stops
/// consuming and the channel is drained.
pub(crate) async fn run_handler(
    inner: Arc<QueueInner>,
    name: String,
    handler: Handler,
    deliveries: flume::Receiver<Delivery>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            received = deliveries.recv_async() => match received {
                Ok(delivery) => delivery,
                Err(_) => break,
            },
        };

        match &handler {
            Handler::Single(consumer) => consumer.consume(first).await,
            Handler::Batch {
                consumer,
                size,
                timeout,
            } => {
                let batch = fill_batch(first, &deliveries, *size, *timeout).await;
                consumer.consume_batch(batch).await;
            }
        }
    }
    debug!(target: "relq::queue", queue = %inner.name, consumer = %name, "Consumer exited");
}

async fn fill_batch(
    first: Delivery,
    deliveries: &flume::Receiver<Delivery>,
    size: usize,
    timeout: Duration,
) -> Vec<Delivery> {
    let deadline = Instant::now() + timeout;
    let mut batch = Vec::with_capacity(size);
    batch.push(first);
    while batch.len() < size {
        match timeout_at(deadline, deliveries.recv_async()).await {
            Ok(Ok(delivery)) => batch.push(delivery),
            // timed out or disconnected
            _ => break,
        }
    }
    batch
}

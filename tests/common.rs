#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relq::{BatchConsumer, Connection, ConnectionOptions, Consumer, Delivery, MemoryStore};

pub const POLL: Duration = Duration::from_millis(5);

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        relq::logging::init_logging();
    });
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions {
        heartbeat_ttl: Duration::from_secs(1),
        heartbeat_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

pub async fn open(store: &Arc<MemoryStore>, tag: &str) -> Connection {
    Connection::open(tag, store.clone(), options())
        .await
        .expect("failed to open connection")
}

/// Polls `check` every few milliseconds for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Records what it receives. With `auto_ack` off, deliveries are kept so the
/// test can resolve them.
#[derive(Clone, Default)]
pub struct TestConsumer {
    auto_ack: bool,
    pub acked: Arc<Mutex<Vec<String>>>,
    pub pending: Arc<Mutex<Vec<Delivery>>>,
}

impl TestConsumer {
    pub fn auto_ack() -> Self {
        Self {
            auto_ack: true,
            ..Default::default()
        }
    }

    pub fn manual() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn acked_len(&self) -> usize {
        self.acked.lock().len()
    }

    /// Removes and returns the pending delivery carrying `payload`.
    pub fn take(&self, payload: &str) -> Delivery {
        let mut pending = self.pending.lock();
        let index = pending
            .iter()
            .position(|d| d.payload_str() == payload)
            .unwrap_or_else(|| panic!("no pending delivery {payload}"));
        pending.remove(index)
    }
}

#[async_trait]
impl Consumer for TestConsumer {
    async fn consume(&self, delivery: Delivery) {
        if self.auto_ack {
            assert!(delivery.ack().await.expect("ack failed"));
            self.acked.lock().push(delivery.payload_str().into_owned());
        } else {
            self.pending.lock().push(delivery);
        }
    }
}

#[derive(Clone, Default)]
pub struct TestBatchConsumer {
    pub batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl TestBatchConsumer {
    pub fn total(&self) -> usize {
        self.batch_sizes.lock().iter().sum()
    }
}

#[async_trait]
impl BatchConsumer for TestBatchConsumer {
    async fn consume_batch(&self, batch: Vec<Delivery>) {
        let size = batch.len();
        for delivery in batch {
            delivery.ack().await.expect("ack failed");
        }
        self.batch_sizes.lock().push(size);
    }
}

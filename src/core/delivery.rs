//! In-flight payloads and how they get resolved.
//!
//! A delivery is identified by its payload bytes only. Resolving removes one
//! occurrence of that value from the unacked list, so two in-flight
//! deliveries with equal payloads are interchangeable: acking one may remove
//! the other's entry. Embed a unique token in the payload when that matters.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::core::error::QueueResult;
use crate::core::store::Store;
use crate::metrics;

pub struct Delivery {
    payload: Bytes,
    unacked_key: String,
    rejected_key: String,
    push_key: Option<String>,
    store: Arc<dyn Store>,
}

impl Delivery {
    pub(crate) fn new(
        payload: Bytes,
        unacked_key: String,
        rejected_key: String,
        push_key: Option<String>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            payload,
            unacked_key,
            rejected_key,
            push_key,
            store,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload as text, lossy for non UTF-8 bytes.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn unacked_key(&self) -> &str {
        &self.unacked_key
    }

    /// Marks the work as done by removing one occurrence of the payload from
    /// the unacked list.
    ///
    /// `Ok(false)` means nothing was removed, which is also what a second
    /// resolution of the same delivery returns.
    pub async fn ack(&self) -> QueueResult<bool> {
        let removed = self
            .store
            .lrem(&self.unacked_key, 1, &self.payload)
            .await?;
        debug!(target: "relq::delivery", delivery = %self, removed, "ack");
        if removed == 1 {
            metrics::inc_acked(1);
        }
        Ok(removed == 1)
    }

    /// Moves the payload to the queue's rejected list.
    pub async fn reject(&self) -> QueueResult<bool> {
        let removed = self.move_to(&self.rejected_key).await?;
        if removed {
            metrics::inc_rejected(1);
        }
        Ok(removed)
    }

    /// Moves the payload to the push queue's ready list, or behaves like
    /// [`Delivery::reject`] when no push queue is configured.
    pub async fn push(&self) -> QueueResult<bool> {
        match &self.push_key {
            Some(push_key) => {
                let removed = self.move_to(push_key).await?;
                if removed {
                    metrics::inc_pushed(1);
                }
                Ok(removed)
            }
            None => self.reject().await,
        }
    }

    // Append before remove: a failure in between duplicates the payload,
    // it never drops it.
    async fn move_to(&self, key: &str) -> QueueResult<bool> {
        self.store.lpush(key, &self.payload).await?;
        let removed = self
            .store
            .lrem(&self.unacked_key, 1, &self.payload)
            .await?;
        debug!(target: "relq::delivery", delivery = %self, to = key, removed, "moved");
        Ok(removed == 1)
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.payload_str(), self.unacked_key)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .field("unacked_key", &self.unacked_key)
            .field("rejected_key", &self.rejected_key)
            .field("push_key", &self.push_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    fn delivery(store: &Arc<MemoryStore>, payload: &str, push: Option<&str>) -> Delivery {
        Delivery::new(
            Bytes::from(payload.to_string()),
            "unacked".to_string(),
            "rejected".to_string(),
            push.map(str::to_string),
            store.clone(),
        )
    }

    #[tokio::test]
    async fn ack_removes_once() {
        let store = Arc::new(MemoryStore::new());
        store.lpush("unacked", b"p").await.unwrap();
        let d = delivery(&store, "p", None);

        assert!(d.ack().await.unwrap());
        assert!(!d.ack().await.unwrap());
        assert_eq!(store.llen("unacked").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reject_moves_to_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.lpush("unacked", b"p").await.unwrap();
        let d = delivery(&store, "p", None);

        assert!(d.reject().await.unwrap());
        assert_eq!(store.llen("unacked").await.unwrap(), 0);
        assert_eq!(store.llen("rejected").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn push_without_target_rejects() {
        let store = Arc::new(MemoryStore::new());
        store.lpush("unacked", b"p").await.unwrap();
        let d = delivery(&store, "p", None);

        assert!(d.push().await.unwrap());
        assert_eq!(store.llen("rejected").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn push_with_target_requeues_elsewhere() {
        let store = Arc::new(MemoryStore::new());
        store.lpush("unacked", b"p").await.unwrap();
        let d = delivery(&store, "p", Some("other-ready"));

        assert!(d.push().await.unwrap());
        assert_eq!(store.llen("other-ready").await.unwrap(), 1);
        assert_eq!(store.llen("rejected").await.unwrap(), 0);
        assert_eq!(store.llen("unacked").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn equal_payloads_are_interchangeable() {
        let store = Arc::new(MemoryStore::new());
        store.lpush("unacked", b"same").await.unwrap();
        store.lpush("unacked", b"same").await.unwrap();
        let first = delivery(&store, "same", None);

        assert!(first.ack().await.unwrap());
        assert!(first.ack().await.unwrap());
        assert_eq!(store.llen("unacked").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.lpush("unacked", b"p").await.unwrap();
        let d = delivery(&store, "p", None);

        store.set_offline(true);
        assert!(d.ack().await.is_err());
        store.set_offline(false);
        assert!(d.ack().await.unwrap());
    }
}

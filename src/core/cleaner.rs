//! Reclaims work left behind by dead connections.
//!
//! A connection is dead when its heartbeat key has no positive TTL. Its
//! unacked payloads are moved back to the owning queues' ready lists, then its
//! bookkeeping keys and registry entry are removed. A connection whose
//! liveness can not be determined (store error) is left alone.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::connection::{heartbeat_alive, Connection};
use crate::core::error::QueueResult;
use crate::core::keys::Keys;
use crate::core::queue::move_list;
use crate::core::store::Store;
use crate::metrics;

/// Outcome of one [`Cleaner::clean`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Dead connections that were fully cleaned and unregistered.
    pub connections: Vec<String>,
    /// Payloads moved from unacked lists back to ready lists.
    pub returned: u64,
}

pub struct Cleaner {
    store: Arc<dyn Store>,
    keys: Keys,
}

impl Cleaner {
    pub fn new(connection: &Connection) -> Self {
        Self::with_store(connection.store().clone(), connection.keys().clone())
    }

    pub fn with_store(store: Arc<dyn Store>, keys: Keys) -> Self {
        Self { store, keys }
    }

    /// Scans the connection registry once.
    ///
    /// Only a failure to read the registry itself is returned as an error;
    /// failures on individual connections are logged and the scan moves on.
    /// Safe to run concurrently with live connections and other cleaners.
    pub async fn clean(&self) -> QueueResult<CleanReport> {
        let names = self.store.smembers(&self.keys.connections()).await?;
        let mut report = CleanReport::default();

        for name in names {
            match heartbeat_alive(self.store.as_ref(), &self.keys, &name).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "relq::cleaner", connection = %name, error = %e, "Liveness check failed, skipping");
                    continue;
                }
            }

            match self.clean_connection(&name).await {
                Ok(returned) => {
                    info!(target: "relq::cleaner", connection = %name, returned, "Cleaned dead connection");
                    report.returned += returned;
                    report.connections.push(name);
                }
                Err(e) => {
                    warn!(target: "relq::cleaner", connection = %name, error = %e, "Failed to clean connection");
                }
            }
        }

        debug!(target: "relq::cleaner", cleaned = report.connections.len(), returned = report.returned, "Clean pass done");
        Ok(report)
    }

    async fn clean_connection(&self, connection: &str) -> QueueResult<u64> {
        let queues_key = self.keys.connection_queues(connection);
        let queues = self.store.smembers(&queues_key).await?;

        let mut returned = 0;
        for queue in &queues {
            returned += self.clean_queue(connection, queue).await?;
        }

        self.store.del(&queues_key).await?;
        self.store
            .srem(&self.keys.connections(), connection)
            .await?;
        Ok(returned)
    }

    async fn clean_queue(&self, connection: &str, queue: &str) -> QueueResult<u64> {
        let unacked_key = self.keys.unacked(connection, queue);
        let returned = move_list(
            self.store.as_ref(),
            &unacked_key,
            &self.keys.ready(queue),
            None,
        )
        .await?;
        metrics::inc_returned(returned);

        self.store.del(&unacked_key).await?;
        self.store
            .del(&self.keys.consumers(connection, queue))
            .await?;
        debug!(target: "relq::cleaner", connection = %connection, queue = %queue, returned, "Returned unacked deliveries");
        Ok(returned)
    }
}

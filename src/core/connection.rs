//! Connections: the unit of liveness.
//!
//! A connection owns one heartbeat key with a bounded TTL, refreshed by a
//! background task, and one entry in the global connection registry. Every
//! queue opened through a connection keys its unacked lists by the
//! connection's name, so when the heartbeat expires the [`Cleaner`] can find
//! and reclaim those lists.
//!
//! [`Cleaner`]: crate::core::cleaner::Cleaner

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::error::{QueueError, QueueResult};
use crate::core::keys::Keys;
use crate::core::queue::Queue;
use crate::core::stats::{self, Stats};
use crate::core::store::{RedisStore, Store};
use crate::metrics;

/// Default lifetime of a heartbeat key.
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(60);
/// Default delay between heartbeat refreshes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub keys: Keys,
    pub heartbeat_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keys: Keys::default(),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl ConnectionOptions {
    /// The refresh interval must fit inside the TTL, otherwise the key lapses
    /// between refreshes and a live connection looks dead.
    pub fn validate(&self) -> QueueResult<()> {
        if self.heartbeat_ttl.as_secs() == 0 {
            return Err(QueueError::InvalidConfig(
                "heartbeat ttl must be at least one second".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.heartbeat_ttl {
            return Err(QueueError::InvalidConfig(format!(
                "heartbeat interval {:?} must be non-zero and shorter than ttl {:?}",
                self.heartbeat_interval, self.heartbeat_ttl
            )));
        }
        Ok(())
    }
}

/// `tag-xxxxxx` with a random hex suffix.
pub(crate) fn unique_name(tag: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{tag}-{}", &id[..6])
}

/// Whether the named connection's heartbeat key is still alive.
pub(crate) async fn heartbeat_alive(store: &dyn Store, keys: &Keys, name: &str) -> QueueResult<bool> {
    let ttl = store.ttl(&keys.heartbeat(name)).await?;
    Ok(ttl.is_some_and(|remaining| !remaining.is_zero()))
}

pub struct Connection {
    name: String,
    keys: Keys,
    store: Arc<dyn Store>,
    heartbeat_key: String,
    queues_key: String,
    heartbeat_stop: watch::Sender<bool>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Opens a connection named `tag-<random>`.
    ///
    /// The heartbeat is written before the name enters the registry, so a
    /// cleaner never sees a registered connection without a heartbeat. If that
    /// first write fails the connection is unusable and
    /// `QueueError::HeartbeatFailed` is returned.
    pub async fn open(
        tag: &str,
        store: Arc<dyn Store>,
        options: ConnectionOptions,
    ) -> QueueResult<Self> {
        options.validate()?;

        let name = unique_name(tag);
        let keys = options.keys;
        let heartbeat_key = keys.heartbeat(&name);

        if let Err(e) = store
            .set_with_ttl(&heartbeat_key, "1", options.heartbeat_ttl)
            .await
        {
            error!(target: "relq::connection", connection = %name, error = %e, "Initial heartbeat failed");
            return Err(QueueError::HeartbeatFailed { connection: name });
        }

        store.sadd(&keys.connections(), &name).await?;

        let (heartbeat_stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(heartbeat_loop(
            store.clone(),
            heartbeat_key.clone(),
            keys.connections(),
            name.clone(),
            options.heartbeat_ttl,
            options.heartbeat_interval,
            stop_rx,
        ));

        info!(target: "relq::connection", connection = %name, "Connection opened");
        Ok(Self {
            queues_key: keys.connection_queues(&name),
            name,
            keys,
            store,
            heartbeat_key,
            heartbeat_stop,
            heartbeat_task: Mutex::new(Some(task)),
        })
    }

    /// Connects to redis at `url` and opens a connection on it.
    pub async fn connect(tag: &str, url: &str, options: ConnectionOptions) -> QueueResult<Self> {
        let store = RedisStore::connect(url).await?;
        Self::open(tag, Arc::new(store), options).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Registers `name` in the global queue registry and returns a handle
    /// bound to this connection.
    pub async fn open_queue(&self, name: &str) -> QueueResult<Queue> {
        self.store.sadd(&self.keys.queues(), name).await?;
        Ok(Queue::new(
            name,
            &self.name,
            self.keys.clone(),
            self.store.clone(),
        ))
    }

    /// True iff the heartbeat key currently has a positive TTL.
    pub async fn check(&self) -> QueueResult<bool> {
        heartbeat_alive(self.store.as_ref(), &self.keys, &self.name).await
    }

    /// Stops refreshing and deletes the heartbeat key.
    ///
    /// The refresh task is awaited before the delete, so no refresh can land
    /// after it. The connection stays in the registry: a cleaner will find it
    /// dead and reclaim whatever it left unacked.
    pub async fn stop_heartbeat(&self) -> QueueResult<bool> {
        self.halt_heartbeat().await;
        let deleted = self.store.del(&self.heartbeat_key).await?;
        info!(target: "relq::connection", connection = %self.name, "Heartbeat stopped");
        Ok(deleted)
    }

    /// Removes this connection from the registry.
    ///
    /// Refreshing stops first, since every refresh registers the name again.
    /// The heartbeat key is left to expire.
    pub async fn close(&self) -> QueueResult<bool> {
        self.halt_heartbeat().await;
        self.store.srem(&self.keys.connections(), &self.name).await
    }

    async fn halt_heartbeat(&self) {
        self.heartbeat_stop.send_replace(true);
        let task = self.heartbeat_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(target: "relq::connection", connection = %self.name, error = %e, "Heartbeat task ended abnormally");
            }
        }
    }

    pub async fn collect_stats(&self, queue_list: &[&str]) -> QueueResult<Stats> {
        stats::collect_stats(self.store.as_ref(), &self.keys, queue_list).await
    }

    /// All queue names ever opened and not closed.
    pub async fn open_queues(&self) -> QueueResult<Vec<String>> {
        self.store.smembers(&self.keys.queues()).await
    }

    /// All registered connection names, alive or not.
    pub async fn connections(&self) -> QueueResult<Vec<String>> {
        self.store.smembers(&self.keys.connections()).await
    }

    /// Queues this connection has started consuming.
    pub async fn consuming_queues(&self) -> QueueResult<Vec<String>> {
        self.store.smembers(&self.queues_key).await
    }

    /// Drops the global queue registry.
    pub async fn close_all_queues(&self) -> QueueResult<bool> {
        self.store.del(&self.keys.queues()).await
    }

    pub async fn close_all_queues_in_connection(&self) -> QueueResult<bool> {
        self.store.del(&self.queues_key).await
    }

    /// Wipes the store. Tests and resets only.
    pub async fn flush_db(&self) -> QueueResult<()> {
        self.store.flush().await
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .finish()
    }
}

// Exits when a stop is signalled or the connection is dropped. The stop check
// comes before every refresh. Each refresh also puts the name back in the
// registry: a cleaner may have unregistered it while the key was lapsed.
async fn heartbeat_loop(
    store: Arc<dyn Store>,
    key: String,
    registry_key: String,
    connection: String,
    ttl: Duration,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = sleep(interval) => {}
        }

        if *stop.borrow() {
            break;
        }

        if let Err(e) = store.set_with_ttl(&key, "1", ttl).await {
            metrics::inc_heartbeat_failures(1);
            warn!(target: "relq::connection", connection = %connection, error = %e, "Heartbeat refresh failed");
            continue;
        }
        match store.sadd(&registry_key, &connection).await {
            Ok(true) => {
                warn!(target: "relq::connection", connection = %connection, "Heartbeat had lapsed, connection registered again");
            }
            Ok(false) => {}
            Err(e) => {
                metrics::inc_heartbeat_failures(1);
                warn!(target: "relq::connection", connection = %connection, error = %e, "Registry refresh failed");
            }
        }
    }
    debug!(target: "relq::connection", connection = %connection, "Heartbeat loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    #[test]
    fn options_reject_interval_longer_than_ttl() {
        let options = ConnectionOptions {
            heartbeat_interval: Duration::from_secs(90),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(QueueError::InvalidConfig(_))
        ));
        assert!(ConnectionOptions::default().validate().is_ok());
    }

    #[test]
    fn unique_names_carry_the_tag() {
        let a = unique_name("worker");
        let b = unique_name("worker");
        assert!(a.starts_with("worker-"));
        assert_eq!(a.len(), "worker-".len() + 6);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn open_fails_when_heartbeat_cannot_be_written() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);

        let result = Connection::open("down", store.clone(), ConnectionOptions::default()).await;
        assert!(matches!(result, Err(QueueError::HeartbeatFailed { .. })));

        store.set_offline(false);
        let registered = store
            .smembers(&Keys::default().connections())
            .await
            .unwrap();
        assert!(registered.is_empty());
    }

    #[tokio::test]
    async fn open_registers_after_heartbeat() {
        let store = Arc::new(MemoryStore::new());
        let conn = Connection::open("c", store.clone(), ConnectionOptions::default())
            .await
            .unwrap();

        assert!(conn.check().await.unwrap());
        assert_eq!(conn.connections().await.unwrap(), vec![conn.name().to_string()]);

        assert!(conn.stop_heartbeat().await.unwrap());
        assert!(!conn.check().await.unwrap());
        // still registered so a cleaner can find it
        assert_eq!(conn.connections().await.unwrap().len(), 1);

        assert!(conn.close().await.unwrap());
        assert!(conn.connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_connection_is_not_registered_again() {
        let store = Arc::new(MemoryStore::new());
        let options = ConnectionOptions {
            heartbeat_ttl: Duration::from_secs(1),
            heartbeat_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let conn = Connection::open("c", store.clone(), options).await.unwrap();

        assert!(conn.close().await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(conn.connections().await.unwrap().is_empty());
    }
}

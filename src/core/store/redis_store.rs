//! Redis-backed store.
//!
//! Uses a `ConnectionManager` so a dropped TCP connection is re-established
//! transparently; the failed call itself still surfaces as `QueueError::Store`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use crate::core::error::{QueueError, QueueResult};
use crate::core::store::Store;

#[derive(Clone)]
pub struct RedisStore {
    url: String,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = Client::open(url)
            .map_err(|e| QueueError::store(format!("invalid redis url {url}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::store(format!("failed to connect to {url}: {e}")))?;

        info!(target: "relq::store", url = %url, "Connected to redis");
        Ok(Self {
            url: url.to_string(),
            conn,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[inline]
    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()> {
        let seconds = ttl.as_secs().max(1);
        self.conn().set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> QueueResult<Option<Duration>> {
        // -2: missing, -1: no expiry
        let secs: i64 = self.conn().ttl(key).await?;
        if secs < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(secs as u64)))
    }

    async fn del(&self, key: &str) -> QueueResult<bool> {
        let removed: u64 = self.conn().del(key).await?;
        Ok(removed > 0)
    }

    async fn lpush(&self, key: &str, value: &[u8]) -> QueueResult<u64> {
        Ok(self.conn().lpush(key, value).await?)
    }

    async fn lrem(&self, key: &str, count: u64, value: &[u8]) -> QueueResult<u64> {
        Ok(self.conn().lrem(key, count as isize, value).await?)
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> QueueResult<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.conn().rpoplpush(source, destination).await?;
        Ok(value.map(Bytes::from))
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        Ok(self.conn().llen(key).await?)
    }

    async fn drain(&self, key: &str) -> QueueResult<u64> {
        let (len, _deleted): (u64, u64) = redis::pipe()
            .atomic()
            .llen(key)
            .del(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    async fn sadd(&self, key: &str, member: &str) -> QueueResult<bool> {
        let added: u64 = self.conn().sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let removed: u64 = self.conn().srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self.conn().smembers(key).await?)
    }

    async fn flush(&self) -> QueueResult<()> {
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut self.conn())
            .await?;
        Ok(())
    }
}

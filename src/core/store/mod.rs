//! Key-value store boundary.
//!
//! The queue layer only ever talks to the store through these primitives,
//! each of which must be atomic on its own. There are no multi-key
//! transactions besides `rpoplpush` (two keys, one call) and `drain`.

pub mod memory;
pub mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::error::QueueResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// `SET key value EX ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()>;

    /// Remaining time to live. `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> QueueResult<Option<Duration>>;

    /// Deletes the key, returns whether it existed.
    async fn del(&self, key: &str) -> QueueResult<bool>;

    /// Pushes to the head of the list, returns the new length.
    async fn lpush(&self, key: &str, value: &[u8]) -> QueueResult<u64>;

    /// Removes up to `count` occurrences of `value` scanning from the head.
    async fn lrem(&self, key: &str, count: u64, value: &[u8]) -> QueueResult<u64>;

    /// Pops the tail of `source` and pushes it onto the head of `destination`.
    async fn rpoplpush(&self, source: &str, destination: &str) -> QueueResult<Option<Bytes>>;

    async fn llen(&self, key: &str) -> QueueResult<u64>;

    /// Deletes a list and reports how many elements it held, atomically.
    async fn drain(&self, key: &str) -> QueueResult<u64>;

    /// Returns whether the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> QueueResult<bool>;

    /// Returns whether the member was present.
    async fn srem(&self, key: &str, member: &str) -> QueueResult<bool>;

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Wipes the whole database. Test and reset tooling only.
    async fn flush(&self) -> QueueResult<()>;
}

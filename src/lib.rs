//! relq – reliable message queues on top of Redis lists, sets and expiring keys.
//!
//! This crate exports
//!  * `core`    – connections, queues, deliveries, the cleaner and stats
//!  * `config`  – TOML-driven runtime configuration
//!  * `logging` – tracing subscriber setup
//!  * `metrics` – process-wide counters
//!
//! Delivery is at-least-once: a payload moves from a queue's ready list into
//! the consuming connection's unacked list and stays there until a consumer
//! acks, rejects or pushes it. Connections prove they are alive with an
//! expiring heartbeat key; the [`Cleaner`] returns the unacked payloads of
//! dead connections to their ready lists.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::config::{load_config, Config};
pub use crate::core::cleaner::{CleanReport, Cleaner};
pub use crate::core::connection::{Connection, ConnectionOptions};
pub use crate::core::consumer::{consumer_fn, BatchConsumer, Consumer};
pub use crate::core::delivery::Delivery;
pub use crate::core::error::{QueueError, QueueResult};
pub use crate::core::keys::Keys;
pub use crate::core::queue::Queue;
pub use crate::core::stats::{ConnectionStat, QueueStat, Stats};
pub use crate::core::store::{MemoryStore, RedisStore, Store};

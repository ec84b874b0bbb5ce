pub mod cleaner;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod keys;
pub mod queue;
pub mod stats;
pub mod store;

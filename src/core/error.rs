use std::fmt;

/// Result alias used across the queue layer.
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A store call failed (network, timeout, protocol). Callers decide whether to retry.
    Store(String),
    /// The initial heartbeat write failed, the connection was never registered.
    HeartbeatFailed { connection: String },
    NotConsuming { queue: String },
    InvalidConfig(String),
}

impl QueueError {
    pub fn store(msg: impl Into<String>) -> Self {
        QueueError::Store(msg.into())
    }
}

impl std::error::Error for QueueError {}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Store(msg) => write!(f, "Store call failed: {msg}"),
            QueueError::HeartbeatFailed { connection } => {
                write!(f, "Connection {connection} failed to write its initial heartbeat")
            }
            QueueError::NotConsuming { queue } => write!(f, "Queue {queue} is not consuming"),
            QueueError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Store(e.to_string())
    }
}

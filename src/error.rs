//! Error types for the queue engine and its backends.

use thiserror::Error;

/// Everything a `Backend` or the `Mq` facade can fail with.
#[derive(Error, Debug)]
pub enum KvmqError {
    #[error("position {index} is out of bounds (queue length {length})")]
    OutOfBounds { index: i64, length: usize },

    #[error("id {0:?} not found in queue index")]
    NotFound(String),

    #[error("queue is empty")]
    Empty,

    #[error("timed out after {0:?} waiting to acquire the filesystem lock")]
    LockTimeout(std::time::Duration),

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("backend database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KvmqError>;

//! Queue facade: a thin dispatcher. At construction it selects a backend by
//! configuration, calls `connect`, and stores the handle. Every public
//! method below is a one-line delegation — no facade-level locking,
//! caching, or retries.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::filesystem::FilesystemBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::rdbms::RdbmsBackend;
use crate::backend::{Backend, Positioned};
use crate::config::{BackendKind, Config};
use crate::error::{KvmqError, Result};
use crate::record::QueueRecord;

/// Message queue handle. Wrap it in an `Arc` to share one queue across
/// tasks — every method takes `&self`, so no external synchronization is
/// needed beyond that.
pub struct Mq {
    backend: Box<dyn Backend>,
}

impl Mq {
    /// Selects a backend by `config.backend`, connects it, and returns the
    /// facade. Use [`Mq::with_custom_backend`] for `BackendKind::Custom`.
    pub async fn new(config: &Config) -> Result<Self> {
        let backend: Box<dyn Backend> = match config.backend {
            BackendKind::Memory => Box::new(MemoryBackend::new()),
            BackendKind::Filesystem => Box::new(FilesystemBackend::new(
                PathBuf::from(config.filesystem.normalized_directory()),
                Duration::from_secs(config.lock_ttl_seconds),
                Duration::from_secs(config.lock_timeout_seconds),
            )),
            BackendKind::Rdbms => Box::new(RdbmsBackend::new(config.rdbms.clone())),
            BackendKind::Redis => {
                return Err(KvmqError::Config(
                    "the redis backend is a shape-compatible collaborator, not a core backend \
                     implemented by this crate — supply BackendKind::Custom with your own \
                     Backend impl instead"
                        .to_string(),
                ))
            }
            BackendKind::Custom => {
                return Err(KvmqError::Config(
                    "BackendKind::Custom requires Mq::with_custom_backend, not Mq::new"
                        .to_string(),
                ))
            }
        };
        backend.connect().await?;
        Ok(Self { backend })
    }

    /// Constructs a facade around a caller-supplied backend implementing the
    /// contract (`config.backend = custom`).
    pub async fn with_custom_backend(backend: Box<dyn Backend>) -> Result<Self> {
        backend.connect().await?;
        Ok(Self { backend })
    }

    pub async fn length(&self) -> Result<usize> {
        self.backend.length().await
    }

    /// Pushes at the back of the queue.
    pub async fn push(&self, body: Vec<u8>) -> Result<QueueRecord> {
        self.backend.push_index(body, -1).await
    }

    /// Pushes at the front of the queue.
    pub async fn push_first(&self, body: Vec<u8>) -> Result<QueueRecord> {
        self.backend.push_index(body, 0).await
    }

    pub async fn push_index(&self, body: Vec<u8>, index: i64) -> Result<QueueRecord> {
        self.backend.push_index(body, index).await
    }

    /// Pops from the front of the queue.
    pub async fn pop(&self) -> Result<QueueRecord> {
        self.backend.pop_index(0).await
    }

    /// Pops from the back of the queue.
    pub async fn pop_last(&self) -> Result<QueueRecord> {
        self.backend.pop_index(-1).await
    }

    pub async fn pop_index(&self, index: i64) -> Result<QueueRecord> {
        self.backend.pop_index(index).await
    }

    pub async fn pop_id(&self, id: &str) -> Result<QueueRecord> {
        self.backend.pop_id(id).await
    }

    /// Peeks at the front of the queue.
    pub async fn peek(&self) -> Result<QueueRecord> {
        self.backend.peek_index(0).await
    }

    /// Peeks at the back of the queue.
    pub async fn peek_last(&self) -> Result<QueueRecord> {
        self.backend.peek_index(-1).await
    }

    pub async fn peek_index(&self, index: i64) -> Result<QueueRecord> {
        self.backend.peek_index(index).await
    }

    pub async fn peek_id(&self, id: &str) -> Result<QueueRecord> {
        self.backend.peek_id(id).await
    }

    pub async fn peek_scan(&self) -> Result<Vec<Positioned>> {
        self.backend.peek_scan().await
    }

    pub async fn find(&self, pattern: &[u8]) -> Result<Option<Positioned>> {
        self.backend.find(pattern).await
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.backend.clear().await
    }

    pub async fn rebuild_index(&self) -> Result<()> {
        self.backend.rebuild_index().await
    }

    /// `confirm` mirrors the Go original's safety latch — the delete is
    /// irreversible, so callers must opt in explicitly.
    pub async fn delete_queue(&self, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(KvmqError::Config(
                "delete_queue requires confirm = true".to_string(),
            ));
        }
        self.backend.delete_queue().await
    }

    pub async fn debug_index(&self) -> String {
        self.backend.debug_index().await
    }

    pub async fn debug_queue(&self) -> String {
        self.backend.debug_queue().await
    }
}

//! kvmq — an ordered, persistent, pluggable message queue.
//!
//! A queue instance places opaque byte-string messages into an ordered
//! index and a body store, exposing position-addressable operations
//! (push/pop/peek at front, back, arbitrary index, or by id), search,
//! length, clear, rebuild, and destroy, behind a set of interchangeable
//! storage [`backend::Backend`] implementations.
//!
//! ```no_run
//! use kvmq::{Config, Mq};
//!
//! # async fn example() -> kvmq::error::Result<()> {
//! let mq = Mq::new(&Config::default()).await?;
//! mq.push(b"hello".to_vec()).await?;
//! let record = mq.pop().await?;
//! assert_eq!(record.body, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! Three backends ship with the crate: [`backend::memory::MemoryBackend`]
//! (process-local, in-memory), [`backend::filesystem::FilesystemBackend`]
//! (one file per message under a shared directory, cross-process safe via
//! a PID+TTL lock file), and [`backend::rdbms::RdbmsBackend`] (two tables
//! inside a transaction per operation, via `sqlx`). A caller may also
//! supply a custom backend implementing [`backend::Backend`] and construct
//! the facade with [`Mq::with_custom_backend`].

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod queue;
pub mod record;

pub use backend::Backend;
pub use config::{BackendKind, Config};
pub use error::{KvmqError, Result};
pub use queue::Mq;
pub use record::QueueRecord;

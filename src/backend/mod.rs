//! The backend contract (C4): the polymorphic capability set every storage
//! engine implements. The facade ([`crate::queue::Mq`]) holds a
//! `Box<dyn Backend>` and forwards every public call to it — no
//! facade-level locking, caching, or retries (spec §4.7).

pub mod filesystem;
pub mod lockfile;
pub mod memory;
pub mod position;
pub mod rdbms;
pub mod search;

use crate::error::Result;
use crate::record::QueueRecord;
use async_trait::async_trait;

/// One queued message addressed by position, returned with its index.
pub type Positioned = (usize, QueueRecord);

#[async_trait]
pub trait Backend: Send + Sync {
    /// Idempotent; must precede all other operations (spec §4.1). Creates
    /// persistent state (directory, file, table) if it doesn't exist yet.
    async fn connect(&self) -> Result<()>;

    /// Equals the current index length.
    async fn length(&self) -> Result<usize>;

    /// `index` is a position token: `-1` appends at the back, `0` prepends,
    /// any other value in `0..=length` inserts there. `OutOfBounds` past
    /// `length`.
    async fn push_index(&self, body: Vec<u8>, index: i64) -> Result<QueueRecord>;

    /// `index` is a position token: `-1` is the back, others index from the
    /// front. `Empty` on an empty queue, `OutOfBounds` otherwise out of range.
    async fn pop_index(&self, index: i64) -> Result<QueueRecord>;

    /// `NotFound` if `id` isn't in the index.
    async fn pop_id(&self, id: &str) -> Result<QueueRecord>;

    /// Same addressing as `pop_index`, no mutation.
    async fn peek_index(&self, index: i64) -> Result<QueueRecord>;

    /// Same addressing as `pop_id`, no mutation.
    async fn peek_id(&self, id: &str) -> Result<QueueRecord>;

    /// A consistent, front-to-back snapshot of the whole queue, taken under
    /// the backend's lock.
    async fn peek_scan(&self) -> Result<Vec<Positioned>>;

    /// Linear front-to-back scan for the first body that *contains*
    /// `pattern` as a contiguous subsequence (substring containment, not
    /// equality — spec §4.2).
    async fn find(&self, pattern: &[u8]) -> Result<Option<Positioned>>;

    /// Empties the index and the body store; the queue container itself
    /// remains (a subsequent `length()` is `0`, not an error).
    async fn clear(&self) -> Result<()>;

    /// Reconstructs the index from the body store. A recovery tool, not a
    /// reordering primitive — see each backend's doc comment for its
    /// resulting order.
    async fn rebuild_index(&self) -> Result<()>;

    /// Removes bodies, index, and the queue container itself. A fresh
    /// `connect()` is required before further use.
    async fn delete_queue(&self) -> Result<()>;

    /// Pretty-printed JSON dump of the index, for diagnostics (ported from
    /// the Go original's `DebugIndex`, which printed directly to stdout —
    /// a library returns the string instead and lets the caller decide
    /// where it goes).
    async fn debug_index(&self) -> String;

    /// Pretty-printed JSON dump of the body store, for diagnostics.
    async fn debug_queue(&self) -> String;
}

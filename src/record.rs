//! The message record: an immutable descriptor of one queued item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One item in the queue. Bodies are opaque byte strings; the engine never
/// interprets their contents beyond `find`'s substring scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    /// Backend-assigned unique id. Stable for the record's lifetime.
    pub id: String,
    /// Wall-clock time the record was pushed.
    pub created_at: DateTime<Utc>,
    /// Recorded for consumers; the engine never enforces it.
    pub ttl_deadline: DateTime<Utc>,
    /// The opaque payload.
    pub body: Vec<u8>,
}

impl QueueRecord {
    pub fn new(id: String, body: Vec<u8>, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            ttl_deadline: now + ttl,
            body,
        }
    }
}

/// Generates a 128-bit random id, hex-encoded with dashes stripped, matching
/// the in-memory and filesystem backends' id shape.
pub fn new_random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A compiled-once matcher for the random-id shape (32 lowercase hex chars),
/// used by the filesystem backend's `rebuild_index` to tell message files
/// apart from `.lock`/`_index`.
pub static ID_SHAPE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"^[0-9a-f]{32}$").unwrap());

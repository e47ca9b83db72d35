//! Index-positional algorithms (C6): translating position tokens into
//! concrete index offsets.
//!
//! `-1` is the sentinel meaning "back"; it must be recognized before any
//! range check runs (spec §4.2, §9 "Duplicate position sentinel"). Both
//! `push_index` and `pop_index`/`peek_index` treat `-1` as the back — the
//! original Go source only got this right for push and read the *front*
//! element on `PopIndex(-1)`; the spec corrects that bug, and so does this
//! port.

use crate::error::KvmqError;

/// Resolves a position token against a queue of the given length for a
/// **read or remove** (`pop_index`/`peek_index`). Returns the concrete,
/// zero-based offset.
pub fn resolve_read(token: i64, length: usize) -> Result<usize, KvmqError> {
    if length == 0 {
        return Err(KvmqError::Empty);
    }
    if token == -1 {
        return Ok(length - 1);
    }
    if token < 0 || token as usize > length - 1 {
        return Err(KvmqError::OutOfBounds {
            index: token,
            length,
        });
    }
    Ok(token as usize)
}

/// Resolves a position token for an **insert** (`push_index`), where the
/// valid range extends one past the last occupied slot (appending).
///
/// `push_index(_, length)` is explicitly valid and appends at the back —
/// spec §4.2 corrects the original's off-by-one, which rejected that case.
pub fn resolve_push(token: i64, length: usize) -> Result<usize, KvmqError> {
    if token == -1 {
        return Ok(length);
    }
    if token < 0 || token as usize > length {
        return Err(KvmqError::OutOfBounds {
            index: token,
            length,
        });
    }
    Ok(token as usize)
}

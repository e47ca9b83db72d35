//! In-memory backend: a process-local ordered sequence of ids and a
//! mapping from id to record, guarded by one mutex. Pure concurrency, no I/O.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::backend::position::{resolve_push, resolve_read};
use crate::backend::search::body_matches;
use crate::backend::{Backend, Positioned};
use crate::error::{KvmqError, Result};
use crate::record::{new_random_id, QueueRecord};

/// Recorded on every pushed record but never enforced.
const DEFAULT_TTL: chrono::Duration = chrono::Duration::hours(24);

struct State {
    /// The authoritative order. Never inferred from `store`.
    index: Vec<String>,
    /// Id → record. Not ordered.
    store: HashMap<String, QueueRecord>,
    connected: bool,
}

pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                index: Vec::new(),
                store: HashMap::new(),
                connected: false,
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connected {
            state.index = Vec::new();
            state.store = HashMap::new();
            state.connected = true;
            debug!("memory backend connected");
        }
        Ok(())
    }

    async fn length(&self) -> Result<usize> {
        Ok(self.state.lock().await.index.len())
    }

    async fn push_index(&self, body: Vec<u8>, index: i64) -> Result<QueueRecord> {
        let mut state = self.state.lock().await;
        let pos = resolve_push(index, state.index.len())?;
        let id = new_random_id();
        let record = QueueRecord::new(id.clone(), body, DEFAULT_TTL);
        state.store.insert(id.clone(), record.clone());
        state.index.insert(pos, id);
        trace!(pos, "pushed into memory backend");
        Ok(record)
    }

    async fn pop_index(&self, index: i64) -> Result<QueueRecord> {
        let mut state = self.state.lock().await;
        let pos = resolve_read(index, state.index.len())?;
        let id = state.index.remove(pos);
        let record = state
            .store
            .remove(&id)
            .expect("index entry without a body store entry violates invariant (3)");
        Ok(record)
    }

    async fn pop_id(&self, id: &str) -> Result<QueueRecord> {
        let mut state = self.state.lock().await;
        let pos = state
            .index
            .iter()
            .position(|existing| existing == id)
            .ok_or_else(|| KvmqError::NotFound(id.to_string()))?;
        state.index.remove(pos);
        let record = state
            .store
            .remove(id)
            .expect("index entry without a body store entry violates invariant (3)");
        Ok(record)
    }

    async fn peek_index(&self, index: i64) -> Result<QueueRecord> {
        let state = self.state.lock().await;
        let pos = resolve_read(index, state.index.len())?;
        let id = &state.index[pos];
        Ok(state.store[id].clone())
    }

    async fn peek_id(&self, id: &str) -> Result<QueueRecord> {
        let state = self.state.lock().await;
        state
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| KvmqError::NotFound(id.to_string()))
    }

    async fn peek_scan(&self) -> Result<Vec<Positioned>> {
        let state = self.state.lock().await;
        Ok(state
            .index
            .iter()
            .enumerate()
            .map(|(pos, id)| (pos, state.store[id].clone()))
            .collect())
    }

    async fn find(&self, pattern: &[u8]) -> Result<Option<Positioned>> {
        let state = self.state.lock().await;
        for (pos, id) in state.index.iter().enumerate() {
            let record = &state.store[id];
            if body_matches(&record.body, pattern) {
                return Ok(Some((pos, record.clone())));
            }
        }
        Ok(None)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.index.clear();
        state.store.clear();
        Ok(())
    }

    async fn rebuild_index(&self) -> Result<()> {
        // Iteration order over the store is not otherwise meaningful;
        // HashMap's order is whatever it is.
        let mut state = self.state.lock().await;
        state.index = state.store.keys().cloned().collect();
        Ok(())
    }

    async fn delete_queue(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.index.clear();
        state.store.clear();
        state.connected = false;
        Ok(())
    }

    async fn debug_index(&self) -> String {
        let state = self.state.lock().await;
        serde_json::to_string_pretty(&state.index).unwrap_or_default()
    }

    async fn debug_queue(&self) -> String {
        let state = self.state.lock().await;
        serde_json::to_string_pretty(&state.store).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.connect().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn push_then_pop_round_trips_the_body() {
        let backend = connected().await;
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        let record = backend.pop_index(0).await.unwrap();
        assert_eq!(record.body, b"A");
        assert_eq!(backend.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fifo_order_from_back_push_front_pop() {
        let backend = connected().await;
        for b in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec()] {
            backend.push_index(b, -1).await.unwrap();
        }
        let mut out = Vec::new();
        while backend.length().await.unwrap() > 0 {
            out.push(backend.pop_index(0).await.unwrap().body);
        }
        assert_eq!(out, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    }

    #[tokio::test]
    async fn lifo_order_from_back_push_back_pop() {
        let backend = connected().await;
        for b in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec()] {
            backend.push_index(b, -1).await.unwrap();
        }
        let mut out = Vec::new();
        while backend.length().await.unwrap() > 0 {
            out.push(backend.pop_index(-1).await.unwrap().body);
        }
        assert_eq!(out, vec![b"C".to_vec(), b"B".to_vec(), b"A".to_vec()]);
    }

    #[tokio::test]
    async fn push_first_then_pop_sees_most_recent_prepend() {
        // mirrors seed scenario S2
        let backend = connected().await;
        backend.push_index(b"A".to_vec(), 0).await.unwrap();
        backend.push_index(b"B".to_vec(), 0).await.unwrap();
        let record = backend.pop_index(0).await.unwrap();
        assert_eq!(record.body, b"B");
    }

    #[tokio::test]
    async fn positional_insert_lands_exactly_at_index() {
        // mirrors seed scenario S3
        let backend = connected().await;
        for b in [b"A".to_vec(), b"B".to_vec(), b"C".to_vec()] {
            backend.push_index(b, -1).await.unwrap();
        }
        backend.push_index(b"X".to_vec(), 1).await.unwrap();
        let scan = backend.peek_scan().await.unwrap();
        let bodies: Vec<_> = scan.into_iter().map(|(_, r)| r.body).collect();
        assert_eq!(
            bodies,
            vec![b"A".to_vec(), b"X".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );
    }

    #[tokio::test]
    async fn push_at_length_appends_instead_of_erroring() {
        let backend = connected().await;
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        let len = backend.length().await.unwrap() as i64;
        backend.push_index(b"B".to_vec(), len).await.unwrap();
        let scan = backend.peek_scan().await.unwrap();
        assert_eq!(scan[1].1.body, b"B");
    }

    #[tokio::test]
    async fn push_past_length_is_out_of_bounds() {
        let backend = connected().await;
        let err = backend.push_index(b"A".to_vec(), 5).await.unwrap_err();
        assert!(matches!(err, KvmqError::OutOfBounds { .. }));
    }

    #[tokio::test]
    async fn find_matches_substring_not_equality() {
        // mirrors seed scenario S4
        let backend = connected().await;
        for b in [b"A".to_vec(), b"Bee".to_vec(), b"C".to_vec()] {
            backend.push_index(b, -1).await.unwrap();
        }
        let (pos, record) = backend.find(b"ee").await.unwrap().unwrap();
        assert_eq!(pos, 1);
        assert_eq!(record.body, b"Bee");
        assert!(backend.find(b"zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_id_removes_the_named_record_regardless_of_position() {
        let backend = connected().await;
        let a = backend.push_index(b"A".to_vec(), -1).await.unwrap();
        backend.push_index(b"B".to_vec(), -1).await.unwrap();
        let popped = backend.pop_id(&a.id).await.unwrap();
        assert_eq!(popped.body, b"A");
        assert_eq!(backend.length().await.unwrap(), 1);
        assert!(matches!(
            backend.pop_id(&a.id).await.unwrap_err(),
            KvmqError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let backend = connected().await;
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        backend.clear().await.unwrap();
        backend.clear().await.unwrap();
        assert_eq!(backend.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_on_empty_queue_is_empty_error() {
        let backend = connected().await;
        assert!(matches!(
            backend.pop_index(0).await.unwrap_err(),
            KvmqError::Empty
        ));
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_preserves_state() {
        let backend = connected().await;
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        backend.connect().await.unwrap();
        assert_eq!(backend.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_pushes_and_pops_preserve_the_multiset() {
        use std::sync::Arc;
        let backend = Arc::new(connected().await);
        let mut handles = Vec::new();
        for i in 0..50u32 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.push_index(i.to_be_bytes().to_vec(), -1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(backend.length().await.unwrap(), 50);

        let mut popped = Vec::new();
        for _ in 0..50 {
            popped.push(backend.pop_index(0).await.unwrap().body);
        }
        let mut expected: Vec<Vec<u8>> = (0..50u32).map(|i| i.to_be_bytes().to_vec()).collect();
        popped.sort();
        expected.sort();
        assert_eq!(popped, expected);
    }
}

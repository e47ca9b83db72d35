//! Filesystem backend: one file per message plus one index file, guarded by
//! an on-disk lock file with TTL + PID takeover.
//!
//! ```text
//! D/_index   JSON array of ids, the authoritative order
//! D/<id>     one JSON-encoded QueueRecord per message
//! D/.lock    present only while a holder is active
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tokio::fs;
use tracing::{debug, trace};

use crate::backend::lockfile::{lock_path, FileLock, LockGuard};
use crate::backend::position::{resolve_push, resolve_read};
use crate::backend::search::body_matches;
use crate::backend::{Backend, Positioned};
use crate::error::{KvmqError, Result};
use crate::record::{new_random_id, QueueRecord, ID_SHAPE};

const DEFAULT_TTL: chrono::Duration = chrono::Duration::hours(24);
const INDEX_FILE: &str = "_index";

pub struct FilesystemBackend {
    directory: PathBuf,
    lock: FileLock,
    lock_ttl: StdDuration,
    lock_timeout: StdDuration,
}

impl FilesystemBackend {
    pub fn new(directory: impl Into<PathBuf>, lock_ttl: StdDuration, lock_timeout: StdDuration) -> Self {
        let directory = directory.into();
        Self {
            lock: FileLock::new(lock_path(&directory)),
            directory,
            lock_ttl,
            lock_timeout,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.directory.join(INDEX_FILE)
    }

    fn body_path(&self, id: &str) -> PathBuf {
        self.directory.join(id)
    }

    async fn acquire(&self) -> Result<LockGuard<'_>> {
        LockGuard::acquire(&self.lock, self.lock_ttl, self.lock_timeout).await
    }

    async fn read_index(&self) -> Result<Vec<String>> {
        match fs::read(self.index_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_index(&self, index: &[String]) -> Result<()> {
        write_atomic(&self.index_path(), &serde_json::to_vec(index)?).await
    }

    async fn read_body(&self, id: &str) -> Result<QueueRecord> {
        match fs::read(self.body_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(KvmqError::NotFound(id.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_body(&self, record: &QueueRecord) -> Result<()> {
        write_atomic(&self.body_path(&record.id), &serde_json::to_vec(record)?).await
    }

    async fn remove_body(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.body_path(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let unique = format!(
        "{}.tmp-{}-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id(),
        new_random_id()
    );
    let tmp_path = path.with_file_name(unique);
    fs::write(&tmp_path, bytes).await?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}

#[async_trait]
impl Backend for FilesystemBackend {
    async fn connect(&self) -> Result<()> {
        fs::create_dir_all(&self.directory).await?;
        let guard = self.acquire().await?;
        if fs::metadata(self.index_path()).await.is_err() {
            self.write_index(&[]).await?;
            debug!(dir = %self.directory.display(), "filesystem backend initialized");
        }
        guard.release().await;
        Ok(())
    }

    async fn length(&self) -> Result<usize> {
        let guard = self.acquire().await?;
        let index = self.read_index().await?;
        guard.release().await;
        Ok(index.len())
    }

    async fn push_index(&self, body: Vec<u8>, index: i64) -> Result<QueueRecord> {
        let guard = self.acquire().await?;
        let mut ids = self.read_index().await?;
        let pos = match resolve_push(index, ids.len()) {
            Ok(pos) => pos,
            Err(err) => {
                guard.release().await;
                return Err(err);
            }
        };
        let record = QueueRecord::new(new_random_id(), body, DEFAULT_TTL);
        if let Err(err) = self.write_body(&record).await {
            guard.release().await;
            return Err(err);
        }
        ids.insert(pos, record.id.clone());
        let result = self.write_index(&ids).await;
        guard.release().await;
        result?;
        trace!(pos, "pushed into filesystem backend");
        Ok(record)
    }

    async fn pop_index(&self, index: i64) -> Result<QueueRecord> {
        let guard = self.acquire().await?;
        let mut ids = self.read_index().await?;
        let pos = match resolve_read(index, ids.len()) {
            Ok(pos) => pos,
            Err(err) => {
                guard.release().await;
                return Err(err);
            }
        };
        let id = ids.remove(pos);
        let result = self.pop_committed(&id, &ids).await;
        guard.release().await;
        result
    }

    async fn pop_id(&self, id: &str) -> Result<QueueRecord> {
        let guard = self.acquire().await?;
        let mut ids = self.read_index().await?;
        let pos = match ids.iter().position(|existing| existing == id) {
            Some(pos) => pos,
            None => {
                guard.release().await;
                return Err(KvmqError::NotFound(id.to_string()));
            }
        };
        ids.remove(pos);
        let result = self.pop_committed(id, &ids).await;
        guard.release().await;
        result
    }

    async fn peek_index(&self, index: i64) -> Result<QueueRecord> {
        let guard = self.acquire().await?;
        let ids = self.read_index().await?;
        let result = match resolve_read(index, ids.len()) {
            Ok(pos) => self.read_body(&ids[pos]).await,
            Err(err) => Err(err),
        };
        guard.release().await;
        result
    }

    async fn peek_id(&self, id: &str) -> Result<QueueRecord> {
        let guard = self.acquire().await?;
        let ids = self.read_index().await?;
        let result = if ids.iter().any(|existing| existing == id) {
            self.read_body(id).await
        } else {
            Err(KvmqError::NotFound(id.to_string()))
        };
        guard.release().await;
        result
    }

    async fn peek_scan(&self) -> Result<Vec<Positioned>> {
        let guard = self.acquire().await?;
        let ids = self.read_index().await?;
        let mut out = Vec::with_capacity(ids.len());
        let mut error = None;
        for (pos, id) in ids.iter().enumerate() {
            match self.read_body(id).await {
                Ok(record) => out.push((pos, record)),
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        guard.release().await;
        match error {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    async fn find(&self, pattern: &[u8]) -> Result<Option<Positioned>> {
        let guard = self.acquire().await?;
        let ids = self.read_index().await?;
        let mut found = None;
        let mut error = None;
        for (pos, id) in ids.iter().enumerate() {
            match self.read_body(id).await {
                Ok(record) => {
                    if body_matches(&record.body, pattern) {
                        found = Some((pos, record));
                        break;
                    }
                }
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        guard.release().await;
        match error {
            Some(err) => Err(err),
            None => Ok(found),
        }
    }

    async fn clear(&self) -> Result<()> {
        let guard = self.acquire().await?;
        let ids = self.read_index().await?;
        let mut error = None;
        for id in &ids {
            if let Err(err) = self.remove_body(id).await {
                error = Some(err);
                break;
            }
        }
        if error.is_none() {
            error = self.write_index(&[]).await.err();
        }
        guard.release().await;
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Enumerates `D` for entries matching the random-id shape and rebuilds
    /// the index from them. Order is whatever `read_dir` yields and is not
    /// otherwise meaningful — this is a recovery tool, not a reordering
    /// primitive.
    async fn rebuild_index(&self) -> Result<()> {
        let guard = self.acquire().await?;
        let mut ids = Vec::new();
        let mut dir = match fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) => {
                guard.release().await;
                return Err(err.into());
            }
        };
        let result: Result<()> = async {
            while let Some(entry) = dir.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    if ID_SHAPE.is_match(name) {
                        ids.push(name.to_string());
                    }
                }
            }
            Ok(())
        }
        .await;
        let write_result = if result.is_ok() {
            self.write_index(&ids).await
        } else {
            Ok(())
        };
        guard.release().await;
        result?;
        write_result
    }

    async fn delete_queue(&self) -> Result<()> {
        let guard = self.acquire().await?;
        let ids = self.read_index().await?;
        let mut error = None;
        for id in &ids {
            if let Err(err) = self.remove_body(id).await {
                error = Some(err);
                break;
            }
        }
        if error.is_none() {
            if let Err(err) = fs::remove_file(self.index_path()).await {
                if err.kind() != ErrorKind::NotFound {
                    error = Some(err.into());
                }
            }
        }
        guard.release().await;
        if let Some(err) = error {
            return Err(err);
        }
        match fs::remove_dir(&self.directory).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            // Non-empty (e.g. another process re-created files mid-delete) is
            // not fatal to the contract: bodies and index are already gone.
            Err(_) => Ok(()),
        }
    }

    async fn debug_index(&self) -> String {
        match self.read_index().await {
            Ok(ids) => serde_json::to_string_pretty(&ids).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    async fn debug_queue(&self) -> String {
        let ids = self.read_index().await.unwrap_or_default();
        let mut records = Vec::new();
        for id in ids {
            if let Ok(record) = self.read_body(&id).await {
                records.push(record);
            }
        }
        serde_json::to_string_pretty(&records).unwrap_or_default()
    }
}

impl FilesystemBackend {
    async fn pop_committed(&self, id: &str, remaining_ids: &[String]) -> Result<QueueRecord> {
        let record = self.read_body(id).await?;
        self.remove_body(id).await?;
        self.write_index(remaining_ids).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> FilesystemBackend {
        FilesystemBackend::new(
            dir.path().to_path_buf(),
            StdDuration::from_secs(5),
            StdDuration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn push_survives_a_close_and_reopen() {
        // mirrors seed scenario S5
        let dir = TempDir::new().unwrap();
        {
            let backend = backend(&dir);
            backend.connect().await.unwrap();
            backend.push_index(b"hello".to_vec(), -1).await.unwrap();
        }
        let backend = backend(&dir);
        backend.connect().await.unwrap();
        let record = backend.pop_index(0).await.unwrap();
        assert_eq!(record.body, b"hello");
    }

    #[tokio::test]
    async fn fifo_and_positional_insert() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend.connect().await.unwrap();
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
    async fn no_orphans_after_clear() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend.connect().await.unwrap();
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        backend.push_index(b"B".to_vec(), -1).await.unwrap();
        backend.clear().await.unwrap();
        assert_eq!(backend.length().await.unwrap(), 0);
        // clear is idempotent
        backend.clear().await.unwrap();
    }

    #[tokio::test]
    async fn rebuild_index_recovers_from_directory_listing() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend.connect().await.unwrap();
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        backend.push_index(b"B".to_vec(), -1).await.unwrap();

        // Simulate a corrupted index by truncating it.
        backend.write_index(&[]).await.unwrap();
        assert_eq!(backend.length().await.unwrap(), 0);

        backend.rebuild_index().await.unwrap();
        assert_eq!(backend.length().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_queue_removes_the_directory() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend.connect().await.unwrap();
        backend.push_index(b"A".to_vec(), -1).await.unwrap();
        backend.delete_queue().await.unwrap();
        assert!(fs::metadata(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_pushes_from_two_handles_sum_to_total_length() {
        // mirrors seed scenario S10: two "processes" sharing one directory
        let dir = TempDir::new().unwrap();
        let a = std::sync::Arc::new(backend(&dir));
        a.connect().await.unwrap();
        let b = std::sync::Arc::new(backend(&dir));

        let mut handles = Vec::new();
        for i in 0..10u32 {
            let a = a.clone();
            handles.push(tokio::spawn(async move {
                a.push_index(format!("a{i}").into_bytes(), -1).await.unwrap();
            }));
        }
        for i in 0..10u32 {
            let b = b.clone();
            handles.push(tokio::spawn(async move {
                b.push_index(format!("b{i}").into_bytes(), -1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(a.length().await.unwrap(), 20);
    }
}

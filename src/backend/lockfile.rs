//! The filesystem backend's on-disk lock: a lock file carrying
//! `{pid, ttl_deadline}`, claimed with a PID+TTL takeover protocol.
//!
//! Mutual exclusion between *well-behaved* cooperating processes on a shared
//! filesystem; it does not defend against a crashed holder beyond the TTL
//! bound, nor against filesystems lacking atomic create-exclusive semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{KvmqError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    ttl_deadline: DateTime<Utc>,
}

pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Blocks (asynchronously) until the lock is claimed or `timeout`
    /// elapses. On success, the lock file on disk carries this process's
    /// PID and `now + ttl`.
    pub async fn acquire(&self, ttl: StdDuration, timeout: StdDuration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_claim(ttl).await? {
                return Ok(());
            }

            match self.read().await? {
                None => continue, // vanished between our failed claim and this read; retry immediately
                Some(record) => {
                    let expired = record.ttl_deadline < Utc::now();
                    let ours = record.pid == std::process::id();
                    if expired || ours {
                        debug!(pid = record.pid, expired, ours, "reclaiming stale lock");
                        self.remove_unchecked().await?;
                        // Short-circuit after a successful claim of a stale lock
                        // rather than falling into the wait loop below.
                        continue;
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(KvmqError::LockTimeout(timeout));
            }
            tokio::time::sleep(StdDuration::from_millis(100)).await;
        }
    }

    /// Best-effort: removes the lock file if it is ours or already expired.
    /// A release failure is logged and treated as non-fatal; the TTL
    /// guarantees eventual recovery regardless.
    pub async fn release(&self) {
        match self.read().await {
            Ok(Some(record)) => {
                let expired = record.ttl_deadline < Utc::now();
                let ours = record.pid == std::process::id();
                if expired || ours {
                    if let Err(err) = self.remove_unchecked().await {
                        warn!(error = %err, "failed to release filesystem lock");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read lock file during release"),
        }
    }

    async fn try_claim(&self, ttl: StdDuration) -> Result<bool> {
        let record = LockRecord {
            pid: std::process::id(),
            ttl_deadline: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
        };
        let bytes = serde_json::to_vec(&record)?;

        // O_EXCL create is the atomic test-and-set this protocol needs; a
        // plain write-to-temp+rename would silently clobber a concurrent
        // holder's lock instead of failing.
        use std::os::unix::fs::OpenOptionsExt;
        let result = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&self.path)
            .await;

        match result {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&bytes).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn read(&self) -> Result<Option<LockRecord>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_unchecked(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// RAII guard returned by [`FileLock::acquire`] through
/// [`LockGuard::acquire`], releasing the lock when dropped... except that
/// release is `async`, so backends call [`FileLock::release`] explicitly at
/// the end of the critical section instead of relying on `Drop`. Kept here
/// only as a path for a future sync wrapper if one is ever needed.
pub struct LockGuard<'a> {
    pub lock: &'a FileLock,
}

impl<'a> LockGuard<'a> {
    pub async fn acquire(lock: &'a FileLock, ttl: StdDuration, timeout: StdDuration) -> Result<Self> {
        lock.acquire(ttl, timeout).await?;
        Ok(Self { lock })
    }

    pub async fn release(self) {
        self.lock.release().await;
    }
}

pub fn lock_path(directory: &Path) -> PathBuf {
    directory.join(".lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn acquire_then_release_allows_a_second_acquire() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(lock_path(dir.path()));
        let guard = LockGuard::acquire(
            &lock,
            StdDuration::from_secs(5),
            StdDuration::from_secs(1),
        )
        .await
        .unwrap();
        guard.release().await;

        LockGuard::acquire(&lock, StdDuration::from_secs(5), StdDuration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed_within_one_retry_interval() {
        // mirrors seed scenario S6
        let dir = TempDir::new().unwrap();
        let path = lock_path(dir.path());
        let stale = LockRecord {
            pid: std::process::id().wrapping_add(1),
            ttl_deadline: Utc::now() - chrono::Duration::seconds(1),
        };
        tokio::fs::write(&path, serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let lock = FileLock::new(path);
        let result = tokio::time::timeout(
            StdDuration::from_millis(500),
            lock.acquire(StdDuration::from_secs(5), StdDuration::from_secs(5)),
        )
        .await;
        assert!(result.is_ok(), "expired lock should be reclaimed promptly");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn held_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(dir.path());
        let held = LockRecord {
            pid: std::process::id().wrapping_add(1),
            ttl_deadline: Utc::now() + chrono::Duration::seconds(60),
        };
        tokio::fs::write(&path, serde_json::to_vec(&held).unwrap())
            .await
            .unwrap();

        let lock = FileLock::new(path);
        let err = lock
            .acquire(StdDuration::from_secs(60), StdDuration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, KvmqError::LockTimeout(_)));
    }
}

//! Relational backend (C9): two tables inside one serializable transaction
//! per operation, row-locked on the singleton index row (spec §4.6).
//!
//! Grounded on the transactional shape of the Go original's `queue_rdbms.go`
//! (a `Q` row per message plus a singleton `IDX` row holding the serialized
//! id list, `clause.Locking{Strength: "UPDATE"}` on every transaction) and
//! ported onto `sqlx`'s engine-agnostic `Any` pool so one code path serves
//! sqlite, postgres, and mysql/tidb — the DDL and last-insert-id retrieval
//! are the only per-engine branches, matching what the original's gorm
//! dialects hid from the rest of the file.

use async_trait::async_trait;
use once_cell::sync::OnceCell as SyncOnceCell;
use sqlx::any::{AnyPool, AnyPoolOptions, AnyRow};
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::position::{resolve_push, resolve_read};
use crate::backend::search::body_matches;
use crate::backend::{Backend, Positioned};
use crate::config::{RdbmsConfig, RdbmsEngine};
use crate::error::{KvmqError, Result};
use crate::record::QueueRecord;

static DRIVERS_INSTALLED: SyncOnceCell<()> = SyncOnceCell::new();

const MESSAGES_TABLE: &str = "kvmq_messages";
const INDEX_TABLE: &str = "kvmq_index";

pub struct RdbmsBackend {
    config: RdbmsConfig,
    pool: RwLock<Option<AnyPool>>,
}

impl RdbmsBackend {
    pub fn new(config: RdbmsConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    fn connection_url(&self) -> Result<String> {
        match self.config.engine {
            RdbmsEngine::Sqlite => Ok(format!("sqlite://{}?mode=rwc", self.config.sqlite_path)),
            RdbmsEngine::Postgres | RdbmsEngine::Mysql | RdbmsEngine::Tidb => self
                .config
                .conn_string
                .clone()
                .ok_or_else(|| {
                    KvmqError::Config(
                        "you must supply a connection string for your chosen database engine"
                            .to_string(),
                    )
                }),
            RdbmsEngine::Sqlserver => Err(KvmqError::Config(
                "sqlserver is accepted for configuration shape compatibility but has no \
                 sqlx::Any driver in this port"
                    .to_string(),
            )),
        }
    }

    async fn pool(&self) -> Result<AnyPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| KvmqError::Config("rdbms backend is not connected".to_string()))
    }

    fn locking_suffix(&self) -> &'static str {
        match self.config.engine {
            RdbmsEngine::Sqlite => "",
            _ => " FOR UPDATE",
        }
    }

    fn messages_ddl(&self) -> String {
        match self.config.engine {
            RdbmsEngine::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {MESSAGES_TABLE} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    created_at TEXT NOT NULL,
                    ttl_deadline TEXT NOT NULL,
                    body BLOB NOT NULL,
                    stored_index INTEGER NOT NULL DEFAULT 0,
                    deleted_at TEXT
                )"
            ),
            RdbmsEngine::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {MESSAGES_TABLE} (
                    id BIGSERIAL PRIMARY KEY,
                    created_at TIMESTAMPTZ NOT NULL,
                    ttl_deadline TIMESTAMPTZ NOT NULL,
                    body BYTEA NOT NULL,
                    stored_index BIGINT NOT NULL DEFAULT 0,
                    deleted_at TIMESTAMPTZ
                )"
            ),
            RdbmsEngine::Mysql | RdbmsEngine::Tidb => format!(
                "CREATE TABLE IF NOT EXISTS {MESSAGES_TABLE} (
                    id BIGINT AUTO_INCREMENT PRIMARY KEY,
                    created_at DATETIME NOT NULL,
                    ttl_deadline DATETIME NOT NULL,
                    body BLOB NOT NULL,
                    stored_index BIGINT NOT NULL DEFAULT 0,
                    deleted_at DATETIME
                )"
            ),
            RdbmsEngine::Sqlserver => unreachable!("rejected in connection_url"),
        }
    }

    fn index_ddl(&self) -> String {
        match self.config.engine {
            RdbmsEngine::Sqlite => {
                format!("CREATE TABLE IF NOT EXISTS {INDEX_TABLE} (id INTEGER PRIMARY KEY, blob TEXT NOT NULL)")
            }
            RdbmsEngine::Postgres => {
                format!("CREATE TABLE IF NOT EXISTS {INDEX_TABLE} (id INTEGER PRIMARY KEY, blob TEXT NOT NULL)")
            }
            RdbmsEngine::Mysql | RdbmsEngine::Tidb => {
                format!("CREATE TABLE IF NOT EXISTS {INDEX_TABLE} (id INTEGER PRIMARY KEY, blob TEXT NOT NULL)")
            }
            RdbmsEngine::Sqlserver => unreachable!("rejected in connection_url"),
        }
    }

    async fn read_index_locked(&self, tx: &mut sqlx::Transaction<'_, sqlx::Any>) -> Result<Vec<i64>> {
        let query = format!("SELECT blob FROM {INDEX_TABLE} WHERE id = 1{}", self.locking_suffix());
        let row: AnyRow = sqlx::query(&query).fetch_one(&mut **tx).await?;
        let blob: String = row.try_get("blob")?;
        Ok(serde_json::from_str(&blob)?)
    }

    async fn write_index(&self, tx: &mut sqlx::Transaction<'_, sqlx::Any>, ids: &[i64]) -> Result<()> {
        let blob = serde_json::to_string(ids)?;
        sqlx::query(&format!("UPDATE {INDEX_TABLE} SET blob = ? WHERE id = 1"))
            .bind(blob)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_message(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Any>,
        body: &[u8],
        created_at: chrono::DateTime<chrono::Utc>,
        ttl_deadline: chrono::DateTime<chrono::Utc>,
    ) -> Result<i64> {
        sqlx::query(&format!(
            "INSERT INTO {MESSAGES_TABLE} (created_at, ttl_deadline, body, stored_index) VALUES (?, ?, ?, 0)"
        ))
        .bind(created_at.to_rfc3339())
        .bind(ttl_deadline.to_rfc3339())
        .bind(body.to_vec())
        .execute(&mut **tx)
        .await?;

        let id: i64 = match self.config.engine {
            RdbmsEngine::Sqlite => {
                let row: AnyRow = sqlx::query("SELECT last_insert_rowid() AS id")
                    .fetch_one(&mut **tx)
                    .await?;
                row.try_get("id")?
            }
            RdbmsEngine::Mysql | RdbmsEngine::Tidb => {
                let row: AnyRow = sqlx::query("SELECT LAST_INSERT_ID() AS id")
                    .fetch_one(&mut **tx)
                    .await?;
                row.try_get("id")?
            }
            RdbmsEngine::Postgres => {
                let row: AnyRow = sqlx::query("SELECT lastval() AS id")
                    .fetch_one(&mut **tx)
                    .await?;
                row.try_get("id")?
            }
            RdbmsEngine::Sqlserver => unreachable!("rejected in connection_url"),
        };

        // stored_index mirrors the row's own auto-increment id so
        // rebuild_index has a stable creation-order fallback that doesn't
        // depend on the mutable position blob (spec leaves the exact value
        // open; the original stored the raw push token, which could be -1
        // and would sort rebuild_index backwards — see DESIGN.md).
        sqlx::query(&format!("UPDATE {MESSAGES_TABLE} SET stored_index = ? WHERE id = ?"))
            .bind(id)
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(id)
    }

    async fn fetch_message(&self, tx: &mut sqlx::Transaction<'_, sqlx::Any>, id: i64) -> Result<QueueRecord> {
        let row = sqlx::query(&format!(
            "SELECT id, created_at, ttl_deadline, body FROM {MESSAGES_TABLE} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| KvmqError::NotFound(id.to_string()))?;
        row_to_record(&row)
    }

    async fn remove_message(&self, tx: &mut sqlx::Transaction<'_, sqlx::Any>, id: i64) -> Result<()> {
        if self.config.hard_delete {
            sqlx::query(&format!("DELETE FROM {MESSAGES_TABLE} WHERE id = ?"))
                .bind(id)
                .execute(&mut **tx)
                .await?;
        } else {
            sqlx::query(&format!("UPDATE {MESSAGES_TABLE} SET deleted_at = ? WHERE id = ?"))
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

fn row_to_record(row: &AnyRow) -> Result<QueueRecord> {
    let id: i64 = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let ttl_deadline: String = row.try_get("ttl_deadline")?;
    let body: Vec<u8> = row.try_get("body")?;
    Ok(QueueRecord {
        id: id.to_string(),
        created_at: parse_timestamp(&created_at)?,
        ttl_deadline: parse_timestamp(&ttl_deadline)?,
        body,
    })
}

fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|err| KvmqError::Config(format!("unparseable timestamp {raw:?}: {err}")))
}

fn parse_id(id: &str) -> Result<i64> {
    id.parse().map_err(|_| KvmqError::NotFound(id.to_string()))
}

#[async_trait]
impl Backend for RdbmsBackend {
    async fn connect(&self) -> Result<()> {
        DRIVERS_INSTALLED.get_or_init(sqlx::any::install_default_drivers);

        let url = self.connection_url()?;
        let pool = AnyPoolOptions::new().max_connections(5).connect(&url).await?;

        sqlx::query(&self.messages_ddl()).execute(&pool).await?;
        sqlx::query(&self.index_ddl()).execute(&pool).await?;

        let existing = sqlx::query(&format!("SELECT blob FROM {INDEX_TABLE} WHERE id = 1"))
            .fetch_optional(&pool)
            .await?;
        if existing.is_none() {
            sqlx::query(&format!("INSERT INTO {INDEX_TABLE} (id, blob) VALUES (1, ?)"))
                .bind("[]")
                .execute(&pool)
                .await?;
        }

        *self.pool.write().await = Some(pool);
        debug!(engine = ?self.config.engine, "rdbms backend connected");
        Ok(())
    }

    async fn length(&self) -> Result<usize> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let ids = self.read_index_locked(&mut tx).await?;
        tx.commit().await?;
        Ok(ids.len())
    }

    async fn push_index(&self, body: Vec<u8>, index: i64) -> Result<QueueRecord> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut ids = self.read_index_locked(&mut tx).await?;
        let pos = resolve_push(index, ids.len())?;

        let now = chrono::Utc::now();
        let ttl = now + chrono::Duration::hours(24);
        let id = self.insert_message(&mut tx, &body, now, ttl).await?;
        ids.insert(pos, id);
        self.write_index(&mut tx, &ids).await?;
        tx.commit().await?;

        Ok(QueueRecord {
            id: id.to_string(),
            created_at: now,
            ttl_deadline: ttl,
            body,
        })
    }

    async fn pop_index(&self, index: i64) -> Result<QueueRecord> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut ids = self.read_index_locked(&mut tx).await?;
        let pos = resolve_read(index, ids.len())?;
        let id = ids.remove(pos);
        let record = self.fetch_message(&mut tx, id).await?;
        self.remove_message(&mut tx, id).await?;
        self.write_index(&mut tx, &ids).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn pop_id(&self, id: &str) -> Result<QueueRecord> {
        let row_id = parse_id(id)?;
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut ids = self.read_index_locked(&mut tx).await?;
        let pos = ids
            .iter()
            .position(|existing| *existing == row_id)
            .ok_or_else(|| KvmqError::NotFound(id.to_string()))?;
        ids.remove(pos);
        let record = self.fetch_message(&mut tx, row_id).await?;
        self.remove_message(&mut tx, row_id).await?;
        self.write_index(&mut tx, &ids).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn peek_index(&self, index: i64) -> Result<QueueRecord> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let ids = self.read_index_locked(&mut tx).await?;
        let pos = resolve_read(index, ids.len())?;
        let record = self.fetch_message(&mut tx, ids[pos]).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn peek_id(&self, id: &str) -> Result<QueueRecord> {
        let row_id = parse_id(id)?;
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let ids = self.read_index_locked(&mut tx).await?;
        if !ids.contains(&row_id) {
            return Err(KvmqError::NotFound(id.to_string()));
        }
        let record = self.fetch_message(&mut tx, row_id).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn peek_scan(&self) -> Result<Vec<Positioned>> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let ids = self.read_index_locked(&mut tx).await?;
        let mut out = Vec::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            out.push((pos, self.fetch_message(&mut tx, *id).await?));
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn find(&self, pattern: &[u8]) -> Result<Option<Positioned>> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let ids = self.read_index_locked(&mut tx).await?;
        let mut found = None;
        for (pos, id) in ids.iter().enumerate() {
            let record = self.fetch_message(&mut tx, *id).await?;
            if body_matches(&record.body, pattern) {
                found = Some((pos, record));
                break;
            }
        }
        tx.commit().await?;
        Ok(found)
    }

    async fn clear(&self) -> Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {MESSAGES_TABLE}")).execute(&mut *tx).await?;
        self.write_index(&mut tx, &[]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rebuild_index(&self) -> Result<()> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT id FROM {MESSAGES_TABLE} WHERE deleted_at IS NULL ORDER BY stored_index ASC"
        ))
        .fetch_all(&mut *tx)
        .await?;
        let ids: Vec<i64> = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<_, _>>()?;
        self.write_index(&mut tx, &ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_queue(&self) -> Result<()> {
        let pool = self.pool().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {MESSAGES_TABLE}")).execute(&pool).await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {INDEX_TABLE}")).execute(&pool).await?;
        *self.pool.write().await = None;
        Ok(())
    }

    async fn debug_index(&self) -> String {
        let Ok(pool) = self.pool().await else {
            return String::new();
        };
        let Ok(mut tx) = pool.begin().await else {
            return String::new();
        };
        match self.read_index_locked(&mut tx).await {
            Ok(ids) => serde_json::to_string_pretty(&ids).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    async fn debug_queue(&self) -> String {
        let Ok(pool) = self.pool().await else {
            return String::new();
        };
        let Ok(rows) = sqlx::query(&format!("SELECT id, body FROM {MESSAGES_TABLE} WHERE deleted_at IS NULL"))
            .fetch_all(&pool)
            .await
        else {
            return String::new();
        };
        let dump: Vec<_> = rows
            .iter()
            .filter_map(|row| {
                let id: i64 = row.try_get("id").ok()?;
                let body: Vec<u8> = row.try_get("body").ok()?;
                Some(serde_json::json!({ "id": id, "body_len": body.len() }))
            })
            .collect();
        serde_json::to_string_pretty(&dump).unwrap_or_default()
    }
}

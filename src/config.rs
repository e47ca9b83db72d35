//! Configuration accepted at construction time.
//!
//! This crate is a library: it never searches the filesystem for a config
//! file itself. A host application builds a `Config` (directly, or by
//! deserializing its own config file into one — every struct here derives
//! `Deserialize`) and passes it to [`crate::Mq::new`].

use serde::{Deserialize, Serialize};

/// Which storage engine backs the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Filesystem,
    Rdbms,
    Redis,
    Custom,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,

    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,

    #[serde(default)]
    pub filesystem: FilesystemConfig,

    #[serde(default)]
    pub rdbms: RdbmsConfig,

    #[serde(default)]
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_filesystem_directory")]
    pub directory: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RdbmsEngine {
    Sqlite,
    Mysql,
    Postgres,
    Sqlserver,
    Tidb,
}

impl Default for RdbmsEngine {
    fn default() -> Self {
        RdbmsEngine::Sqlite
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdbmsConfig {
    #[serde(default)]
    pub engine: RdbmsEngine,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default)]
    pub conn_string: Option<String>,

    #[serde(default)]
    pub hard_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub db: i64,
}

fn default_name() -> String {
    "kvmq".to_string()
}

fn default_lock_ttl_seconds() -> u64 {
    5
}

fn default_lock_timeout_seconds() -> u64 {
    30
}

fn default_filesystem_directory() -> String {
    ".kvmq/".to_string()
}

fn default_sqlite_path() -> String {
    "kvmq.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: default_name(),
            backend: BackendKind::default(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            filesystem: FilesystemConfig::default(),
            rdbms: RdbmsConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        FilesystemConfig {
            directory: default_filesystem_directory(),
        }
    }
}

impl Default for RdbmsConfig {
    fn default() -> Self {
        RdbmsConfig {
            engine: RdbmsEngine::default(),
            sqlite_path: default_sqlite_path(),
            conn_string: None,
            hard_delete: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig { db: 0 }
    }
}

impl FilesystemConfig {
    /// Coerces `directory` to end with `/`.
    pub fn normalized_directory(&self) -> String {
        if self.directory.ends_with('/') {
            self.directory.clone()
        } else {
            format!("{}/", self.directory)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.name, "kvmq");
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.lock_ttl_seconds, 5);
        assert_eq!(config.lock_timeout_seconds, 30);
        assert_eq!(config.filesystem.directory, ".kvmq/");
        assert_eq!(config.rdbms.engine, RdbmsEngine::Sqlite);
        assert_eq!(config.rdbms.sqlite_path, "kvmq.db");
        assert_eq!(config.rdbms.hard_delete, false);
        assert_eq!(config.redis.db, 0);
    }

    #[test]
    fn filesystem_directory_gets_trailing_slash() {
        let mut fs = FilesystemConfig::default();
        fs.directory = "/tmp/q".to_string();
        assert_eq!(fs.normalized_directory(), "/tmp/q/");
        fs.directory = "/tmp/q/".to_string();
        assert_eq!(fs.normalized_directory(), "/tmp/q/");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Config::default();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: Config = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.name, config.name);
        assert_eq!(decoded.backend, config.backend);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let decoded: Config = serde_json::from_str(r#"{"name": "jobs"}"#).unwrap();
        assert_eq!(decoded.name, "jobs");
        assert_eq!(decoded.backend, BackendKind::Memory);
        assert_eq!(decoded.lock_ttl_seconds, 5);
    }
}

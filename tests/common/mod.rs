use std::path::Path;

use kvmq::config::{BackendKind, Config, RdbmsEngine};

/// Builds a memory-backed config. `name` only scopes the logical queue name
/// (the backend itself keeps no cross-instance state).
pub fn memory_config(name: &str) -> Config {
    let mut config = Config::default();
    config.name = name.to_string();
    config.backend = BackendKind::Memory;
    config
}

/// Builds a filesystem-backed config rooted at `dir`.
pub fn filesystem_config(name: &str, dir: &Path) -> Config {
    let mut config = Config::default();
    config.name = name.to_string();
    config.backend = BackendKind::Filesystem;
    config.filesystem.directory = dir.to_string_lossy().to_string();
    config
}

/// Builds a sqlite-backed config rooted at `dir`.
pub fn sqlite_config(name: &str, dir: &Path) -> Config {
    let mut config = Config::default();
    config.name = name.to_string();
    config.backend = BackendKind::Rdbms;
    config.rdbms.engine = RdbmsEngine::Sqlite;
    config.rdbms.sqlite_path = dir.join(format!("{name}.db")).to_string_lossy().to_string();
    config
}

/// Installs [`kvmq::logging::ConditionalLocationFormatter`] for the current
/// test binary. Safe to call from multiple tests — later calls are no-ops
/// once a global subscriber is set.
#[allow(dead_code)]
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(kvmq::logging::ConditionalLocationFormatter)
        .with_test_writer()
        .try_init();
}

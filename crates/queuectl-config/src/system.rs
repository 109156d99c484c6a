//! System configuration parsing.

use crate::nodes::{children, get_first_string_arg, require_positive, require_string};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "queuectl.kdl";

const DEFAULT_DATA_DIR: &str = ".queuectl";
const SQLITE_FILE: &str = "queue.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// System-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub store: StoreConfig,
    pub workers: WorkerConfig,
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// JSON snapshot files in a data directory.
    Json { data_dir: PathBuf },
    /// SQLite database file.
    Sqlite { path: PathBuf },
    /// PostgreSQL database.
    Postgres { url: String, max_connections: u32 },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Json {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl StoreConfig {
    pub fn backend(&self) -> &'static str {
        match self {
            StoreConfig::Json { .. } => "json",
            StoreConfig::Sqlite { .. } => "sqlite",
            StoreConfig::Postgres { .. } => "postgres",
        }
    }
}

/// Worker pool tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub stop_grace_sec: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300,
            stop_grace_sec: 5,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_sec)
    }
}

impl SystemConfig {
    /// Point a JSON store at `dir`, or a SQLite store at `dir/queue.db`. Has
    /// no effect on a Postgres store.
    pub fn override_data_dir(&mut self, dir: impl Into<PathBuf>) {
        match &mut self.store {
            StoreConfig::Json { data_dir } => *data_dir = dir.into(),
            StoreConfig::Sqlite { path } => *path = dir.into().join(SQLITE_FILE),
            StoreConfig::Postgres { .. } => {}
        }
    }

    /// Replace a Postgres store's URL. Has no effect on other stores.
    pub fn override_database_url(&mut self, database_url: impl Into<String>) {
        if let StoreConfig::Postgres { url, .. } = &mut self.store {
            *url = database_url.into();
        }
    }
}

/// Parse system configuration from KDL text.
///
/// ```kdl
/// // or: store "json" { data-dir ".queuectl"; }
/// // or: store "sqlite" { path ".queuectl/queue.db"; }
/// store "postgres" {
///     url "postgres://localhost/queuectl"
///     max-connections 10
/// }
/// workers {
///     poll-interval-ms 300
///     stop-grace-sec 5
/// }
/// ```
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut store = None;
    let mut workers = None;

    for node in doc.nodes() {
        match node.name().value() {
            "store" => {
                if store.is_some() {
                    return Err(ConfigError::Duplicate("store".to_string()));
                }
                store = Some(parse_store(node)?);
            }
            "workers" => {
                if workers.is_some() {
                    return Err(ConfigError::Duplicate("workers".to_string()));
                }
                workers = Some(parse_workers(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(SystemConfig {
        store: store.unwrap_or_default(),
        workers: workers.unwrap_or_default(),
    })
}

/// Load the configuration at `path`, or the defaults if the file does not exist.
pub fn load(path: &Path) -> ConfigResult<SystemConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_system_config(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SystemConfig::default()),
        Err(e) => Err(e.into()),
    }
}

fn parse_store(node: &KdlNode) -> ConfigResult<StoreConfig> {
    let backend = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("store backend".to_string()))?;

    match backend.as_str() {
        "json" => {
            let mut data_dir = PathBuf::from(DEFAULT_DATA_DIR);
            for (name, child) in children(node) {
                if name == "data-dir" {
                    data_dir = PathBuf::from(require_string(child, "data-dir")?);
                }
            }
            Ok(StoreConfig::Json { data_dir })
        }
        "sqlite" => {
            let mut path = PathBuf::from(DEFAULT_DATA_DIR).join(SQLITE_FILE);
            for (name, child) in children(node) {
                if name == "path" {
                    path = PathBuf::from(require_string(child, "path")?);
                }
            }
            Ok(StoreConfig::Sqlite { path })
        }
        "postgres" => {
            let mut url = None;
            let mut max_connections = DEFAULT_MAX_CONNECTIONS;
            for (name, child) in children(node) {
                match name {
                    "url" => url = Some(require_string(child, "url")?),
                    "max-connections" => {
                        max_connections = require_positive(child, "max-connections")?
                    }
                    _ => {}
                }
            }
            // The URL may also come from DATABASE_URL, applied by the caller.
            Ok(StoreConfig::Postgres {
                url: url.unwrap_or_default(),
                max_connections,
            })
        }
        _ => Err(ConfigError::InvalidValue {
            field: "store backend".to_string(),
            message: format!("unknown store backend: {}", backend),
        }),
    }
}

fn parse_workers(node: &KdlNode) -> ConfigResult<WorkerConfig> {
    let mut config = WorkerConfig::default();
    for (name, child) in children(node) {
        match name {
            "poll-interval-ms" => config.poll_interval_ms = require_positive(child, name)?,
            "stop-grace-sec" => config.stop_grace_sec = require_positive(child, name)?,
            _ => {}
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(
            config.store,
            StoreConfig::Json {
                data_dir: PathBuf::from(".queuectl")
            }
        );
        assert_eq!(config.workers.poll_interval(), Duration::from_millis(300));
        assert_eq!(config.workers.stop_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_json_store() {
        let kdl = r#"
            store "json" {
                data-dir "/var/lib/queuectl"
            }
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.store.backend(), "json");
        assert_eq!(
            config.store,
            StoreConfig::Json {
                data_dir: PathBuf::from("/var/lib/queuectl")
            }
        );
    }

    #[test]
    fn test_parse_sqlite_store() {
        let config = parse_system_config(r#"store "sqlite""#).unwrap();
        assert_eq!(config.store.backend(), "sqlite");
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from(".queuectl/queue.db")
            }
        );

        let kdl = r#"
            store "sqlite" {
                path "/var/lib/queuectl/jobs.db"
            }
        "#;
        assert_eq!(
            parse_system_config(kdl).unwrap().store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/var/lib/queuectl/jobs.db")
            }
        );
    }

    #[test]
    fn test_parse_postgres_store_and_workers() {
        let kdl = r#"
            store "postgres" {
                url "postgres://localhost/queuectl"
                max-connections 4
            }

            workers {
                poll-interval-ms 50
                stop-grace-sec 10
            }
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                url: "postgres://localhost/queuectl".to_string(),
                max_connections: 4,
            }
        );
        assert_eq!(config.workers.poll_interval_ms, 50);
        assert_eq!(config.workers.stop_grace_sec, 10);
    }

    #[test]
    fn test_unknown_backend() {
        let result = parse_system_config(r#"store "redis""#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { field, .. } if field == "store backend"
        ));
    }

    #[test]
    fn test_missing_backend() {
        assert!(matches!(
            parse_system_config("store").unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_duplicate_store() {
        let kdl = r#"
            store "json"
            store "postgres"
        "#;
        assert!(matches!(
            parse_system_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_invalid_worker_values() {
        let zero = "workers { poll-interval-ms 0; }";
        assert!(matches!(
            parse_system_config(zero).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));

        let text = r#"workers { stop-grace-sec "five"; }"#;
        assert!(matches!(
            parse_system_config(text).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_system_config("store {").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_overrides_apply_to_matching_backend() {
        let mut config = SystemConfig::default();
        config.override_database_url("postgres://ignored");
        config.override_data_dir("/tmp/q");
        assert_eq!(
            config.store,
            StoreConfig::Json {
                data_dir: PathBuf::from("/tmp/q")
            }
        );

        let mut config = parse_system_config(r#"store "sqlite""#).unwrap();
        config.override_data_dir("/tmp/q");
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/tmp/q/queue.db")
            }
        );

        let mut config = parse_system_config(r#"store "postgres""#).unwrap();
        config.override_data_dir("/tmp/q");
        config.override_database_url("postgres://db/queue");
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                url: "postgres://db/queue".to_string(),
                max_connections: 10,
            }
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config, SystemConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "workers { poll-interval-ms 25; }").unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.workers.poll_interval_ms, 25);
        assert_eq!(config.store, StoreConfig::default());
    }
}

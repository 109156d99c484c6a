//! KDL system configuration for queuectl.
//!
//! The system configuration (`queuectl.kdl`) selects the storage backend and
//! tunes the worker pool. Queue settings such as `max_retries` live in the
//! store itself, not here.

pub mod error;
mod nodes;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DEFAULT_CONFIG_FILE, StoreConfig, SystemConfig, WorkerConfig, load, parse_system_config,
};

//! Queue settings: the key/value configuration persisted alongside the jobs.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const MAX_RETRIES: &str = "max_retries";
pub const BACKOFF_BASE: &str = "backoff_base";
pub const JOB_TIMEOUT_SEC: &str = "job_timeout_sec";
pub const HEARTBEAT_SEC: &str = "heartbeat_sec";

/// A stored configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, From)]
#[serde(untagged)]
pub enum ConfigValue {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0}")]
    Str(String),
}

impl ConfigValue {
    /// Integer literals (`-?[0-9]+`) become integers, anything else a string.
    pub fn parse(raw: &str) -> Self {
        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<i64>() {
                return ConfigValue::Int(n);
            }
        }
        ConfigValue::Str(raw.to_string())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(n) => Some(*n),
            ConfigValue::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Str(s.to_string())
    }
}

pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// The configuration every store starts from.
pub fn default_config() -> ConfigMap {
    let defaults = QueueSettings::default();
    ConfigMap::from([
        (MAX_RETRIES.to_string(), ConfigValue::Int(defaults.max_retries.into())),
        (BACKOFF_BASE.to_string(), ConfigValue::Int(defaults.backoff_base.into())),
        (JOB_TIMEOUT_SEC.to_string(), ConfigValue::Int(defaults.job_timeout_sec as i64)),
        (HEARTBEAT_SEC.to_string(), ConfigValue::Int(defaults.heartbeat_sec as i64)),
    ])
}

/// Fill in defaults for any known key the stored map is missing.
pub fn with_defaults(mut config: ConfigMap) -> ConfigMap {
    for (key, value) in default_config() {
        config.entry(key).or_insert(value);
    }
    config
}

/// Typed view over the known configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_retries: u32,
    pub backoff_base: u32,
    pub job_timeout_sec: u64,
    pub heartbeat_sec: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            job_timeout_sec: 60,
            heartbeat_sec: 5,
        }
    }
}

impl QueueSettings {
    /// Read the known keys, keeping the default for missing or non-numeric values.
    pub fn from_config(config: &ConfigMap) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: read(config, MAX_RETRIES).unwrap_or(defaults.max_retries),
            backoff_base: read(config, BACKOFF_BASE).unwrap_or(defaults.backoff_base),
            job_timeout_sec: read(config, JOB_TIMEOUT_SEC).unwrap_or(defaults.job_timeout_sec),
            heartbeat_sec: read(config, HEARTBEAT_SEC).unwrap_or(defaults.heartbeat_sec),
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_sec)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_sec.max(1))
    }
}

fn read<T: TryFrom<i64>>(config: &ConfigMap, key: &str) -> Option<T> {
    config
        .get(key)
        .and_then(ConfigValue::as_int)
        .and_then(|n| T::try_from(n).ok())
}

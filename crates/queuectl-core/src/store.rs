//! Storage port: the persistence contract the job engine depends on.
//!
//! Every save replaces the whole collection. Stores perform no merging, so
//! callers must load before they save, under their own lock.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::Job;
use crate::settings::ConfigMap;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Whole-collection persistence for the active jobs, the dead letter queue
/// and the queue configuration.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Name of this backend, for logs.
    fn name(&self) -> &'static str;

    /// Load the configuration, with defaults filled in for missing keys.
    async fn load_config(&self) -> StoreResult<ConfigMap>;

    async fn save_config(&self, config: &ConfigMap) -> StoreResult<()>;

    /// Load the full active job set.
    async fn load_jobs(&self) -> StoreResult<Vec<Job>>;

    /// Replace the full active job set.
    async fn save_jobs(&self, jobs: &[Job]) -> StoreResult<()>;

    async fn load_dlq(&self) -> StoreResult<Vec<Job>>;

    async fn save_dlq(&self, jobs: &[Job]) -> StoreResult<()>;
}

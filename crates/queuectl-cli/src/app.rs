//! Wiring: store, queue, executor and worker pool built from the system config.

use anyhow::{Context, Result};
use queuectl_config::{StoreConfig, SystemConfig};
use queuectl_core::{CommandRunner, JobStore};
use queuectl_db::{JsonStore, PgStore, SqliteStore};
use queuectl_executor::ShellExecutor;
use queuectl_scheduler::{JobQueue, PoolOptions, WorkerPool};
use std::sync::Arc;
use tracing::info;

/// Everything a command needs.
pub struct App {
    pub queue: Arc<JobQueue>,
    pub pool: WorkerPool,
}

impl App {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn CommandRunner>,
        options: PoolOptions,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(store));
        let pool = WorkerPool::with_options(queue.clone(), runner, options);
        Self { queue, pool }
    }

    /// Open the configured store and build the queue on top of it.
    pub async fn open(config: &SystemConfig) -> Result<Self> {
        let store = open_store(&config.store).await?;
        info!(backend = config.store.backend(), "Opened job store");

        let options = PoolOptions {
            poll_interval: config.workers.poll_interval(),
            stop_grace: config.workers.stop_grace(),
        };
        Ok(Self::new(store, Arc::new(ShellExecutor::new()), options))
    }

    /// Stop workers if any are running, e.g. before exiting.
    pub async fn shutdown(&self) -> Result<()> {
        if self.pool.is_running() {
            self.pool.stop().await?;
        }
        Ok(())
    }
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    match config {
        StoreConfig::Json { data_dir } => {
            let store = JsonStore::open(data_dir.clone())
                .await
                .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
            Ok(Arc::new(store))
        }
        StoreConfig::Sqlite { path } => {
            let store = SqliteStore::open(path.clone())
                .await
                .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        StoreConfig::Postgres {
            url,
            max_connections,
        } => {
            if url.is_empty() {
                anyhow::bail!("Postgres store selected but no url configured (set DATABASE_URL)");
            }
            let store = PgStore::connect(url, *max_connections)
                .await
                .context("Failed to connect to database")?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_core::Job;

    #[tokio::test]
    async fn test_open_sqlite_store_persists_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = queuectl_config::parse_system_config(r#"store "sqlite""#).unwrap();
        config.override_data_dir(dir.path());

        let app = App::open(&config).await.unwrap();
        assert_eq!(app.queue.store_name(), "sqlite");
        app.queue.enqueue(Job::new("job1", "echo hi")).await.unwrap();
        drop(app);

        let app = App::open(&config).await.unwrap();
        let jobs = app.queue.list(None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "job1");
        assert!(dir.path().join("queue.db").exists());
    }

    #[tokio::test]
    async fn test_open_postgres_without_url_fails() {
        let config = queuectl_config::parse_system_config(r#"store "postgres""#).unwrap();
        let err = App::open(&config).await.err().unwrap();
        assert!(err.to_string().contains("no url configured"));
    }
}

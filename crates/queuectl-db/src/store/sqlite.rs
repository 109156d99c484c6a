//! SQLite store: a relational backend that runs without a server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_core::settings::default_config;
use queuectl_core::{ConfigMap, ConfigValue, Job, JobState, JobStore, StoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{DbError, DbResult};

/// Rows per multi-row INSERT; keeps well under SQLite's bind parameter limit.
const INSERT_CHUNK: usize = 500;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    run_at: Option<DateTime<Utc>>,
    priority: i64,
    last_error: Option<String>,
    worker_id: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let state: JobState = row
            .state
            .parse()
            .map_err(|_| DbError::Corrupt(format!("job {} has state '{}'", row.id, row.state)))?;
        Ok(Job {
            attempts: in_range(row.attempts, &row.id)?,
            max_retries: in_range(row.max_retries, &row.id)?,
            priority: in_range(row.priority, &row.id)?,
            id: row.id,
            command: row.command,
            state,
            created_at: row.created_at,
            updated_at: row.updated_at,
            run_at: row.run_at,
            last_error: row.last_error,
            worker_id: row.worker_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DlqRow {
    id: String,
    command: String,
    attempts: i64,
    max_retries: i64,
    priority: i64,
    created_at: DateTime<Utc>,
    failed_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl TryFrom<DlqRow> for Job {
    type Error = DbError;

    fn try_from(row: DlqRow) -> DbResult<Self> {
        Ok(Job {
            attempts: in_range(row.attempts, &row.id)?,
            max_retries: in_range(row.max_retries, &row.id)?,
            priority: in_range(row.priority, &row.id)?,
            id: row.id,
            command: row.command,
            state: JobState::Dead,
            created_at: row.created_at,
            updated_at: row.failed_at,
            run_at: None,
            last_error: row.last_error,
            worker_id: None,
        })
    }
}

/// SQLite integers are 64-bit; narrow them to the job's field types.
fn in_range<T: TryFrom<i64>>(value: i64, id: &str) -> DbResult<T> {
    T::try_from(value)
        .map_err(|_| DbError::Corrupt(format!("job {} has out of range value {}", id, value)))
}

/// Stores the three collections in a SQLite database file.
///
/// Saves run in a transaction that deletes and re-inserts the collection,
/// like [`PgStore`](crate::PgStore).
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`, apply migrations and
    /// seed the default configuration.
    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        // One connection: the queue already serializes every operation.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        let store = Self { pool, path };
        store.seed_defaults().await?;
        info!(path = %store.path.display(), "SQLite store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn seed_defaults(&self) -> DbResult<()> {
        for (key, value) in default_config() {
            sqlx::query(
                "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value.to_string())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn fetch_config(&self) -> DbResult<ConfigMap> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        let mut config = default_config();
        config.extend(
            rows.into_iter()
                .map(|(key, value)| (key, ConfigValue::parse(&value))),
        );
        Ok(config)
    }

    async fn replace_config(&self, config: &ConfigMap) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM config").execute(&mut *tx).await?;
        for (key, value) in config {
            sqlx::query("INSERT INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_jobs(&self) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn replace_jobs(&self, jobs: &[Job]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jobs").execute(&mut *tx).await?;

        for chunk in jobs.chunks(INSERT_CHUNK) {
            let mut query_builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, \
                 updated_at, run_at, priority, last_error, worker_id) ",
            );
            query_builder.push_values(chunk, |mut b, job| {
                b.push_bind(&job.id)
                    .push_bind(&job.command)
                    .push_bind(job.state.as_str())
                    .push_bind(i64::from(job.attempts))
                    .push_bind(i64::from(job.max_retries))
                    .push_bind(job.created_at)
                    .push_bind(job.updated_at)
                    .push_bind(job.run_at)
                    .push_bind(i64::from(job.priority))
                    .push_bind(&job.last_error)
                    .push_bind(&job.worker_id);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(count = jobs.len(), "Saved active jobs");
        Ok(())
    }

    async fn fetch_dlq(&self) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, DlqRow>(
            "SELECT id, command, attempts, max_retries, priority, created_at, failed_at, last_error \
             FROM dlq_jobs ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn replace_dlq(&self, jobs: &[Job]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM dlq_jobs").execute(&mut *tx).await?;

        for chunk in jobs.chunks(INSERT_CHUNK) {
            let mut query_builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO dlq_jobs (id, command, attempts, max_retries, priority, created_at, \
                 failed_at, last_error) ",
            );
            query_builder.push_values(chunk, |mut b, job| {
                b.push_bind(&job.id)
                    .push_bind(&job.command)
                    .push_bind(i64::from(job.attempts))
                    .push_bind(i64::from(job.max_retries))
                    .push_bind(i64::from(job.priority))
                    .push_bind(job.created_at)
                    .push_bind(job.updated_at)
                    .push_bind(&job.last_error);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(count = jobs.len(), "Saved dead letter queue");
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load_config(&self) -> StoreResult<ConfigMap> {
        Ok(self.fetch_config().await?)
    }

    async fn save_config(&self, config: &ConfigMap) -> StoreResult<()> {
        Ok(self.replace_config(config).await?)
    }

    async fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self.fetch_jobs().await?)
    }

    async fn save_jobs(&self, jobs: &[Job]) -> StoreResult<()> {
        Ok(self.replace_jobs(jobs).await?)
    }

    async fn load_dlq(&self) -> StoreResult<Vec<Job>> {
        Ok(self.fetch_dlq().await?)
    }

    async fn save_dlq(&self, jobs: &[Job]) -> StoreResult<()> {
        Ok(self.replace_dlq(jobs).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use queuectl_core::settings::MAX_RETRIES;

    async fn open_temp() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("queue.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_open_creates_database_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");
        let store = SqliteStore::open(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(store.path(), path);
        assert_eq!(store.load_config().await.unwrap(), default_config());
        assert!(store.load_jobs().await.unwrap().is_empty());
        assert!(store.load_dlq().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_round_trip() {
        let (store, _dir) = open_temp().await;

        let mut failed = Job::new("b", "false").with_priority(-3);
        failed.state = JobState::Failed;
        failed.attempts = 1;
        failed.run_at = Some(Utc::now() + Duration::seconds(30));
        failed.last_error = Some("exit=1\nboom".to_string());

        store
            .save_jobs(&[Job::new("a", "echo a"), failed.clone()])
            .await
            .unwrap();

        let loaded = store.load_jobs().await.unwrap();
        assert_eq!(loaded.len(), 2);
        let b = loaded.iter().find(|j| j.id == "b").unwrap();
        assert_eq!(b.state, JobState::Failed);
        assert_eq!(b.attempts, 1);
        assert_eq!(b.priority, -3);
        assert_eq!(b.run_at, failed.run_at);
        assert_eq!(b.last_error.as_deref(), Some("exit=1\nboom"));

        // A save replaces the whole collection.
        store.save_jobs(&[failed]).await.unwrap();
        assert_eq!(store.load_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dlq_allows_repeated_ids() {
        let (store, _dir) = open_temp().await;

        let dead = Job::new("x", "false");
        store.save_dlq(&[dead.clone(), dead]).await.unwrap();

        let dlq = store.load_dlq().await.unwrap();
        assert_eq!(dlq.len(), 2);
        assert!(dlq.iter().all(|j| j.state == JobState::Dead));
    }

    #[tokio::test]
    async fn test_config_values_are_typed_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            let mut config = store.load_config().await.unwrap();
            config.insert(MAX_RETRIES.to_string(), ConfigValue::Int(4));
            config.insert("mode".to_string(), ConfigValue::from("fast"));
            store.save_config(&config).await.unwrap();
        }

        // Reopening keeps stored values instead of re-seeding defaults.
        let store = SqliteStore::open(&path).await.unwrap();
        let loaded = store.load_config().await.unwrap();
        assert_eq!(loaded[MAX_RETRIES], ConfigValue::Int(4));
        assert_eq!(loaded["mode"], ConfigValue::from("fast"));
    }
}

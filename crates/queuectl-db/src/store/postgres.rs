//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_core::settings::default_config;
use queuectl_core::{ConfigMap, ConfigValue, Job, JobState, JobStore, StoreResult};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::{DbError, DbResult, create_pool, run_migrations};

/// Rows per multi-row INSERT; keeps well under the bind parameter limit.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i32,
    max_retries: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    run_at: Option<DateTime<Utc>>,
    priority: i32,
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
            attempts: non_negative(row.attempts, &row.id)?,
            max_retries: non_negative(row.max_retries, &row.id)?,
            id: row.id,
            command: row.command,
            state,
            created_at: row.created_at,
            updated_at: row.updated_at,
            run_at: row.run_at,
            priority: row.priority,
            last_error: row.last_error,
            worker_id: row.worker_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DlqRow {
    id: String,
    command: String,
    attempts: i32,
    max_retries: i32,
    priority: i32,
    created_at: DateTime<Utc>,
    failed_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl TryFrom<DlqRow> for Job {
    type Error = DbError;

    fn try_from(row: DlqRow) -> DbResult<Self> {
        Ok(Job {
            attempts: non_negative(row.attempts, &row.id)?,
            max_retries: non_negative(row.max_retries, &row.id)?,
            id: row.id,
            command: row.command,
            state: JobState::Dead,
            created_at: row.created_at,
            updated_at: row.failed_at,
            run_at: None,
            priority: row.priority,
            last_error: row.last_error,
            worker_id: None,
        })
    }
}

fn non_negative(value: i32, id: &str) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::Corrupt(format!("job {} has negative counter", id)))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Stores the three collections in PostgreSQL tables.
///
/// Saves run in a transaction that deletes and re-inserts the collection.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, apply migrations and seed the default configuration.
    pub async fn connect(database_url: &str, max_connections: u32) -> DbResult<Self> {
        let pool = create_pool(database_url, max_connections).await?;
        run_migrations(&pool).await?;
        let store = Self::new(pool);
        store.seed_defaults().await?;
        info!("PostgreSQL store ready");
        Ok(store)
    }

    async fn seed_defaults(&self) -> DbResult<()> {
        for (key, value) in default_config() {
            sqlx::query(
                "INSERT INTO config (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
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
            sqlx::query("INSERT INTO config (key, value) VALUES ($1, $2)")
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
            let mut query_builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, \
                 updated_at, run_at, priority, last_error, worker_id) ",
            );
            query_builder.push_values(chunk, |mut b, job| {
                b.push_bind(&job.id)
                    .push_bind(&job.command)
                    .push_bind(job.state.as_str())
                    .push_bind(to_i32(job.attempts))
                    .push_bind(to_i32(job.max_retries))
                    .push_bind(job.created_at)
                    .push_bind(job.updated_at)
                    .push_bind(job.run_at)
                    .push_bind(job.priority)
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
            let mut query_builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO dlq_jobs (id, command, attempts, max_retries, priority, created_at, \
                 failed_at, last_error) ",
            );
            query_builder.push_values(chunk, |mut b, job| {
                b.push_bind(&job.id)
                    .push_bind(&job.command)
                    .push_bind(to_i32(job.attempts))
                    .push_bind(to_i32(job.max_retries))
                    .push_bind(job.priority)
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
impl JobStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
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

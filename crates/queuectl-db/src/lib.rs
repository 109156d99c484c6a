//! Storage backends for queuectl.
//!
//! Provides [`JobStore`](queuectl_core::JobStore) implementations:
//! - JSON snapshot files (default)
//! - PostgreSQL
//! - SQLite
//! - In-memory (tests and throwaway queues)

pub mod error;
pub mod store;

pub use error::{DbError, DbResult};
pub use store::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the PostgreSQL migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations/postgres").run(pool).await?;
    Ok(())
}

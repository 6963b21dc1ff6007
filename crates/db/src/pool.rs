//! Connection pool and embedded migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::{DbError, PgStore};

pub type DbPool = PgPool;

/// How long a caller waits for a free connection before the pool errors.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a pool of at most `max_connections` connections to `database_url`.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    debug!(max_connections, "connecting to postgres");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the migrations embedded from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("../../migrations");
    info!(available = migrator.iter().count(), "applying workflow engine migrations");
    migrator.run(pool).await?;
    Ok(())
}

/// Connect, migrate, and wrap the pool in a [`PgStore`].
pub async fn connect_store(database_url: &str, max_connections: u32) -> Result<PgStore, DbError> {
    let pool = create_pool(database_url, max_connections).await?;
    run_migrations(&pool).await?;
    Ok(PgStore::new(pool))
}

pub mod models;
pub mod store;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Fetch tasks each hold a connection while they read and write, so the
/// pool is sized a little above the admission ceiling.
pub async fn create_pool(database_url: &str, max_in_flight: usize) -> Result<PgPool> {
    let max_connections = u32::try_from(max_in_flight).unwrap_or(u32::MAX).saturating_add(4);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to apply database migrations")?;
    Ok(())
}

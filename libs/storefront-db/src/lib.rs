pub mod db;
pub mod models;
pub mod repositories;

pub use sqlx;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

/// Opens a pool and applies pending migrations.
pub async fn connect(url: &str, max_connections: u32) -> Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run DB migrations")?;
    tracing::info!("Ledger database ready ({} connections max)", max_connections);

    Ok(pool)
}

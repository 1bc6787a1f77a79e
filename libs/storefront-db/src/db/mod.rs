use anyhow::{Context, Result};
use sqlx::PgPool;

/// Validates the URL scheme before handing it to [`crate::connect`].
pub async fn init_db(database_url: &str, max_connections: u32) -> Result<PgPool> {
    if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
        return Err(anyhow::anyhow!(
            "DATABASE_URL must start with postgres:// or postgresql://"
        ));
    }

    crate::connect(database_url, max_connections)
        .await
        .context("Failed to initialise ledger database")
}

/// True when the error chain carries a Postgres unique-constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .and_then(|db| db.code())
            .is_some_and(|code| code == "23505")
    })
}

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{error, info};

/// Run the ByteStore schema migrations against the given pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("running database migrations...");
    sqlx::migrate!("../migrations").run(pool).await.map_err(|e| {
        error!("failed to run migrations: {e}");
        anyhow::anyhow!("migration failed: {e}")
    })?;
    info!("migrations completed");
    Ok(())
}

//! ByteStore database pool initialization.
//!
//! The spec's own wording ("Read the SQLite/ByteStore row", §4.8) names
//! SQLite as the reference backing store; `sqlx`'s SQLite driver keeps the
//! same connection-pool shape the teacher repository uses for Postgres.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

use crate::Config;

/// Initialize the ByteStore connection pool.
///
/// Note: migrations are run separately by the binary crate.
pub async fn init_database(config: &Config) -> Result<SqlitePool> {
    let database_url = config.database_url();
    info!(url = %mask_database_url(database_url), "connecting to ByteStore database");

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect_with(options)
        .await
        .map_err(|e| {
            error!("failed to connect to ByteStore database: {e}");
            anyhow::anyhow!("database connection failed: {e}")
        })?;

    info!("ByteStore database connected");
    Ok(pool)
}

/// Mask credentials in a database URL for safe logging.
fn mask_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if !parsed.username().is_empty() {
                let _ = parsed.set_username("***");
            }
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

//! SQLite helpers: create the connection pool and run the sqlx migrations
//!
//! The crate root holds a `migrations/` directory; `sqlx::migrate!()` embeds it
//! at compile time and applies whatever has not run yet.

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

use crate::im::config::ChatConfig;
use crate::im::error::{DbResultExt, Result};

/// Create a SQLite pool and apply all pending migrations
pub async fn create_sqlite_pool_with_migration(
    db_url: &str,
    max_connections: u32,
) -> Result<Pool<Sqlite>> {
    info!("[DB] connecting to {}", db_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .context("connecting to sqlite")?;

    sqlx::migrate!().run(&pool).await?;
    info!("[DB] migrations applied");

    Ok(pool)
}

/// Single-connection in-memory database.
///
/// Every connection to `sqlite::memory:` opens its own database, so the pool
/// keeps exactly one connection alive for its whole lifetime.
pub async fn create_memory_pool() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("opening in-memory sqlite")?;

    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

/// Open the pool described by `config`
pub async fn open(config: &ChatConfig) -> Result<Pool<Sqlite>> {
    if config.is_in_memory() {
        create_memory_pool().await
    } else {
        create_sqlite_pool_with_migration(&config.db_url, config.max_connections).await
    }
}

/// Milliseconds since the Unix epoch, the unit of every `*_at` column.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

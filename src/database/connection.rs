/*
 * Database connection pool management with optimized settings and health monitoring.
 * I'm implementing robust PostgreSQL connection handling so one shared pool serves every request handler.
 */

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::utils::error::Result;

/// Type alias for our PostgreSQL connection pool
/// I'm providing a convenient type alias used throughout the application
pub type DatabasePool = PgPool;

/// Create the shared connection pool from configuration
/// I'm keeping acquisition bounded so a saturated database degrades into errors instead of hangs
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DatabasePool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await?;

    info!(
        "Database connection pool initialized (max_connections: {})",
        max_connections
    );

    Ok(pool)
}

/// Perform a lightweight connectivity check against the pool
pub async fn health_check(pool: &DatabasePool) -> Result<u64> {
    let start = std::time::Instant::now();
    sqlx::query("SELECT 1 as health_check")
        .fetch_one(pool)
        .await?;
    Ok(start.elapsed().as_millis() as u64)
}

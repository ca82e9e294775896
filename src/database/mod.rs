/*
 * Database module aggregator providing centralized access to the metadata store for the verse-canvas backend.
 * I'm organizing connection management and the MetaStore port into a clean interface so the rest of the application never touches SQL directly.
 */

pub mod connection;
pub mod memory;
pub mod meta_store;

// Re-export commonly used database types and functions
pub use connection::{create_pool, DatabasePool};
pub use memory::MemoryMetaStore;
pub use meta_store::{MetaStore, PgMetaStore, SharedMetaStore};

use crate::utils::error::{AppError, Result};

/// Database migration utilities for deployment automation
/// I'm providing migration management that ensures reliable deployments
pub struct MigrationManager;

impl MigrationManager {
    /// Run all pending migrations
    pub async fn run_migrations(pool: &DatabasePool) -> Result<()> {
        tracing::info!("Running database migrations");

        match sqlx::migrate!("src/database/migrations").run(pool).await {
            Ok(_) => {
                tracing::info!("Database migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Database migration failed: {}", e);
                Err(AppError::DatabaseQueryFailed(format!(
                    "migration failed: {}",
                    e
                )))
            }
        }
    }
}

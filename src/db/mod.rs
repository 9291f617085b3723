use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::models::StorageConfig;

pub mod storages;

/// Source of persisted storage configurations.
///
/// The storage manager only ever reads through this seam; writers are
/// responsible for calling `StorageManager::invalidate_cache` afterwards.
#[async_trait]
pub trait StorageConfigRepository: Send + Sync {
    /// All configurations, highest priority first
    async fn list_storage_configs(&self) -> Result<Vec<StorageConfig>>;
}

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::new_with_pool_config(database_url, 5).await
    }

    pub async fn new_with_pool_config(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| anyhow::anyhow!("Invalid database url '{}': {}", database_url, e))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

        Ok(Self { pool })
    }

    /// In-memory database; a single connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let db = Self::new_with_pool_config("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database migration failed: {}", e))?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl StorageConfigRepository for Database {
    async fn list_storage_configs(&self) -> Result<Vec<StorageConfig>> {
        self.get_storage_configs().await
    }
}

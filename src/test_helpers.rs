/*!
 * Test Helpers and Utilities
 *
 * This module provides utilities for creating test configurations, databases
 * and application state with sensible defaults. Tests can modify the returned
 * objects as needed.
 */

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::{
    config::Config,
    db::Database,
    models::{CreateStorageConfig, StorageConfig},
    routes::create_router,
    services::transcode::AudioEncoder,
    AppState,
};

/// Creates a test configuration with sensible defaults
/// All fields are populated to avoid compilation errors when new fields are added
pub fn create_test_config(cache_dir: &Path) -> Config {
    Config {
        server_address: "127.0.0.1:0".to_string(),
        database_url: "sqlite::memory:".to_string(),
        transcode_cache_dir: cache_dir.to_path_buf(),
        ffmpeg_path: "ffmpeg".to_string(),
        transcode_extensions: vec!["flac".to_string(), "wav".to_string()],
        min_bitrate: 32,
        max_bitrate: 512,
        transcode_timeout_seconds: Some(30),
        media_cache_max_age_seconds: 3600,
        webdav_timeout_seconds: 5,
        work_id_pattern: crate::config::DEFAULT_WORK_ID_PATTERN.to_string(),
    }
}

/// Creates a migrated in-memory test Database instance
pub async fn create_test_database() -> Database {
    Database::in_memory()
        .await
        .expect("Failed to create in-memory test database")
}

/// Encoder stand-in that counts invocations and writes a small marker file.
///
/// A gated encoder blocks every job until [`FakeEncoder::release`] is called.
pub struct FakeEncoder {
    calls: AtomicUsize,
    failing: AtomicBool,
    gate: Semaphore,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Semaphore::new(0),
            ..Self::new()
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1024);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioEncoder for FakeEncoder {
    async fn encode(&self, bitrate: u32, source: &Path, destination: &Path) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await?;

        if self.failing.load(Ordering::SeqCst) {
            tokio::fs::write(destination, b"partial").await?;
            anyhow::bail!("fake encoder failure for {}", source.display());
        }

        let name = source.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        tokio::fs::write(destination, format!("transcoded:{}:{}", bitrate, name)).await?;
        Ok(())
    }
}

/// Application wired against an in-memory database, a fake encoder and a
/// temporary transcode cache. Dropping the context removes the cache.
pub struct TestContext {
    pub state: Arc<AppState>,
    pub encoder: Arc<FakeEncoder>,
    pub app: Router,
    pub cache_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_encoder(FakeEncoder::new()).await
    }

    pub async fn with_encoder(encoder: FakeEncoder) -> Self {
        let cache_dir = TempDir::new().expect("Failed to create cache dir");
        let config = create_test_config(cache_dir.path());
        let encoder = Arc::new(encoder);
        let db = create_test_database().await;

        let state = Arc::new(
            AppState::new(config, db, encoder.clone()).expect("Failed to build test AppState"),
        );
        let app = create_router(state.clone());

        Self {
            state,
            encoder,
            app,
            cache_dir,
        }
    }

    /// Persist a local storage rooted at `root` and drop the adapter cache
    pub async fn add_local_storage(&self, name: &str, root: &Path, priority: i64) -> StorageConfig {
        self.add_storage(
            name,
            "local",
            serde_json::json!({ "path": root.to_string_lossy() }),
            priority,
        )
        .await
    }

    pub async fn add_storage(
        &self,
        name: &str,
        storage_type: &str,
        config: serde_json::Value,
        priority: i64,
    ) -> StorageConfig {
        let created = self
            .state
            .db
            .create_storage_config(&CreateStorageConfig {
                name: name.to_string(),
                storage_type: storage_type.to_string(),
                config,
                priority,
                description: None,
            })
            .await
            .expect("Failed to create test storage");
        self.state.storage.invalidate_cache();
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_config() {
        let config = create_test_config(Path::new("/tmp/cache"));
        assert!(config.validate().is_ok());
        assert!(config.is_transcodable_extension("flac"));
    }

    #[tokio::test]
    async fn test_create_test_database() {
        let db = create_test_database().await;
        assert!(db.get_storage_configs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_registers_storage() {
        let ctx = TestContext::new().await;
        let root = TempDir::new().unwrap();
        ctx.add_local_storage("music", root.path(), 1).await;

        let adapters = ctx.state.storage.get_adapters().await.unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), "music");
    }
}

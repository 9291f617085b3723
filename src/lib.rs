pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;


use std::sync::Arc;

use anyhow::Result;

use config::Config;
use db::Database;
use services::transcode::{AudioEncoder, TranscodeCoordinator};
use storage::factory::AdapterOptions;
use storage::manager::StorageManager;

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub storage: Arc<StorageManager>,
    pub transcoder: Arc<TranscodeCoordinator>,
}

impl AppState {
    /// Wire the storage manager and transcode coordinator around `db`
    pub fn new(config: Config, db: Database, encoder: Arc<dyn AudioEncoder>) -> Result<Self> {
        let storage = StorageManager::new(
            Arc::new(db.clone()),
            AdapterOptions {
                webdav_timeout: config.webdav_timeout(),
            },
            config.work_id_regex()?,
        );
        let transcoder = TranscodeCoordinator::new(config.transcode_cache_dir.clone(), encoder);

        Ok(Self {
            config,
            db,
            storage: Arc::new(storage),
            transcoder: Arc::new(transcoder),
        })
    }
}

//! Ordered set of storage adapters built from the persisted configurations

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::factory::{create_storage_adapter, AdapterOptions};
use super::{AdapterFile, StorageAdapter, StorageError, StorageResult};
use crate::db::StorageConfigRepository;

pub type AdapterList = Arc<Vec<Arc<dyn StorageAdapter>>>;

/// Resolves which backend holds a path and aggregates listings across backends.
///
/// The adapter list is built lazily and memoized until [`invalidate_cache`]
/// is called. Concurrent rebuilds are idempotent, the last one to finish wins.
///
/// [`invalidate_cache`]: StorageManager::invalidate_cache
pub struct StorageManager {
    repository: Arc<dyn StorageConfigRepository>,
    options: AdapterOptions,
    work_id_pattern: Regex,
    adapters: RwLock<Option<AdapterList>>,
}

impl StorageManager {
    pub fn new(repository: Arc<dyn StorageConfigRepository>, options: AdapterOptions, work_id_pattern: Regex) -> Self {
        Self {
            repository,
            options,
            work_id_pattern,
            adapters: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<AdapterList> {
        self.adapters.read().ok().and_then(|guard| guard.clone())
    }

    /// Current adapters, highest priority first
    pub async fn get_adapters(&self) -> StorageResult<AdapterList> {
        if let Some(adapters) = self.cached() {
            return Ok(adapters);
        }

        let mut configs = self
            .repository
            .list_storage_configs()
            .await
            .map_err(|e| StorageError::InvalidConfig(format!("failed to load storage configurations: {}", e)))?;
        configs.sort_by(|a, b| b.priority.cmp(&a.priority));

        let adapters = configs
            .iter()
            .map(|config| create_storage_adapter(config, &self.options))
            .collect::<StorageResult<Vec<_>>>()?;

        info!(
            "Built {} storage adapter(s): [{}]",
            adapters.len(),
            adapters
                .iter()
                .map(|a| format!("{} ({})", a.name(), a.storage_type()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let adapters: AdapterList = Arc::new(adapters);
        if let Ok(mut guard) = self.adapters.write() {
            *guard = Some(Arc::clone(&adapters));
        }
        Ok(adapters)
    }

    /// First adapter, in priority order, that holds `path`.
    ///
    /// Adapters are probed one at a time. An unhealthy adapter ends the
    /// search with `BackendUnhealthy` even if a lower priority adapter would
    /// have the file.
    pub async fn find(&self, path: &str) -> StorageResult<Arc<dyn StorageAdapter>> {
        for adapter in self.get_adapters().await?.iter() {
            if !adapter.test().await {
                warn!("Storage '{}' failed its health check while looking up '{}'", adapter.name(), path);
                return Err(StorageError::BackendUnhealthy {
                    adapter: adapter.name().to_string(),
                });
            }

            if adapter.exists(path).await? {
                debug!("Found '{}' on storage '{}'", path, adapter.name());
                return Ok(Arc::clone(adapter));
            }
        }

        Err(StorageError::NotFound(path.to_string()))
    }

    /// Adapter holding `path` together with its file handle
    pub async fn file(&self, path: &str) -> StorageResult<(Arc<dyn StorageAdapter>, AdapterFile)> {
        let adapter = self.find(path).await?;
        let file = adapter.file(path).await?;
        Ok((adapter, file))
    }

    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.find(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Work directories present on any backend. Every adapter must be healthy.
    pub async fn list(&self) -> StorageResult<BTreeSet<String>> {
        let mut works = BTreeSet::new();

        for adapter in self.get_adapters().await?.iter() {
            if !adapter.test().await {
                return Err(StorageError::BackendUnhealthy {
                    adapter: adapter.name().to_string(),
                });
            }

            let entries = adapter.readdir(None).await?;
            works.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.is_directory() && self.work_id_pattern.is_match(&entry.name))
                    .map(|entry| entry.name),
            );
        }

        Ok(works)
    }

    /// Drop the memoized adapters; the next lookup rebuilds them from storage
    pub fn invalidate_cache(&self) {
        if let Ok(mut guard) = self.adapters.write() {
            *guard = None;
        }
        info!("Storage adapter cache invalidated");
    }
}

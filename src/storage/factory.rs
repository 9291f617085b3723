//! Factory for creating storage adapters from persisted configuration

use std::sync::Arc;
use std::time::Duration;

use super::local::LocalStorageAdapter;
use super::webdav::WebDAVStorageAdapter;
use super::{StorageAdapter, StorageError, StorageResult};
use crate::models::{LocalConfig, StorageConfig, StorageType, WebDAVConfig};

/// Settings shared by every adapter the factory builds
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub webdav_timeout: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            webdav_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the adapter for one persisted configuration.
///
/// An unknown `type` or a `config` that does not match it is an
/// `InvalidConfig` error naming the configuration id.
pub fn create_storage_adapter(config: &StorageConfig, options: &AdapterOptions) -> StorageResult<Arc<dyn StorageAdapter>> {
    let storage_type = StorageType::try_from(config.storage_type.as_str())
        .map_err(|e| StorageError::InvalidConfig(format!("storage {}: {}", config.id, e)))?;

    match storage_type {
        StorageType::Local => {
            let local: LocalConfig = parse_config(config.id, &config.config)?;
            Ok(Arc::new(LocalStorageAdapter::new(config.id, &config.name, &local)))
        }
        StorageType::WebDAV => {
            let webdav: WebDAVConfig = parse_config(config.id, &config.config)?;
            let adapter = WebDAVStorageAdapter::new(config.id, &config.name, &webdav, options.webdav_timeout)
                .map_err(|e| StorageError::InvalidConfig(format!("storage {}: {}", config.id, e)))?;
            Ok(Arc::new(adapter))
        }
    }
}

/// Check that `config` parses for `storage_type` without contacting the backend
pub fn validate_storage_config(storage_type: &str, config: &serde_json::Value) -> StorageResult<()> {
    match StorageType::try_from(storage_type).map_err(StorageError::InvalidConfig)? {
        StorageType::Local => parse_config::<LocalConfig>(0, config).map(|_| ()),
        StorageType::WebDAV => {
            let webdav: WebDAVConfig = parse_config(0, config)?;
            url::Url::parse(&webdav.url)
                .map_err(|e| StorageError::InvalidConfig(format!("invalid WebDAV url '{}': {}", webdav.url, e)))?;
            Ok(())
        }
    }
}

/// Run the static health probe of the matching adapter type on an unsaved configuration
pub async fn test_storage_config(
    storage_type: &str,
    config: &serde_json::Value,
    options: &AdapterOptions,
) -> StorageResult<bool> {
    let storage_type = StorageType::try_from(storage_type).map_err(StorageError::InvalidConfig)?;

    match storage_type {
        StorageType::Local => {
            let local: LocalConfig = parse_config(0, config)?;
            Ok(LocalStorageAdapter::test_config(&local).await)
        }
        StorageType::WebDAV => {
            let webdav: WebDAVConfig = parse_config(0, config)?;
            Ok(WebDAVStorageAdapter::test_config(&webdav, options.webdav_timeout).await)
        }
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(id: i64, value: &serde_json::Value) -> StorageResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| StorageError::InvalidConfig(format!("storage {}: {}", id, e)))
}

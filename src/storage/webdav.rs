//! WebDAV storage adapter

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{guess_mime, AdapterFile, ByteSource, ByteStream, FileStat, StorageAdapter, StorageError, StorageResult};
use crate::models::{StorageType, WebDAVConfig};
use crate::services::webdav::{AuthType, DirectoryOptions, WebDAVAuth, WebDAVClient, WebDAVClientOptions};
use crate::utils::security::{resolve_secure_path, PathStyle};

pub struct WebDAVStorageAdapter {
    id: i64,
    name: String,
    /// Library root on the server, relative to the configured url
    base_path: String,
    client: Arc<WebDAVClient>,
}

impl WebDAVStorageAdapter {
    pub fn new(id: i64, name: impl Into<String>, config: &WebDAVConfig, timeout: Duration) -> StorageResult<Self> {
        let client = build_client(config, timeout)?;
        Ok(Self {
            id,
            name: name.into(),
            base_path: base_path_of(config),
            client: Arc::new(client),
        })
    }

    /// Validate a proposed configuration before it is persisted
    pub async fn test_config(config: &WebDAVConfig, timeout: Duration) -> bool {
        match build_client(config, timeout) {
            Ok(client) => probe(&client, &base_path_of(config)).await,
            Err(e) => {
                warn!("WebDAV configuration for {} is invalid: {}", config.url, e);
                false
            }
        }
    }

    fn resolve(&self, path: &str) -> StorageResult<String> {
        resolve_secure_path(&self.base_path, path, PathStyle::Posix)
    }
}

fn build_client(config: &WebDAVConfig, timeout: Duration) -> StorageResult<WebDAVClient> {
    WebDAVClient::new(
        &config.url,
        WebDAVClientOptions {
            auth: WebDAVAuth {
                auth_type: AuthType::Auto,
                username: config.username.clone(),
                password: config.password.clone(),
                token: None,
            },
            timeout,
        },
    )
}

fn base_path_of(config: &WebDAVConfig) -> String {
    format!("/{}", config.path.trim_matches('/'))
}

async fn probe(client: &WebDAVClient, root: &str) -> bool {
    match client.exists(root).await {
        Ok(true) => true,
        Ok(false) => {
            warn!("WebDAV root '{}' does not exist", root);
            false
        }
        Err(e) => {
            warn!("WebDAV health check for '{}' failed: {}", root, e);
            false
        }
    }
}

#[async_trait]
impl StorageAdapter for WebDAVStorageAdapter {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> StorageType {
        StorageType::WebDAV
    }

    async fn test(&self) -> bool {
        probe(&self.client, &self.base_path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let resolved = self.resolve(path)?;
        self.client.exists(&resolved).await
    }

    async fn readdir(&self, path: Option<&str>) -> StorageResult<Vec<FileStat>> {
        let resolved = self.resolve(path.unwrap_or(""))?;
        let entries = self
            .client
            .get_directory_contents(&resolved, DirectoryOptions::default())
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| FileStat {
                name: entry.basename,
                file_type: entry.entry_type,
            })
            .collect())
    }

    async fn file(&self, path: &str) -> StorageResult<AdapterFile> {
        let resolved = self.resolve(path)?;
        let entry = self.client.stat(&resolved).await.map_err(|e| {
            if e.status() == Some(404) {
                StorageError::NotFound(path.to_string())
            } else {
                e
            }
        })?;

        if entry.entry_type == super::FileStatType::Directory {
            return Err(StorageError::NotFound(format!("{} is a directory", path)));
        }

        info!("Opened WebDAV file '{}' ({} bytes) on '{}'", resolved, entry.size, self.name);

        let last_modified: DateTime<Utc> = entry.last_modified_at().unwrap_or_default();
        let mime_type = entry.mime.clone().unwrap_or_else(|| guess_mime(&entry.basename));

        Ok(AdapterFile::new(
            entry.basename,
            resolved.clone(),
            entry.size,
            mime_type,
            last_modified,
            Arc::new(WebDAVByteSource {
                client: Arc::clone(&self.client),
                path: resolved,
            }),
        ))
    }
}

/// Lazily issues the range GET once the body is actually needed
struct WebDAVByteSource {
    client: Arc<WebDAVClient>,
    path: String,
}

#[async_trait]
impl ByteSource for WebDAVByteSource {
    async fn open(&self, start: Option<u64>, end: Option<u64>) -> StorageResult<ByteStream> {
        // An end without a start still needs a Range header
        let start = match (start, end) {
            (None, Some(_)) => Some(0),
            (start, _) => start,
        };
        self.client.create_readable_stream(&self.path, start, end).await
    }
}

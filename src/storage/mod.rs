//! Storage backend abstraction for the media library
//!
//! Every configured backend (local filesystem, WebDAV, ...) is wrapped in a
//! [`StorageAdapter`] exposing the same small capability set. The
//! [`manager::StorageManager`] owns the ordered adapter list and answers
//! "which backend has this path".

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod factory;
pub mod local;
pub mod manager;
pub mod webdav;

pub use error::{StorageError, StorageResult};

use crate::models::StorageType;

/// Byte stream handed to the HTTP layer as a response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Core trait every storage backend implements
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Identifier of the persisted configuration this adapter was built from
    fn id(&self) -> i64;

    fn name(&self) -> &str;

    fn storage_type(&self) -> StorageType;

    /// Connectivity / health probe. Never errors, an unreachable backend is `false`.
    async fn test(&self) -> bool;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// List a directory; `None` lists the storage root
    async fn readdir(&self, path: Option<&str>) -> StorageResult<Vec<FileStat>>;

    async fn file(&self, path: &str) -> StorageResult<AdapterFile>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatType {
    File,
    Directory,
}

/// A backend agnostic directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileStatType,
}

impl FileStat {
    pub fn is_directory(&self) -> bool {
        self.file_type == FileStatType::Directory
    }
}

/// Opens byte windows of a single file; implemented per backend
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Open the inclusive `[start, end]` window. `None` bounds mean the start
    /// or end of the file respectively.
    async fn open(&self, start: Option<u64>, end: Option<u64>) -> StorageResult<ByteStream>;
}

/// File handle returned by [`StorageAdapter::file`]
#[derive(Clone)]
pub struct AdapterFile {
    pub size: u64,
    pub mime_type: String,
    pub name: String,
    pub absolute_path: String,
    pub last_modified: DateTime<Utc>,
    source: Arc<dyn ByteSource>,
}

impl AdapterFile {
    pub fn new(
        name: String,
        absolute_path: String,
        size: u64,
        mime_type: String,
        last_modified: DateTime<Utc>,
        source: Arc<dyn ByteSource>,
    ) -> Self {
        Self {
            size,
            mime_type,
            name,
            absolute_path,
            last_modified,
            source,
        }
    }

    /// Stream the inclusive byte window `[begin, end]`, or the whole file
    pub async fn stream(&self, begin: Option<u64>, end: Option<u64>) -> StorageResult<ByteStream> {
        self.source.open(begin, end).await
    }

    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

impl fmt::Debug for AdapterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterFile")
            .field("name", &self.name)
            .field("absolute_path", &self.absolute_path)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

pub(crate) fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

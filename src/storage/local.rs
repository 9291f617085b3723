//! Local filesystem storage adapter

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{guess_mime, AdapterFile, ByteSource, ByteStream, FileStat, FileStatType, StorageAdapter, StorageError, StorageResult};
use crate::models::{LocalConfig, StorageType};
use crate::utils::security::{resolve_secure_path, PathStyle};

/// Local filesystem storage adapter rooted at a single directory
pub struct LocalStorageAdapter {
    id: i64,
    name: String,
    base_path: String,
}

impl LocalStorageAdapter {
    pub fn new(id: i64, name: impl Into<String>, config: &LocalConfig) -> Self {
        Self {
            id,
            name: name.into(),
            base_path: config.path.clone(),
        }
    }

    /// Validate a proposed configuration before it is persisted
    pub async fn test_config(config: &LocalConfig) -> bool {
        check_directory_access(Path::new(&config.path)).await
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        resolve_secure_path(&self.base_path, path, PathStyle::Native).map(PathBuf::from)
    }
}

/// Readable and writable directory check, the local equivalent of a ping
async fn check_directory_access(path: &Path) -> bool {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Local storage root {} is not accessible: {}", path.display(), e);
            return false;
        }
    };

    if !metadata.is_dir() {
        warn!("Local storage root {} is not a directory", path.display());
        return false;
    }

    // Mode bits say nothing about the effective uid, so actually create a file
    let root = path.to_path_buf();
    let writable = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".media-vault-write-check-")
            .tempfile_in(&root)
            .map(drop)
    })
    .await;
    match writable {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Local storage root {} is not writable: {}", path.display(), e);
            return false;
        }
        Err(e) => {
            warn!("Write check on {} did not complete: {}", path.display(), e);
            return false;
        }
    }

    if let Err(e) = fs::read_dir(path).await {
        warn!("Local storage root {} cannot be listed: {}", path.display(), e);
        return false;
    }

    true
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }

    async fn test(&self) -> bool {
        check_directory_access(Path::new(&self.base_path)).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let resolved = self.resolve(path)?;
        Ok(fs::try_exists(&resolved).await?)
    }

    async fn readdir(&self, path: Option<&str>) -> StorageResult<Vec<FileStat>> {
        let directory = self.resolve(path.unwrap_or(""))?;
        let mut entries = fs::read_dir(&directory).await?;
        let mut stats = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            // Follow symlinks so a linked work directory lists as a directory
            let file_type = match fs::metadata(entry.path()).await {
                Ok(metadata) if metadata.is_dir() => FileStatType::Directory,
                Ok(_) => FileStatType::File,
                Err(e) => {
                    debug!("Skipping unreadable entry {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            stats.push(FileStat {
                name: entry.file_name().to_string_lossy().to_string(),
                file_type,
            });
        }

        Ok(stats)
    }

    async fn file(&self, path: &str) -> StorageResult<AdapterFile> {
        let resolved = self.resolve(path)?;
        open_local_file(&resolved).await
    }
}

/// Build an [`AdapterFile`] for a path on the local filesystem.
///
/// Also used to serve transcoded artifacts out of the cache directory.
pub async fn open_local_file(path: &Path) -> StorageResult<AdapterFile> {
    let metadata = fs::metadata(path).await?;
    if metadata.is_dir() {
        return Err(StorageError::NotFound(format!("{} is a directory", path.display())));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let last_modified: DateTime<Utc> = metadata.modified()?.into();

    Ok(AdapterFile::new(
        name.clone(),
        path.to_string_lossy().to_string(),
        metadata.len(),
        guess_mime(&name),
        last_modified,
        Arc::new(LocalByteSource {
            path: path.to_path_buf(),
        }),
    ))
}

struct LocalByteSource {
    path: PathBuf,
}

#[async_trait]
impl ByteSource for LocalByteSource {
    async fn open(&self, start: Option<u64>, end: Option<u64>) -> StorageResult<ByteStream> {
        let mut file = fs::File::open(&self.path).await?;
        let start = start.unwrap_or(0);
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        match end {
            Some(end) => {
                let length = end.saturating_sub(start) + 1;
                debug!("Streaming {} bytes {}-{}", self.path.display(), start, end);
                Ok(Box::pin(ReaderStream::new(file.take(length))))
            }
            None => Ok(Box::pin(ReaderStream::new(file))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    fn adapter_for(dir: &TempDir) -> LocalStorageAdapter {
        let config = LocalConfig {
            path: dir.path().to_string_lossy().to_string(),
        };
        LocalStorageAdapter::new(1, "local", &config)
    }

    #[tokio::test]
    async fn test_file_streams_requested_window() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..=255u8).collect();
        std::fs::write(dir.path().join("track.flac"), &data).unwrap();

        let adapter = adapter_for(&dir);
        let file = adapter.file("/track.flac").await.unwrap();
        assert_eq!(file.size, 256);
        assert_eq!(file.name, "track.flac");
        assert!(file.mime_type.starts_with("audio/"));

        let window = collect(file.stream(Some(10), Some(19)).await.unwrap()).await;
        assert_eq!(window, data[10..=19].to_vec());

        let whole = collect(file.stream(None, None).await.unwrap()).await;
        assert_eq!(whole, data);
    }

    #[tokio::test]
    async fn test_readdir_classifies_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("RJ123456")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let adapter = adapter_for(&dir);
        let mut entries = adapter.readdir(None).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "RJ123456");
        assert!(entries[0].is_directory());
        assert_eq!(entries[1].file_type, FileStatType::File);
    }

    #[tokio::test]
    async fn test_traversal_is_denied() {
        let dir = TempDir::new().unwrap();
        let adapter = adapter_for(&dir);

        assert!(matches!(
            adapter.exists("../../etc/passwd").await,
            Err(StorageError::AccessDenied(_))
        ));
        assert!(matches!(
            adapter.file("../outside.mp3").await,
            Err(StorageError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_health_probe() {
        let dir = TempDir::new().unwrap();
        assert!(adapter_for(&dir).test().await);

        let missing = LocalConfig {
            path: dir.path().join("missing").to_string_lossy().to_string(),
        };
        assert!(!LocalStorageAdapter::test_config(&missing).await);

        let not_a_dir = dir.path().join("file.txt");
        std::fs::write(&not_a_dir, b"x").unwrap();
        let file_root = LocalConfig {
            path: not_a_dir.to_string_lossy().to_string(),
        };
        assert!(!LocalStorageAdapter::test_config(&file_root).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_health_follows_effective_write_access() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores the mode bits, everyone else is refused
        let marker = dir.path().join("marker");
        let process_can_write = std::fs::write(&marker, b"x").is_ok();
        let _ = std::fs::remove_file(&marker);

        let healthy = adapter_for(&dir).test().await;
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(healthy, process_can_write);
        assert_eq!(leftovers, 0);
    }
}

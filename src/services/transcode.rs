//! On-demand audio transcoding backed by a disk cache
//!
//! Each `(source path, source mtime, bitrate)` triple names exactly one
//! artifact `<key>.m4a` in the cache directory. The encoder writes to
//! `<key>.m4a.tmp` and the file is renamed into place on success, so a
//! present cache file is always complete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// External audio encoder: `(bitrate, source, destination)`
#[async_trait]
pub trait AudioEncoder: Send + Sync {
    async fn encode(&self, bitrate: u32, source: &Path, destination: &Path) -> Result<()>;
}

/// Encodes to AAC in an MP4 container with an ffmpeg subprocess
pub struct FfmpegEncoder {
    program: String,
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AudioEncoder for FfmpegEncoder {
    async fn encode(&self, bitrate: u32, source: &Path, destination: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(["-vn", "-map_metadata", "-1", "-c:a", "aac", "-b:a"])
            .arg(format!("{}k", bitrate))
            .args(["-f", "mp4"])
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the encoder
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to start encoder '{}': {}", self.program, e))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow::anyhow!("Encoder timed out after {}s", limit.as_secs()))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(anyhow::anyhow!(
                "Encoder exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ));
        }

        Ok(())
    }
}

/// Outcome of asking for a transcoded artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeStatus {
    /// A job for this key is already running
    InProgress,
    /// No artifact existed; a job was started by this call
    Started,
    /// The previous job failed. The error is handed out once and then forgotten.
    Failed(String),
    /// Artifact is ready to serve
    Ready(PathBuf),
}

struct TranscodeTask {
    started_at: Instant,
    done: watch::Receiver<bool>,
}

#[derive(Default)]
struct TranscodeState {
    tasks: HashMap<String, TranscodeTask>,
    errors: HashMap<String, String>,
}

/// Deduplicates transcode jobs per cache key and remembers the last failure
pub struct TranscodeCoordinator {
    cache_dir: PathBuf,
    encoder: Arc<dyn AudioEncoder>,
    state: Arc<Mutex<TranscodeState>>,
}

/// Deterministic cache key of a source revision at a bitrate
pub fn cache_key(source: &str, last_modified: DateTime<Utc>, bitrate: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\0");
    hasher.update(last_modified.timestamp_millis().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(bitrate.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn lock(state: &Mutex<TranscodeState>) -> MutexGuard<'_, TranscodeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TranscodeCoordinator {
    pub fn new(cache_dir: impl Into<PathBuf>, encoder: Arc<dyn AudioEncoder>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            encoder,
            state: Arc::new(Mutex::new(TranscodeState::default())),
        }
    }

    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.m4a", key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.m4a.tmp", key))
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.state).tasks.len()
    }

    /// Look up the artifact for `source`, starting a job if there is none.
    ///
    /// Never waits for the encoder; callers poll until `Ready` or `Failed`.
    pub async fn request(&self, source: &Path, last_modified: DateTime<Utc>, bitrate: u32) -> TranscodeStatus {
        let key = cache_key(&source.to_string_lossy(), last_modified, bitrate);

        {
            let mut state = lock(&self.state);
            if state.tasks.contains_key(&key) {
                return TranscodeStatus::InProgress;
            }
            if let Some(error) = state.errors.remove(&key) {
                return TranscodeStatus::Failed(error);
            }
        }

        let final_path = self.cache_path(&key);
        if fs::try_exists(&final_path).await.unwrap_or(false) {
            touch(&final_path).await;
            return TranscodeStatus::Ready(final_path);
        }

        let done = match self.claim(&key) {
            Ok(done) => done,
            Err(status) => return status,
        };

        info!("Starting transcode of {} at {}kbps ({})", source.display(), bitrate, key);

        let job = TranscodeJob {
            encoder: Arc::clone(&self.encoder),
            state: Arc::clone(&self.state),
            cache_dir: self.cache_dir.clone(),
            source: source.to_path_buf(),
            temp_path: self.temp_path(&key),
            final_path,
            key,
            bitrate,
        };
        tokio::spawn(job.run(done));

        TranscodeStatus::Started
    }

    /// Register a job for `key` unless one is running or a failure is still unreported.
    ///
    /// Check and insert happen under one lock so two requests never both start a job.
    fn claim(&self, key: &str) -> Result<watch::Sender<bool>, TranscodeStatus> {
        let mut state = lock(&self.state);
        if state.tasks.contains_key(key) {
            return Err(TranscodeStatus::InProgress);
        }
        // A job may have failed since the first check
        if let Some(error) = state.errors.remove(key) {
            return Err(TranscodeStatus::Failed(error));
        }
        let (done_tx, done_rx) = watch::channel(false);
        state.tasks.insert(
            key.to_string(),
            TranscodeTask {
                started_at: Instant::now(),
                done: done_rx,
            },
        );
        Ok(done_tx)
    }

    /// Wait until the job for `key` settles; returns immediately if none is running
    pub async fn wait_for(&self, key: &str) {
        let receiver = lock(&self.state).tasks.get(key).map(|task| task.done.clone());
        if let Some(mut receiver) = receiver {
            let _ = receiver.wait_for(|done| *done).await;
        }
    }
}

struct TranscodeJob {
    encoder: Arc<dyn AudioEncoder>,
    state: Arc<Mutex<TranscodeState>>,
    cache_dir: PathBuf,
    source: PathBuf,
    temp_path: PathBuf,
    final_path: PathBuf,
    key: String,
    bitrate: u32,
}

impl TranscodeJob {
    async fn run(self, done: watch::Sender<bool>) {
        let result = self.encode().await;

        if let Err(e) = &result {
            error!("Transcode of {} failed: {}", self.source.display(), e);
            if let Err(remove_error) = fs::remove_file(&self.temp_path).await {
                if remove_error.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", self.temp_path.display(), remove_error);
                }
            }
        }

        {
            let mut state = lock(&self.state);
            if let Err(e) = result {
                state.errors.insert(self.key.clone(), e.to_string());
            }
            if let Some(task) = state.tasks.remove(&self.key) {
                debug!("Transcode {} settled after {:?}", self.key, task.started_at.elapsed());
            }
        }

        let _ = done.send(true);
    }

    async fn encode(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;

        // Run the encoder on its own task so a panic is reported as a failure
        let encoder = Arc::clone(&self.encoder);
        let (source, temp_path, bitrate) = (self.source.clone(), self.temp_path.clone(), self.bitrate);
        tokio::spawn(async move { encoder.encode(bitrate, &source, &temp_path).await })
            .await
            .map_err(|e| anyhow::anyhow!("Encoder task aborted: {}", e))??;

        fs::rename(&self.temp_path, &self.final_path).await?;
        info!("Transcoded {} -> {}", self.source.display(), self.final_path.display());
        Ok(())
    }
}

/// Refresh the artifact mtime so an external janitor sees it as recently used
async fn touch(path: &Path) {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_modified(SystemTime::now())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Could not touch cached transcode: {}", e),
        Err(e) => debug!("Touch task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingEncoder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AudioEncoder for CountingEncoder {
        async fn encode(&self, bitrate: u32, _source: &Path, destination: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                tokio::fs::write(destination, b"partial").await?;
                return Err(anyhow::anyhow!("boom"));
            }
            tokio::fs::write(destination, format!("encoded@{}", bitrate)).await?;
            Ok(())
        }
    }

    fn coordinator(dir: &TempDir, fail: bool) -> (TranscodeCoordinator, Arc<CountingEncoder>) {
        let encoder = Arc::new(CountingEncoder {
            calls: AtomicUsize::new(0),
            fail,
        });
        (TranscodeCoordinator::new(dir.path().join("cache"), encoder.clone()), encoder)
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let mtime = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let key = cache_key("/srv/a.flac", mtime, 128);
        assert_eq!(key, cache_key("/srv/a.flac", mtime, 128));
        assert_eq!(key.len(), 64);
        assert_ne!(key, cache_key("/srv/a.flac", mtime, 192));
        assert_ne!(key, cache_key("/srv/b.flac", mtime, 128));
        assert_ne!(key, cache_key("/srv/a.flac", DateTime::from_timestamp(1_700_000_001, 0).unwrap(), 128));
    }

    #[tokio::test]
    async fn test_successful_transcode_is_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let (coordinator, encoder) = coordinator(&dir, false);
        let source = dir.path().join("a.flac");
        let mtime = Utc::now();

        assert_eq!(coordinator.request(&source, mtime, 128).await, TranscodeStatus::Started);
        let key = cache_key(&source.to_string_lossy(), mtime, 128);
        coordinator.wait_for(&key).await;

        let status = coordinator.request(&source, mtime, 128).await;
        let expected = coordinator.cache_path(&key);
        assert_eq!(status, TranscodeStatus::Ready(expected.clone()));
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "encoded@128");
        assert!(!coordinator.temp_path(&key).exists());
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_once_then_retried() {
        let dir = TempDir::new().unwrap();
        let (coordinator, encoder) = coordinator(&dir, true);
        let source = dir.path().join("a.flac");
        let mtime = Utc::now();
        let key = cache_key(&source.to_string_lossy(), mtime, 64);

        assert_eq!(coordinator.request(&source, mtime, 64).await, TranscodeStatus::Started);
        coordinator.wait_for(&key).await;
        assert!(!coordinator.temp_path(&key).exists());

        match coordinator.request(&source, mtime, 64).await {
            TranscodeStatus::Failed(message) => assert!(message.contains("boom")),
            other => panic!("expected Failed, got {:?}", other),
        }

        assert_eq!(coordinator.request(&source, mtime, 64).await, TranscodeStatus::Started);
        coordinator.wait_for(&key).await;
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_claim_reports_failure_recorded_after_first_check() {
        let dir = TempDir::new().unwrap();
        let (coordinator, _) = coordinator(&dir, false);
        lock(&coordinator.state)
            .errors
            .insert("key".to_string(), "boom".to_string());

        match coordinator.claim("key") {
            Err(TranscodeStatus::Failed(message)) => assert_eq!(message, "boom"),
            Err(other) => panic!("expected Failed, got {:?}", other),
            Ok(_) => panic!("expected Failed, a job was registered"),
        }
        assert!(lock(&coordinator.state).errors.is_empty());

        let _done = match coordinator.claim("key") {
            Ok(done) => done,
            Err(other) => panic!("expected a new job, got {:?}", other),
        };
        assert!(matches!(coordinator.claim("key"), Err(TranscodeStatus::InProgress)));
        assert_eq!(coordinator.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_encoder_binary_is_an_error() {
        let dir = TempDir::new().unwrap();
        let encoder = FfmpegEncoder::new("media-vault-no-such-encoder", Some(Duration::from_secs(5)));

        let err = encoder
            .encode(128, &dir.path().join("a.flac"), &dir.path().join("a.m4a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("media-vault-no-such-encoder"));
    }
}

/*!
 * Integration Tests for StorageManager
 *
 * Adapter ordering, fail-fast health checks, cross-storage work listing and
 * adapter cache invalidation, using local storages rooted in temp dirs.
 */

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tempfile::TempDir;

use media_vault::{
    config::DEFAULT_WORK_ID_PATTERN,
    db::StorageConfigRepository,
    models::StorageConfig,
    storage::{factory::AdapterOptions, manager::StorageManager, StorageError},
};

/// In-memory repository that counts how often configs are loaded
#[derive(Default)]
struct MemoryRepository {
    configs: Mutex<Vec<StorageConfig>>,
    loads: AtomicUsize,
}

impl MemoryRepository {
    fn replace(&self, configs: Vec<StorageConfig>) {
        *self.configs.lock().unwrap() = configs;
    }
}

#[async_trait]
impl StorageConfigRepository for MemoryRepository {
    async fn list_storage_configs(&self) -> Result<Vec<StorageConfig>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.configs.lock().unwrap().clone())
    }
}

fn local(id: i64, name: &str, root: &Path, priority: i64) -> StorageConfig {
    StorageConfig {
        id,
        name: name.to_string(),
        storage_type: "local".to_string(),
        config: json!({ "path": root.to_string_lossy() }),
        priority,
        description: None,
    }
}

fn manager(configs: Vec<StorageConfig>) -> (StorageManager, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::default());
    repository.replace(configs);
    let manager = StorageManager::new(
        repository.clone(),
        AdapterOptions::default(),
        Regex::new(DEFAULT_WORK_ID_PATTERN).unwrap(),
    );
    (manager, repository)
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn test_adapters_are_ordered_by_priority() {
    let (a, b, c) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    let (manager, _) = manager(vec![
        local(1, "low", a.path(), 1),
        local(2, "high", b.path(), 10),
        local(3, "mid", c.path(), 5),
    ]);

    let adapters = manager.get_adapters().await.unwrap();
    let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_unhealthy_high_priority_storage_blocks_lookup() {
    let missing = TempDir::new().unwrap();
    let missing_root = missing.path().join("not-mounted");
    let (mid, low) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    write_file(mid.path(), "RJ123456/track.flac", "mid");
    write_file(low.path(), "RJ123456/track.flac", "low");

    let (manager, _) = manager(vec![
        local(1, "offline", &missing_root, 10),
        local(2, "mid", mid.path(), 5),
        local(3, "low", low.path(), 1),
    ]);

    match manager.find("RJ123456/track.flac").await {
        Err(StorageError::BackendUnhealthy { adapter }) => assert_eq!(adapter, "offline"),
        Err(other) => panic!("expected BackendUnhealthy, got {:?}", other),
        Ok(adapter) => panic!("expected BackendUnhealthy, found on {}", adapter.name()),
    }
}

#[tokio::test]
async fn test_first_healthy_storage_holding_the_path_wins() {
    let (high, mid, low) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    write_file(mid.path(), "RJ123456/track.flac", "mid");
    write_file(low.path(), "RJ123456/track.flac", "low");

    let (manager, _) = manager(vec![
        local(1, "high", high.path(), 10),
        local(2, "mid", mid.path(), 5),
        local(3, "low", low.path(), 1),
    ]);

    let (adapter, file) = manager.file("/RJ123456/track.flac").await.unwrap();
    assert_eq!(adapter.name(), "mid");
    assert_eq!(file.size, 3);

    assert!(manager.exists("RJ123456/track.flac").await.unwrap());
    assert!(!manager.exists("RJ123456/other.flac").await.unwrap());
    assert!(matches!(
        manager.find("RJ999999/missing.flac").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_traversal_is_denied_before_any_lookup() {
    let root = TempDir::new().unwrap();
    let (manager, _) = manager(vec![local(1, "only", root.path(), 1)]);

    assert!(matches!(
        manager.find("../../etc/passwd").await,
        Err(StorageError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn test_list_unions_work_directories() {
    let (a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    std::fs::create_dir(a.path().join("RJ123456")).unwrap();
    std::fs::create_dir(a.path().join("BJ01234567")).unwrap();
    std::fs::create_dir(b.path().join("RJ123456")).unwrap();
    std::fs::create_dir(b.path().join("VJ7654321")).unwrap();
    std::fs::create_dir(b.path().join("artwork")).unwrap();
    write_file(b.path(), "RJ999999", "a file, not a work");

    let (manager, _) = manager(vec![local(1, "a", a.path(), 2), local(2, "b", b.path(), 1)]);

    let works: Vec<String> = manager.list().await.unwrap().into_iter().collect();
    assert_eq!(works, vec!["BJ01234567", "RJ123456", "VJ7654321"]);
}

#[tokio::test]
async fn test_list_requires_every_storage_to_be_healthy() {
    let healthy = TempDir::new().unwrap();
    std::fs::create_dir(healthy.path().join("RJ123456")).unwrap();
    let missing = TempDir::new().unwrap();

    let (manager, _) = manager(vec![
        local(1, "healthy", healthy.path(), 10),
        local(2, "offline", &missing.path().join("gone"), 1),
    ]);

    assert!(matches!(
        manager.list().await,
        Err(StorageError::BackendUnhealthy { adapter }) if adapter == "offline"
    ));
}

#[tokio::test]
async fn test_adapters_are_memoized_until_invalidated() {
    let (a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    write_file(b.path(), "RJ123456/track.flac", "new");

    let (manager, repository) = manager(vec![local(1, "a", a.path(), 1)]);

    manager.get_adapters().await.unwrap();
    manager.get_adapters().await.unwrap();
    assert_eq!(repository.loads.load(Ordering::SeqCst), 1);

    repository.replace(vec![local(1, "a", a.path(), 1), local(2, "b", b.path(), 0)]);
    assert!(!manager.exists("RJ123456/track.flac").await.unwrap());

    manager.invalidate_cache();
    assert!(manager.exists("RJ123456/track.flac").await.unwrap());
    assert_eq!(repository.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_storage_type_names_the_config() {
    let (manager, _) = manager(vec![StorageConfig {
        id: 42,
        name: "mystery".to_string(),
        storage_type: "ftp".to_string(),
        config: json!({}),
        priority: 0,
        description: None,
    }]);

    match manager.get_adapters().await {
        Err(StorageError::InvalidConfig(message)) => assert!(message.contains("42"), "{}", message),
        Err(other) => panic!("expected InvalidConfig, got {:?}", other),
        Ok(_) => panic!("expected InvalidConfig"),
    }
}

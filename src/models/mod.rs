pub mod storage;

pub use storage::{
    CreateStorageConfig, LocalConfig, StorageConfig, StorageTestResult, StorageType,
    TestStorageConfig, UpdateStorageConfig, WebDAVConfig,
};

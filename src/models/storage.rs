use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum StorageType {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "webdav")]
    WebDAV,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Local => write!(f, "local"),
            StorageType::WebDAV => write!(f, "webdav"),
        }
    }
}

impl TryFrom<&str> for StorageType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "local" => Ok(StorageType::Local),
            "webdav" => Ok(StorageType::WebDAV),
            _ => Err(format!("Invalid storage type: {}", value)),
        }
    }
}

/// Persisted storage backend configuration.
///
/// `storage_type` is kept as the raw persisted string and `config` as raw
/// JSON; both are only interpreted when an adapter is built, so a row with
/// an unknown type is reported against its id instead of failing to load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct StorageConfig {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: String,
    pub config: serde_json::Value,
    pub priority: i64,
    pub description: Option<String>,
}

/// Configuration of a local filesystem backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct LocalConfig {
    pub path: String,
}

/// Configuration of a WebDAV backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WebDAVConfig {
    /// Server endpoint, e.g. `https://dav.example.com/remote.php/webdav`
    pub url: String,
    /// Directory on the server holding the library
    #[serde(default = "default_webdav_path")]
    pub path: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_webdav_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateStorageConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: String,
    pub config: serde_json::Value,
    #[serde(default)]
    pub priority: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateStorageConfig {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub storage_type: Option<String>,
    pub config: Option<serde_json::Value>,
    pub priority: Option<i64>,
    pub description: Option<String>,
}

/// Proposed backend to validate before it is saved
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestStorageConfig {
    #[serde(rename = "type")]
    pub storage_type: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StorageTestResult {
    pub success: bool,
    pub message: String,
}

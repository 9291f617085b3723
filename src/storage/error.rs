//! Error type shared by every storage adapter and the WebDAV client

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested path resolves outside of the adapter's base directory
    #[error("access denied: '{0}' escapes the storage root")]
    AccessDenied(String),

    /// An adapter failed its health probe while servicing a lookup
    #[error("storage '{adapter}' is not available")]
    BackendUnhealthy { adapter: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Non-2xx WebDAV responses, malformed multistatus bodies and servers
    /// that ignore `Range` all surface here with the raw response attached
    #[error("{message} (status {status})")]
    Protocol {
        status: u16,
        message: String,
        body: String,
    },

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl StorageError {
    pub fn protocol(status: u16, message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            message: message.into(),
            body: body.into(),
        }
    }

    /// HTTP status of a protocol failure, if this error carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => self.status() == Some(404),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

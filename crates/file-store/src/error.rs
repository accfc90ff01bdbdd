//! Error types for the file store

use std::fmt;

#[derive(Debug)]
pub enum FileStoreError {
    /// Store not configured, or configured with invalid values
    Configuration(String),
    /// Directory or file could not be created, opened or written
    StorageUnavailable(String),
    /// No valid record for the given id or resource
    NotFound(String),
    /// Structural operation that makes no sense for a flat file
    OperationUnsupported(String),
    Io(Box<std::io::Error>),
    Metadata(Box<dyn std::error::Error + Send + Sync>),
}

impl FileStoreError {
    /// Wrap a persistence-layer error
    pub fn metadata<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FileStoreError::Metadata(Box::new(err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FileStoreError::NotFound(_))
    }
}

impl fmt::Display for FileStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStoreError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            FileStoreError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            FileStoreError::NotFound(msg) => write!(f, "Not found: {}", msg),
            FileStoreError::OperationUnsupported(msg) => {
                write!(f, "Operation not supported: {}", msg)
            }
            FileStoreError::Io(err) => write!(f, "IO error: {}", err),
            FileStoreError::Metadata(err) => write!(f, "Metadata error: {}", err),
        }
    }
}

impl std::error::Error for FileStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileStoreError::Io(err) => Some(err.as_ref()),
            FileStoreError::Metadata(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FileStoreError {
    fn from(err: std::io::Error) -> Self {
        FileStoreError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for FileStoreError {
    fn from(err: serde_json::Error) -> Self {
        FileStoreError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FileStoreError>;

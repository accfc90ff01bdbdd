//! Error types for the maintenance runner

use std::fmt;

#[derive(Debug)]
pub enum MaintenanceError {
    Database(sqlx::Error),
    FileStore(file_store::FileStoreError),
    Config(String),
    /// One or more stores could not be swept
    SweepFailed(Vec<String>),
}

impl fmt::Display for MaintenanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceError::Database(err) => write!(f, "Database error: {}", err),
            MaintenanceError::FileStore(err) => write!(f, "File store error: {}", err),
            MaintenanceError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MaintenanceError::SweepFailed(stores) => {
                write!(f, "Maintenance failed for: {}", stores.join(", "))
            }
        }
    }
}

impl std::error::Error for MaintenanceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MaintenanceError::Database(err) => Some(err),
            MaintenanceError::FileStore(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for MaintenanceError {
    fn from(err: sqlx::Error) -> Self {
        MaintenanceError::Database(err)
    }
}

impl From<file_store::FileStoreError> for MaintenanceError {
    fn from(err: file_store::FileStoreError) -> Self {
        MaintenanceError::FileStore(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for MaintenanceError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        MaintenanceError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

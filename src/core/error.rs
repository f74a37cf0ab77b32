use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classes, one per failure family of the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Illegal parent/child relationship between containers
    Containment,
    /// Schema construction, validation, encode or decode failure
    Schema,
    /// Filesystem failure, including short reads/writes and empty files
    Io,
    /// Directory is not classified as the expected container kind
    NotFound,
    /// Missing handle or malformed arguments
    Validation,
    /// Failure reported by an array handle
    Array,
    /// Failure reported by a metadata handle
    Metadata,
    /// Target directory already exists
    AlreadyExists,
    /// Configuration could not be loaded
    Config,
    /// Operation has no implementation
    Unsupported,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Containment violation: {0}")]
    Containment(String),

    #[error("Directory '{0}' carries more than one container marker")]
    AmbiguousNode(PathBuf),

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Schema serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on '{path}': {message}")]
    File { path: PathBuf, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Array error: {0}")]
    Array(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Directory already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

impl StorageError {
    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Containment(_) | StorageError::AmbiguousNode(_) => {
                ErrorKind::Containment
            }
            StorageError::Schema(_) | StorageError::Serialization(_) => ErrorKind::Schema,
            StorageError::Io(_) | StorageError::File { .. } => ErrorKind::Io,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Validation(_) => ErrorKind::Validation,
            StorageError::Array(_) => ErrorKind::Array,
            StorageError::Metadata(_) => ErrorKind::Metadata,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::Config(_) => ErrorKind::Config,
            StorageError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        StorageError::File {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

use thiserror::Error;

/// Transport/storage tags from the error taxonomy (spec §7): these three
/// are the only storage errors ever retried; everything else is fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("DEADLINE: operation did not complete before its deadline")]
    Deadline,

    #[error("CONFLICT: {0}")]
    Conflict(String),

    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt record at {0}: {1}")]
    Corrupt(String, String),
}

impl StorageError {
    /// `UNAVAILABLE` and `CONFLICT` are transient; `NOT_FOUND`, `DEADLINE`
    /// and corruption are not retried (spec §5 "Retries").
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Conflict(_))
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(error: rocksdb::Error) -> Self {
        StorageError::Unavailable(error.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for StorageError {
    fn from(error: Box<bincode::ErrorKind>) -> Self {
        StorageError::Corrupt("bincode".to_string(), error.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

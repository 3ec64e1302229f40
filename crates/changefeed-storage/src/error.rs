//! Error types for changefeed-storage
//!
//! Failures reported by redb are classified here as transient (worth one
//! more attempt) or permanent, and translated into the feed-level
//! [`FeedError`] taxonomy at the log boundary.

use changefeed_core::FeedError;
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Lock contention or another short-lived failure
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),
}

impl StorageError {
    /// Whether the failed operation may succeed if retried as a whole
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Transient(_))
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        match err {
            redb::StorageError::Io(e) => StorageError::Io(e.to_string()),
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        match err {
            redb::DatabaseError::DatabaseAlreadyOpen => {
                StorageError::Transient("database is already open".into())
            }
            redb::DatabaseError::Storage(e) => e.into(),
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        match err {
            redb::TransactionError::Storage(e) => e.into(),
            other => StorageError::Transient(other.to_string()),
        }
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        match err {
            redb::TableError::Storage(e) => e.into(),
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        match err {
            redb::CommitError::Storage(e) => e.into(),
            other => StorageError::Transient(other.to_string()),
        }
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<StorageError> for FeedError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            FeedError::TransientStoreFailure(err.to_string())
        } else {
            FeedError::Storage(err.to_string())
        }
    }
}

/// Classify a raw redb error and lift it into a [`FeedError`]
pub(crate) fn into_feed_error<E: Into<StorageError>>(err: E) -> FeedError {
    FeedError::from(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "lock wait");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(storage_err.is_transient());
    }

    #[test]
    fn test_feed_error_translation() {
        let transient: FeedError = StorageError::Transient("busy".into()).into();
        assert!(transient.is_transient());

        let permanent: FeedError = StorageError::deserialization("bad record").into();
        assert!(matches!(permanent, FeedError::Storage(_)));
    }

    #[test]
    fn test_already_open_is_transient() {
        let err: StorageError = redb::DatabaseError::DatabaseAlreadyOpen.into();
        assert!(err.is_transient());
    }
}

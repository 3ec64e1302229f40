//! Error types for the node coordinator

use changefeed_core::FeedError;
use changefeed_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the node coordinator
#[derive(Debug, Error)]
pub enum NodeError {
    /// Feed operation failed
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No feed with this name is open
    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    /// Node already started
    #[error("Node already started")]
    AlreadyStarted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<toml::de::Error> for NodeError {
    fn from(e: toml::de::Error) -> Self {
        NodeError::Config(e.to_string())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;

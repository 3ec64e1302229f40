//! Error types for changefeed

use thiserror::Error;

use crate::changeset::ChangeSetId;

/// Errors surfaced to callers of a feed
///
/// Storage layers translate their own failures into this taxonomy at the
/// log boundary. A `since` marker that is no longer in the chain is not an
/// error: reads degrade to returning everything still retained.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed's root anchor does not exist yet
    #[error("Feed not initialized: {0}")]
    NotInitialized(String),

    /// Lock contention, deadlock, or transient I/O failure
    #[error("Transient store failure: {0}")]
    TransientStoreFailure(String),

    /// A change set with this id is already stored in the feed
    #[error("Duplicate change set id {id} in feed {feed}")]
    DuplicateId { feed: String, id: ChangeSetId },

    /// The persisted chain violates its structural invariants
    #[error("Corrupted feed {feed}: {reason}")]
    Corrupted { feed: String, reason: String },

    #[error("Invalid feed name: {0}")]
    InvalidFeedName(String),

    #[error("Invalid feed settings: {0}")]
    InvalidSettings(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl FeedError {
    /// Whether retrying the whole operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::TransientStoreFailure(_))
    }

    /// Create a new NotInitialized error
    pub fn not_initialized(feed: impl Into<String>) -> Self {
        Self::NotInitialized(feed.into())
    }

    /// Create a new Corrupted error
    pub fn corrupted(feed: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            feed: feed.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

//! Persisted record layouts
//!
//! Both records are postcard-encoded into the value column of their table.

use changefeed_core::{ChangeSet, ChangeSetId};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Root anchor of one feed
///
/// `newest` and `oldest` are either both set or both empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    /// Id of the most recently appended change set
    pub newest: Option<u64>,
    /// Id of the oldest change set still retained
    pub oldest: Option<u64>,
    /// When the root was created
    pub created_at_millis: i64,
}

impl RootRecord {
    pub fn empty(created_at_millis: i64) -> Self {
        Self {
            newest: None,
            oldest: None,
            created_at_millis,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.newest.is_none()
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        postcard::to_allocvec(self).map_err(|e| StorageError::serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// One stored change set plus its chain link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRecord {
    pub id: u64,
    pub timestamp_millis: i64,
    pub changes: Vec<String>,
    /// Id of the entry appended immediately before this one
    pub previous: Option<u64>,
}

impl ChangeSetRecord {
    /// Build the record for `change_set`, linked to `previous`
    pub fn link(change_set: &ChangeSet, previous: Option<u64>) -> Self {
        Self {
            id: change_set.id().value(),
            timestamp_millis: change_set.timestamp_millis(),
            changes: change_set.changes().to_vec(),
            previous,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        postcard::to_allocvec(self).map_err(|e| StorageError::serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    pub fn into_change_set(self) -> ChangeSet {
        ChangeSet::new(ChangeSetId::new(self.id), self.timestamp_millis, self.changes)
    }
}

//! Change set types

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Position of a change set within its feed
///
/// Ids form a dense sequence starting at 1 and are assigned in increment
/// order. Under interleaved writers a higher id may be committed before a
/// lower one, so chain order (not id order) is authoritative for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSetId(pub u64);

impl ChangeSetId {
    /// The id given to the first change set of a feed
    pub const FIRST: ChangeSetId = ChangeSetId(1);

    /// Create a new change set id
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw sequence value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id that follows this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for ChangeSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChangeSetId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// One recorded unit of change
///
/// Holds the human-readable descriptions of every mutation made by a single
/// transaction of the underlying store. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    id: ChangeSetId,
    timestamp_millis: i64,
    changes: Vec<String>,
}

impl ChangeSet {
    /// Create a change set stamped with the given creation time
    pub fn new(id: ChangeSetId, timestamp_millis: i64, changes: Vec<String>) -> Self {
        Self {
            id,
            timestamp_millis,
            changes,
        }
    }

    pub fn id(&self) -> ChangeSetId {
        self.id
    }

    /// Creation time in milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    /// Change descriptions in the order they were supplied
    pub fn changes(&self) -> &[String] {
        &self.changes
    }

    /// Consume the change set, returning its descriptions
    pub fn into_changes(self) -> Vec<String> {
        self.changes
    }
}

impl Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ChangeSet#{} @{} ({} changes)",
            self.id,
            self.timestamp_millis,
            self.changes.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering_and_next() {
        let id = ChangeSetId::FIRST;
        assert_eq!(id.value(), 1);
        assert_eq!(id.next(), ChangeSetId::new(2));
        assert!(ChangeSetId::new(3) > ChangeSetId::new(2));
    }

    #[test]
    fn test_change_set_preserves_order() {
        let cs = ChangeSet::new(
            ChangeSetId::new(5),
            1_700_000_000_000,
            vec!["created node 1".into(), "deleted node 2".into()],
        );
        assert_eq!(cs.id(), ChangeSetId::new(5));
        assert_eq!(cs.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(cs.changes(), ["created node 1", "deleted node 2"]);
    }

    #[test]
    fn test_json_shape() {
        let cs = ChangeSet::new(ChangeSetId::new(3), 42, vec!["a".into()]);
        let json = serde_json::to_value(&cs).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["timestamp_millis"], 42);
        assert_eq!(json["changes"][0], "a");
    }

    #[test]
    fn test_postcard_round_trip() {
        let cs = ChangeSet::new(ChangeSetId::new(9), -1, vec![]);
        let bytes = postcard::to_allocvec(&cs).unwrap();
        let back: ChangeSet = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, cs);
    }
}

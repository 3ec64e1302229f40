//! Core trait definitions for changefeed
//!
//! These traits are the seam between the changelog engine and its
//! collaborators: the transport layer reads through [`ChangeReader`], the
//! mutation detector writes through [`ChangeWriter`].

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::changeset::{ChangeSet, ChangeSetId};
use crate::error::FeedResult;

/// Newest-first, paged access to a feed
///
/// All operations return change sets in chain order, newest first. A
/// marker is an exclusive lower bound: the change set it names and
/// everything older is left out. A marker that is no longer retained is not
/// an error; everything still in the feed is returned instead.
pub trait ChangeReader: Send + Sync {
    /// Read change sets newer than `since`, at most `limit` of them
    fn changes(&self, since: Option<ChangeSetId>, limit: Option<usize>)
    -> FeedResult<Vec<ChangeSet>>;

    /// Get every retained change set
    fn get_all_changes(&self) -> FeedResult<Vec<ChangeSet>> {
        self.changes(None, None)
    }

    /// Get the `limit` latest change sets
    fn get_number_of_changes(&self, limit: usize) -> FeedResult<Vec<ChangeSet>> {
        self.changes(None, Some(limit))
    }

    /// Get all change sets newer than `marker`
    fn get_changes_since(&self, marker: ChangeSetId) -> FeedResult<Vec<ChangeSet>> {
        self.changes(Some(marker), None)
    }

    /// Get at most `limit` change sets newer than `marker`
    fn get_number_of_changes_since(
        &self,
        marker: ChangeSetId,
        limit: usize,
    ) -> FeedResult<Vec<ChangeSet>> {
        self.changes(Some(marker), Some(limit))
    }
}

/// Recording and retention of change sets
pub trait ChangeWriter: Send + Sync {
    /// Record the descriptions produced by one transaction
    ///
    /// Returns `None` without touching storage when `changes` is empty.
    fn record_changes(&self, changes: Vec<String>) -> FeedResult<Option<ChangeSet>>;

    /// Trim the feed to `keep` entries once it exceeds them by `hysteresis`
    fn prune_changes(&self, keep: usize, hysteresis: usize) -> FeedResult<PruneOutcome>;
}

/// What a single prune pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PruneOutcome {
    /// The feed holds no more than `keep` entries
    WithinRetention { retained: usize },
    /// The feed exceeds `keep`, but by less than the hysteresis threshold
    BelowHysteresis { excess: usize },
    /// Entries older than `oldest` were deleted
    Pruned { removed: usize, oldest: ChangeSetId },
    /// Another pass was already running against the feed
    Skipped,
}

impl PruneOutcome {
    /// Number of change sets deleted by this pass
    pub fn removed(&self) -> usize {
        match self {
            PruneOutcome::Pruned { removed, .. } => *removed,
            _ => 0,
        }
    }
}

impl Display for PruneOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PruneOutcome::WithinRetention { retained } => {
                write!(f, "within retention ({} retained)", retained)
            }
            PruneOutcome::BelowHysteresis { excess } => {
                write!(f, "below hysteresis (excess {})", excess)
            }
            PruneOutcome::Pruned { removed, oldest } => {
                write!(f, "pruned {} (oldest now {})", removed, oldest)
            }
            PruneOutcome::Skipped => f.write_str("skipped (pass in progress)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Minimal in-memory reader, newest first
    struct VecReader(Mutex<Vec<ChangeSet>>);

    impl ChangeReader for VecReader {
        fn changes(
            &self,
            since: Option<ChangeSetId>,
            limit: Option<usize>,
        ) -> FeedResult<Vec<ChangeSet>> {
            let entries = self.0.lock().unwrap();
            Ok(entries
                .iter()
                .take_while(|cs| Some(cs.id()) != since)
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect())
        }
    }

    fn reader() -> VecReader {
        let entries = (1..=4)
            .rev()
            .map(|i| ChangeSet::new(ChangeSetId::new(i), i as i64, vec![format!("c{}", i)]))
            .collect();
        VecReader(Mutex::new(entries))
    }

    /// Test that the traits are object-safe
    fn _assert_object_safe(_: &dyn ChangeReader, _: &dyn ChangeWriter) {}

    #[test]
    fn test_default_methods_delegate() {
        let reader = reader();
        let ids = |v: Vec<ChangeSet>| v.iter().map(|c| c.id().value()).collect::<Vec<_>>();

        assert_eq!(ids(reader.get_all_changes().unwrap()), [4, 3, 2, 1]);
        assert_eq!(ids(reader.get_number_of_changes(2).unwrap()), [4, 3]);
        assert_eq!(ids(reader.get_changes_since(ChangeSetId::new(2)).unwrap()), [4, 3]);
        assert_eq!(
            ids(reader
                .get_number_of_changes_since(ChangeSetId::new(1), 1)
                .unwrap()),
            [4]
        );
    }

    #[test]
    fn test_prune_outcome_removed() {
        let pruned = PruneOutcome::Pruned {
            removed: 3,
            oldest: ChangeSetId::new(10),
        };
        assert_eq!(pruned.removed(), 3);
        assert_eq!(PruneOutcome::Skipped.removed(), 0);
        assert!(pruned.to_string().contains("oldest now 10"));
    }
}

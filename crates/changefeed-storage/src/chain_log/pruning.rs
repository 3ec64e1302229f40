//! Retention with hysteresis
//!
//! A pass keeps the `keep` newest entries and only deletes once the chain
//! has grown at least `hysteresis` entries past that, so the boundary is not
//! rewritten on every append.

use changefeed_core::{ChangeSetId, FeedError, FeedResult, PruneOutcome};
use parking_lot::Mutex;
use redb::ReadableTableMetadata;
use tracing::{debug, info, instrument};

use super::log::{ChainLog, RootHandle, load_record, require_root};
use super::record::ChangeSetRecord;
use crate::error::into_feed_error;
use crate::tables::{CHANGE_SETS, FEED_ROOTS};

/// Phase of a pruner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrunerState {
    #[default]
    Idle,
    /// Counting entries past the retention boundary
    Scanning,
    /// Detaching the boundary and deleting older records
    Pruning,
}

impl ChainLog {
    /// Trim the feed to its `keep` newest entries
    ///
    /// `keep` is clamped to at least one. Nothing is written unless the chain
    /// extends at least `hysteresis` entries past the boundary.
    pub fn prune(&self, root: &RootHandle, keep: usize, hysteresis: usize) -> FeedResult<PruneOutcome> {
        self.prune_observed(root, keep, hysteresis, || {})
    }

    /// Like [`ChainLog::prune`], calling `on_pruning` once the pass commits
    /// to deleting
    #[instrument(skip(self, root, on_pruning), fields(feed = %root.feed()))]
    pub fn prune_observed(
        &self,
        root: &RootHandle,
        keep: usize,
        hysteresis: usize,
        on_pruning: impl FnOnce(),
    ) -> FeedResult<PruneOutcome> {
        let feed = root.name();
        let keep = keep.max(1);

        let txn = self.storage().begin_write()?;
        let outcome = {
            let mut roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
            let mut records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
            let mut state = require_root(&roots, feed)?;
            let bound = records.len().map_err(into_feed_error)?;
            let mut steps = 0u64;
            let mut step = |id: u64| {
                steps += 1;
                if steps > bound {
                    Err(FeedError::corrupted(feed, format!("cycle through {}", id)))
                } else {
                    Ok(())
                }
            };
            let dangling = |id: u64| FeedError::corrupted(feed, format!("dangling link to {}", id));

            // Find the keep-th newest entry
            let mut retained = 0;
            let mut cutoff = None;
            let mut cursor = state.newest;
            while let Some(id) = cursor {
                step(id)?;
                let record = load_record(&records, feed, id)?.ok_or_else(|| dangling(id))?;
                retained += 1;
                if retained == keep {
                    cutoff = Some(record);
                    break;
                }
                cursor = record.previous;
            }

            match cutoff.and_then(|cut| cut.previous.map(|first| (cut, first))) {
                None => PruneOutcome::WithinRetention { retained },
                Some((cut, first_excess)) => {
                    let mut excess = 0;
                    let mut cursor = Some(first_excess);
                    while let Some(id) = cursor {
                        if excess >= hysteresis {
                            break;
                        }
                        step(id)?;
                        let record = load_record(&records, feed, id)?.ok_or_else(|| dangling(id))?;
                        excess += 1;
                        cursor = record.previous;
                    }

                    if excess < hysteresis {
                        PruneOutcome::BelowHysteresis { excess }
                    } else {
                        on_pruning();

                        let detached = ChangeSetRecord {
                            previous: None,
                            ..cut
                        };
                        records
                            .insert((feed, detached.id), detached.encode()?.as_slice())
                            .map_err(into_feed_error)?;
                        state.oldest = Some(detached.id);
                        roots
                            .insert(feed, state.encode()?.as_slice())
                            .map_err(into_feed_error)?;

                        let mut removed = 0;
                        let mut cursor = Some(first_excess);
                        while let Some(id) = cursor {
                            cursor = match records.remove((feed, id)).map_err(into_feed_error)? {
                                Some(guard) => ChangeSetRecord::decode(guard.value())?.previous,
                                None => return Err(dangling(id)),
                            };
                            removed += 1;
                        }

                        PruneOutcome::Pruned {
                            removed,
                            oldest: ChangeSetId::new(detached.id),
                        }
                    }
                }
            }
        };

        match outcome {
            PruneOutcome::Pruned { removed, oldest } => {
                txn.commit().map_err(into_feed_error)?;
                info!(removed, oldest = %oldest, "Pruned feed");
            }
            other => {
                txn.abort().map_err(into_feed_error)?;
                debug!(outcome = %other, "Nothing to prune");
            }
        }
        Ok(outcome)
    }
}

/// Resets the pruner to idle when a pass ends, however it ends
struct PassGuard<'a>(&'a Mutex<PrunerState>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = PrunerState::Idle;
    }
}

/// Runs prune passes for one feed, one at a time
///
/// A pass that starts while another is still running returns
/// [`PruneOutcome::Skipped`] without touching storage.
#[derive(Debug)]
pub struct Pruner {
    log: ChainLog,
    root: RootHandle,
    state: Mutex<PrunerState>,
}

impl Pruner {
    pub fn new(log: ChainLog, root: RootHandle) -> Self {
        Self {
            log,
            root,
            state: Mutex::new(PrunerState::Idle),
        }
    }

    pub fn state(&self) -> PrunerState {
        *self.state.lock()
    }

    /// Run one pass unless another is in progress
    pub fn run_once(&self, keep: usize, hysteresis: usize) -> FeedResult<PruneOutcome> {
        {
            let mut state = self.state.lock();
            if *state != PrunerState::Idle {
                debug!(feed = %self.root.feed(), state = ?*state, "Prune pass already running");
                return Ok(PruneOutcome::Skipped);
            }
            *state = PrunerState::Scanning;
        }
        let _guard = PassGuard(&self.state);

        self.log.prune_observed(&self.root, keep, hysteresis, || {
            *self.state.lock() = PrunerState::Pruning;
        })
    }
}

//! Root-anchored change set chain
//!
//! Each feed is a singly linked chain: the root anchor names the newest and
//! oldest entries, and every record names the entry appended before it.
//! Mutations run inside one redb write transaction, which is also the only
//! lock on the root. Reads walk a read snapshot and never block writers.

use std::collections::HashSet;
use std::sync::Arc;

use changefeed_core::{ChangeSet, ChangeSetId, FeedError, FeedName, FeedResult};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::record::{ChangeSetRecord, RootRecord};
use crate::error::into_feed_error;
use crate::tables::{CHANGE_SETS, FEED_ROOTS, RedbStorage};

/// Handle to an initialized feed root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHandle {
    feed: FeedName,
    created_at_millis: i64,
}

impl RootHandle {
    pub fn feed(&self) -> &FeedName {
        &self.feed
    }

    pub fn name(&self) -> &str {
        self.feed.as_str()
    }

    /// When the root anchor was first written
    pub fn created_at_millis(&self) -> i64 {
        self.created_at_millis
    }
}

/// Snapshot of a root anchor's pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootState {
    pub newest: Option<ChangeSetId>,
    pub oldest: Option<ChangeSetId>,
    pub created_at_millis: i64,
}

impl From<RootRecord> for RootState {
    fn from(record: RootRecord) -> Self {
        Self {
            newest: record.newest.map(ChangeSetId::new),
            oldest: record.oldest.map(ChangeSetId::new),
            created_at_millis: record.created_at_millis,
        }
    }
}

/// Result of walking a feed's chain end to end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Entries reachable from `newest`
    pub entries: usize,
    /// Records stored under the feed, reachable or not
    pub stored: usize,
    pub newest: Option<ChangeSetId>,
    pub oldest: Option<ChangeSetId>,
    /// Human-readable invariant violations
    pub violations: Vec<String>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Persistent, root-anchored log of change sets
#[derive(Clone, Debug)]
pub struct ChainLog {
    storage: Arc<RedbStorage>,
}

impl ChainLog {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    pub(crate) fn storage(&self) -> &RedbStorage {
        &self.storage
    }

    /// Create the feed's root anchor if it does not exist yet
    ///
    /// Concurrent callers serialize on the write transaction; whoever comes
    /// second finds the root and returns it unchanged.
    #[instrument(skip(self, feed), fields(feed = %feed))]
    pub fn ensure_root(&self, feed: &FeedName) -> FeedResult<RootHandle> {
        let txn = self.storage.begin_write()?;
        let (record, created) = {
            let mut roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
            match load_root(&roots, feed.as_str())? {
                Some(existing) => (existing, false),
                None => {
                    let record = RootRecord::empty(chrono::Utc::now().timestamp_millis());
                    roots
                        .insert(feed.as_str(), record.encode()?.as_slice())
                        .map_err(into_feed_error)?;
                    (record, true)
                }
            }
        };

        if created {
            txn.commit().map_err(into_feed_error)?;
            info!("Created feed root");
        } else {
            txn.abort().map_err(into_feed_error)?;
            debug!("Feed root already exists");
        }

        Ok(RootHandle {
            feed: feed.clone(),
            created_at_millis: record.created_at_millis,
        })
    }

    /// Look up an existing root anchor
    pub fn root(&self, feed: &FeedName) -> FeedResult<RootHandle> {
        let txn = self.storage.begin_read()?;
        let roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        let record = require_root(&roots, feed.as_str())?;
        Ok(RootHandle {
            feed: feed.clone(),
            created_at_millis: record.created_at_millis,
        })
    }

    /// Append a change set as the feed's new newest entry
    #[instrument(skip(self, root, change_set), fields(feed = %root.feed, id = %change_set.id()))]
    pub fn append(&self, root: &RootHandle, change_set: &ChangeSet) -> FeedResult<()> {
        let txn = self.storage.begin_write()?;
        self.append_within(&txn, root, change_set)?;
        txn.commit().map_err(into_feed_error)?;

        debug!(changes = change_set.changes().len(), "Appended change set");
        Ok(())
    }

    /// Append inside a caller-owned write transaction
    ///
    /// Nothing is visible to readers until the caller commits; aborting or
    /// dropping the transaction discards the entry and the root update.
    pub fn append_within(
        &self,
        txn: &WriteTransaction,
        root: &RootHandle,
        change_set: &ChangeSet,
    ) -> FeedResult<()> {
        let feed = root.name();
        let id = change_set.id().value();

        let mut roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        let mut records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
        let mut state = require_root(&roots, feed)?;

        if records.get((feed, id)).map_err(into_feed_error)?.is_some() {
            return Err(FeedError::DuplicateId {
                feed: feed.to_string(),
                id: change_set.id(),
            });
        }

        let record = ChangeSetRecord::link(change_set, state.newest);
        records
            .insert((feed, id), record.encode()?.as_slice())
            .map_err(into_feed_error)?;

        if state.oldest.is_none() {
            state.oldest = Some(id);
        }
        state.newest = Some(id);
        roots
            .insert(feed, state.encode()?.as_slice())
            .map_err(into_feed_error)?;

        Ok(())
    }

    /// Walk the chain from newest, stopping at `limit` entries or at `since`
    ///
    /// `since` is exclusive: the marker entry and everything older are left
    /// out. A marker that is not in the chain returns every retained entry.
    pub fn read(
        &self,
        root: &RootHandle,
        since: Option<ChangeSetId>,
        limit: Option<usize>,
    ) -> FeedResult<Vec<ChangeSet>> {
        let txn = self.storage.begin_read()?;
        let roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        let records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
        let state = require_root(&roots, root.name())?;

        let chain = walk(
            &records,
            root.name(),
            state.newest,
            since.map(|marker| marker.value()),
            limit,
        )?;
        Ok(chain
            .into_iter()
            .map(ChangeSetRecord::into_change_set)
            .collect())
    }

    pub fn read_all(&self, root: &RootHandle) -> FeedResult<Vec<ChangeSet>> {
        self.read(root, None, None)
    }

    pub fn read_limited(&self, root: &RootHandle, limit: usize) -> FeedResult<Vec<ChangeSet>> {
        self.read(root, None, Some(limit))
    }

    pub fn read_since(&self, root: &RootHandle, marker: ChangeSetId) -> FeedResult<Vec<ChangeSet>> {
        self.read(root, Some(marker), None)
    }

    pub fn read_since_limited(
        &self,
        root: &RootHandle,
        marker: ChangeSetId,
        limit: usize,
    ) -> FeedResult<Vec<ChangeSet>> {
        self.read(root, Some(marker), Some(limit))
    }

    /// Pointer snapshot of the root anchor
    pub fn root_state(&self, root: &RootHandle) -> FeedResult<RootState> {
        let txn = self.storage.begin_read()?;
        let roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        Ok(require_root(&roots, root.name())?.into())
    }

    pub fn newest_id(&self, root: &RootHandle) -> FeedResult<Option<ChangeSetId>> {
        Ok(self.root_state(root)?.newest)
    }

    /// Number of entries reachable from the root
    pub fn len(&self, root: &RootHandle) -> FeedResult<usize> {
        let txn = self.storage.begin_read()?;
        let roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        let records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
        let state = require_root(&roots, root.name())?;
        Ok(walk(&records, root.name(), state.newest, None, None)?.len())
    }

    pub fn is_empty(&self, root: &RootHandle) -> FeedResult<bool> {
        Ok(self.root_state(root)?.newest.is_none())
    }

    /// Highest id stored under the feed
    ///
    /// Equal to the newest entry's id unless writers committed out of id
    /// order, in which case it is the larger of the two.
    pub fn highest_id(&self, root: &RootHandle) -> FeedResult<Option<ChangeSetId>> {
        let txn = self.storage.begin_read()?;
        let roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        let records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
        require_root(&roots, root.name())?;

        let feed = root.name();
        let last = records
            .range((feed, 0u64)..=(feed, u64::MAX))
            .map_err(into_feed_error)?
            .next_back();
        match last {
            Some(entry) => {
                let (key, _) = entry.map_err(into_feed_error)?;
                Ok(Some(ChangeSetId::new(key.value().1)))
            }
            None => Ok(None),
        }
    }

    /// Walk the whole chain and report every structural violation found
    #[instrument(skip(self, root), fields(feed = %root.feed))]
    pub fn verify(&self, root: &RootHandle) -> FeedResult<ChainReport> {
        let txn = self.storage.begin_read()?;
        let roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
        let records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
        let state = require_root(&roots, root.name())?;
        let feed = root.name();

        let mut report = ChainReport {
            newest: state.newest.map(ChangeSetId::new),
            oldest: state.oldest.map(ChangeSetId::new),
            ..Default::default()
        };

        if state.newest.is_some() != state.oldest.is_some() {
            report.violations.push(format!(
                "root pointers disagree: newest {:?}, oldest {:?}",
                state.newest, state.oldest
            ));
        }

        let mut visited = HashSet::new();
        let mut last = None;
        let mut cursor = state.newest;
        while let Some(id) = cursor {
            if !visited.insert(id) {
                report.violations.push(format!("cycle through {}", id));
                break;
            }
            match load_record(&records, feed, id)? {
                Some(record) => {
                    last = Some(id);
                    cursor = record.previous;
                }
                None => {
                    report.violations.push(format!("dangling link to {}", id));
                    break;
                }
            }
        }
        report.entries = visited.len();

        if report.violations.is_empty() && last != state.oldest {
            report.violations.push(format!(
                "chain ends at {:?} but oldest is {:?}",
                last, state.oldest
            ));
        }

        for entry in records
            .range((feed, 0u64)..=(feed, u64::MAX))
            .map_err(into_feed_error)?
        {
            let (key, _) = entry.map_err(into_feed_error)?;
            let id = key.value().1;
            report.stored += 1;
            if !visited.contains(&id) {
                report.violations.push(format!("orphan record {}", id));
            }
        }

        debug!(
            entries = report.entries,
            violations = report.violations.len(),
            "Verified chain"
        );
        Ok(report)
    }

    /// Delete the root anchor and every record of a feed
    ///
    /// Returns the number of records removed.
    #[instrument(skip(self, root), fields(feed = %root.feed))]
    pub fn drop_feed(&self, root: &RootHandle) -> FeedResult<usize> {
        let feed = root.name();
        let txn = self.storage.begin_write()?;
        let removed = {
            let mut roots = txn.open_table(FEED_ROOTS).map_err(into_feed_error)?;
            let mut records = txn.open_table(CHANGE_SETS).map_err(into_feed_error)?;
            require_root(&roots, feed)?;

            let mut ids = Vec::new();
            for entry in records
                .range((feed, 0u64)..=(feed, u64::MAX))
                .map_err(into_feed_error)?
            {
                let (key, _) = entry.map_err(into_feed_error)?;
                ids.push(key.value().1);
            }
            for id in &ids {
                records.remove((feed, *id)).map_err(into_feed_error)?;
            }
            roots.remove(feed).map_err(into_feed_error)?;
            ids.len()
        };
        txn.commit().map_err(into_feed_error)?;

        info!(removed, "Dropped feed");
        Ok(removed)
    }
}

pub(super) fn load_root<T>(table: &T, feed: &str) -> FeedResult<Option<RootRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(feed).map_err(into_feed_error)? {
        Some(guard) => Ok(Some(RootRecord::decode(guard.value())?)),
        None => Ok(None),
    }
}

pub(super) fn require_root<T>(table: &T, feed: &str) -> FeedResult<RootRecord>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    load_root(table, feed)?.ok_or_else(|| FeedError::not_initialized(feed))
}

pub(super) fn load_record<T>(table: &T, feed: &str, id: u64) -> FeedResult<Option<ChangeSetRecord>>
where
    T: ReadableTable<(&'static str, u64), &'static [u8]>,
{
    match table.get((feed, id)).map_err(into_feed_error)? {
        Some(guard) => Ok(Some(ChangeSetRecord::decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Follow chain links from `start`
///
/// A walk longer than the table can hold means the links loop back on
/// themselves.
pub(super) fn walk<T>(
    table: &T,
    feed: &str,
    start: Option<u64>,
    since: Option<u64>,
    limit: Option<usize>,
) -> FeedResult<Vec<ChangeSetRecord>>
where
    T: ReadableTable<(&'static str, u64), &'static [u8]>,
{
    let bound = table.len().map_err(into_feed_error)?;
    let limit = limit.unwrap_or(usize::MAX);

    let mut chain = Vec::new();
    let mut steps = 0u64;
    let mut cursor = start;
    while let Some(id) = cursor {
        if chain.len() >= limit || since == Some(id) {
            break;
        }
        steps += 1;
        if steps > bound {
            return Err(FeedError::corrupted(feed, format!("cycle through {}", id)));
        }
        let record = load_record(table, feed, id)?
            .ok_or_else(|| FeedError::corrupted(feed, format!("dangling link to {}", id)))?;
        cursor = record.previous;
        chain.push(record);
    }
    Ok(chain)
}

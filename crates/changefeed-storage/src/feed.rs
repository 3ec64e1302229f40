//! Per-feed facade
//!
//! [`ChangeFeed`] ties one feed's chain log, sequencer, cache and pruner
//! together and is what the node and the mutation detector talk to.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use changefeed_core::{
    ChangeReader, ChangeSet, ChangeSetId, ChangeWriter, Clock, FeedError, FeedName, FeedResult,
    PruneOutcome,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::cache::{CacheLookup, ChangeSetCache};
use crate::chain_log::{ChainLog, ChainReport, Pruner, RootHandle, RootState};
use crate::retry::RetryPolicy;
use crate::sequencer::Sequencer;
use crate::tables::RedbStorage;

/// Settings of one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Name of the feed
    pub name: FeedName,
    /// Entries retained after pruning; also the cache capacity
    pub max_changes: usize,
    /// Interval between prune passes (milliseconds)
    pub prune_delay_ms: u64,
    /// How far past `max_changes` the feed may grow before a pass prunes
    pub prune_when_exceeded_by: usize,
    /// Retry behaviour of the append path
    pub retry: RetryPolicy,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            name: FeedName::default(),
            max_changes: 100,
            prune_delay_ms: 10_000,
            prune_when_exceeded_by: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl FeedSettings {
    /// Default settings for the named feed
    pub fn named(name: FeedName) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn with_max_changes(mut self, max_changes: usize) -> Self {
        self.max_changes = max_changes;
        self
    }

    pub fn with_prune_delay(mut self, delay: Duration) -> Self {
        self.prune_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_prune_when_exceeded_by(mut self, hysteresis: usize) -> Self {
        self.prune_when_exceeded_by = hysteresis;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn prune_delay(&self) -> Duration {
        Duration::from_millis(self.prune_delay_ms)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.max_changes == 0 {
            return Err(FeedError::InvalidSettings(format!(
                "{}: max_changes must be at least 1",
                self.name
            )));
        }
        if self.prune_delay_ms == 0 {
            return Err(FeedError::InvalidSettings(format!(
                "{}: prune_delay_ms must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Running counters of a feed
#[derive(Debug, Default)]
pub struct FeedStats {
    appended: AtomicU64,
    ignored_empty: AtomicU64,
    transient_retries: AtomicU64,
    append_failures: AtomicU64,
    prune_passes: AtomicU64,
    entries_pruned: AtomicU64,
    prune_skipped: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time copy of [`FeedStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatsSnapshot {
    pub appended: u64,
    pub ignored_empty: u64,
    pub transient_retries: u64,
    pub append_failures: u64,
    pub prune_passes: u64,
    pub entries_pruned: u64,
    pub prune_skipped: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl FeedStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            appended: self.appended.load(Ordering::Relaxed),
            ignored_empty: self.ignored_empty.load(Ordering::Relaxed),
            transient_retries: self.transient_retries.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            prune_passes: self.prune_passes.load(Ordering::Relaxed),
            entries_pruned: self.entries_pruned.load(Ordering::Relaxed),
            prune_skipped: self.prune_skipped.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// One feed: chain log, id assignment, cache and retention
pub struct ChangeFeed {
    settings: FeedSettings,
    log: ChainLog,
    root: RootHandle,
    sequencer: Sequencer,
    cache: ChangeSetCache,
    pruner: Pruner,
    clock: Arc<dyn Clock>,
    /// Keeps cache pushes in commit order
    write_lock: Mutex<()>,
    stats: FeedStats,
}

impl ChangeFeed {
    /// Open a feed, creating its root anchor on first use
    ///
    /// Recovers the id counter and warms the cache with the newest
    /// `max_changes` entries.
    #[instrument(skip_all, fields(feed = %settings.name))]
    pub fn open(
        storage: Arc<RedbStorage>,
        settings: FeedSettings,
        clock: Arc<dyn Clock>,
    ) -> FeedResult<Self> {
        settings.validate()?;

        let log = ChainLog::new(storage);
        let root = log.ensure_root(&settings.name)?;

        let sequencer = Sequencer::new(log.clone(), root.clone());
        sequencer.recover()?;

        let cache = ChangeSetCache::new(settings.max_changes);
        cache.populate(log.read_limited(&root, settings.max_changes)?);

        let pruner = Pruner::new(log.clone(), root.clone());

        info!(cached = cache.len(), "Opened feed");

        Ok(Self {
            settings,
            log,
            root,
            sequencer,
            cache,
            pruner,
            clock,
            write_lock: Mutex::new(()),
            stats: FeedStats::default(),
        })
    }

    pub fn name(&self) -> &FeedName {
        &self.settings.name
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn root(&self) -> &RootHandle {
        &self.root
    }

    pub fn log(&self) -> &ChainLog {
        &self.log
    }

    pub fn cache(&self) -> &ChangeSetCache {
        &self.cache
    }

    pub fn pruner(&self) -> &Pruner {
        &self.pruner
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn root_state(&self) -> FeedResult<RootState> {
        self.log.root_state(&self.root)
    }

    pub fn verify(&self) -> FeedResult<ChainReport> {
        self.log.verify(&self.root)
    }

    /// Record the changes of one transaction
    ///
    /// Empty input is ignored. The change set reaches the cache only after
    /// its append committed.
    pub fn record_changes(&self, changes: Vec<String>) -> FeedResult<Option<ChangeSet>> {
        if changes.is_empty() {
            FeedStats::bump(&self.stats.ignored_empty);
            debug!(feed = %self.settings.name, "Ignoring empty change list");
            return Ok(None);
        }

        let id = self.sequencer.next()?;
        let change_set = ChangeSet::new(id, self.clock.now_millis(), changes);
        self.commit(change_set, |change_set| self.log.append(&self.root, change_set))
            .map(Some)
    }

    /// Append under the write lock with the feed's retry policy, then cache
    fn commit(
        &self,
        change_set: ChangeSet,
        mut append: impl FnMut(&ChangeSet) -> FeedResult<()>,
    ) -> FeedResult<ChangeSet> {
        let _write = self.write_lock.lock();
        let appended = self.settings.retry.run(
            "append",
            || append(&change_set),
            |_, _| FeedStats::bump(&self.stats.transient_retries),
        );

        match appended {
            Ok(()) => {
                FeedStats::bump(&self.stats.appended);
                self.cache.push(change_set.clone());
                Ok(change_set)
            }
            Err(e) => {
                FeedStats::bump(&self.stats.append_failures);
                error!(
                    feed = %self.settings.name,
                    id = %change_set.id(),
                    error = %e,
                    "Failed to record changes"
                );
                Err(e)
            }
        }
    }

    /// Run one prune pass with the feed's retention settings
    pub fn prune(&self) -> FeedResult<PruneOutcome> {
        self.prune_changes(self.settings.max_changes, self.settings.prune_when_exceeded_by)
    }

    /// Delete the feed's root and every stored change set
    ///
    /// Returns the number of change sets removed. Later calls on this
    /// handle fail with `NotInitialized`.
    pub fn drop_log(&self) -> FeedResult<usize> {
        let _write = self.write_lock.lock();
        let removed = self.log.drop_feed(&self.root)?;
        self.cache.clear();
        Ok(removed)
    }
}

impl ChangeReader for ChangeFeed {
    fn changes(
        &self,
        since: Option<ChangeSetId>,
        limit: Option<usize>,
    ) -> FeedResult<Vec<ChangeSet>> {
        match self.cache.lookup(since, limit) {
            CacheLookup::Hit(entries) => {
                FeedStats::bump(&self.stats.cache_hits);
                Ok(entries)
            }
            CacheLookup::Miss => {
                FeedStats::bump(&self.stats.cache_misses);
                self.log.read(&self.root, since, limit)
            }
        }
    }
}

impl ChangeWriter for ChangeFeed {
    fn record_changes(&self, changes: Vec<String>) -> FeedResult<Option<ChangeSet>> {
        ChangeFeed::record_changes(self, changes)
    }

    /// Prune the log, then drop pruned entries from the cache
    ///
    /// Appends wait for the pass, so no entry older than the new tail can be
    /// pushed into the cache after it was trimmed.
    fn prune_changes(&self, keep: usize, hysteresis: usize) -> FeedResult<PruneOutcome> {
        let _write = self.write_lock.lock();
        let outcome = self.pruner.run_once(keep, hysteresis)?;
        match outcome {
            PruneOutcome::Skipped => FeedStats::bump(&self.stats.prune_skipped),
            PruneOutcome::Pruned { removed, oldest } => {
                FeedStats::bump(&self.stats.prune_passes);
                self.stats
                    .entries_pruned
                    .fetch_add(removed as u64, Ordering::Relaxed);
                self.cache.trim_after(oldest);
            }
            _ => FeedStats::bump(&self.stats.prune_passes),
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("settings", &self.settings)
            .field("root", &self.root)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changefeed_core::ManualClock;

    fn open_feed(max_changes: usize) -> ChangeFeed {
        let storage = Arc::new(RedbStorage::in_memory().unwrap());
        let settings = FeedSettings::named(FeedName::new("orders").unwrap())
            .with_max_changes(max_changes)
            .with_prune_when_exceeded_by(0);
        ChangeFeed::open(storage, settings, Arc::new(ManualClock::new(1_000))).unwrap()
    }

    fn ids(entries: &[ChangeSet]) -> Vec<u64> {
        entries.iter().map(|c| c.id().value()).collect()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.name.as_str(), FeedName::DEFAULT);
        assert_eq!(settings.max_changes, 100);
        assert_eq!(settings.prune_delay(), Duration::from_secs(10));
        assert_eq!(settings.prune_when_exceeded_by, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let zero_keep = FeedSettings::default().with_max_changes(0);
        assert!(matches!(zero_keep.validate(), Err(FeedError::InvalidSettings(_))));

        let zero_delay = FeedSettings::default().with_prune_delay(Duration::ZERO);
        assert!(zero_delay.validate().is_err());
    }

    #[test]
    fn test_empty_changes_ignored() {
        let feed = open_feed(10);
        assert!(feed.record_changes(vec![]).unwrap().is_none());
        assert!(feed.get_all_changes().unwrap().is_empty());
        assert_eq!(feed.stats().ignored_empty, 1);
    }

    #[test]
    fn test_record_uses_clock_and_sequence() {
        let feed = open_feed(10);
        let first = feed.record_changes(vec!["a".into()]).unwrap().unwrap();
        let second = feed.record_changes(vec!["b".into(), "c".into()]).unwrap().unwrap();

        assert_eq!(first.id(), ChangeSetId::FIRST);
        assert_eq!(second.id(), ChangeSetId::new(2));
        assert_eq!(second.timestamp_millis(), 1_000);
        assert_eq!(second.changes(), ["b", "c"]);
        assert_eq!(ids(&feed.get_all_changes().unwrap()), [2, 1]);
    }

    #[test]
    fn test_reads_fall_back_to_log() {
        let feed = open_feed(2);
        for i in 0..3 {
            feed.record_changes(vec![format!("c{}", i)]).unwrap();
        }

        // The cache holds 3 and 2 only
        assert_eq!(ids(&feed.get_all_changes().unwrap()), [3, 2, 1]);
        assert_eq!(ids(&feed.get_number_of_changes(2).unwrap()), [3, 2]);
        assert_eq!(ids(&feed.get_changes_since(ChangeSetId::new(2)).unwrap()), [3]);

        let stats = feed.stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 2);
    }

    #[test]
    fn test_prune_uses_settings() {
        let feed = open_feed(2);
        for i in 0..5 {
            feed.record_changes(vec![format!("c{}", i)]).unwrap();
        }

        let outcome = feed.prune().unwrap();
        assert_eq!(outcome.removed(), 3);
        assert_eq!(ids(&feed.get_all_changes().unwrap()), [5, 4]);

        let stats = feed.stats();
        assert_eq!(stats.prune_passes, 1);
        assert_eq!(stats.entries_pruned, 3);
    }

    #[test]
    fn test_drop_log_removes_everything() {
        let feed = open_feed(10);
        for i in 0..3 {
            feed.record_changes(vec![format!("c{}", i)]).unwrap();
        }

        assert_eq!(feed.drop_log().unwrap(), 3);
        assert!(feed.cache().is_empty());
        assert!(matches!(
            feed.record_changes(vec!["late".into()]),
            Err(FeedError::NotInitialized(_))
        ));
        assert!(matches!(
            feed.log().root(feed.name()),
            Err(FeedError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_prune_below_capacity_trims_cache() {
        let feed = open_feed(3);
        for name in ["a", "b", "c", "d"] {
            feed.record_changes(vec![name.into()]).unwrap();
        }

        let outcome = feed.prune_changes(1, 0).unwrap();
        assert_eq!(
            outcome,
            PruneOutcome::Pruned {
                removed: 3,
                oldest: ChangeSetId::new(4)
            }
        );
        assert_eq!(ids(&feed.log().read_all(feed.root()).unwrap()), [4]);
        assert_eq!(ids(&feed.get_number_of_changes(3).unwrap()), [4]);
        assert_eq!(ids(&feed.get_changes_since(ChangeSetId::new(1)).unwrap()), [4]);
        assert_eq!(feed.cache().len(), 1);

        // New entries refill the cache on top of the retained tail
        feed.record_changes(vec!["e".into()]).unwrap();
        assert_eq!(ids(&feed.get_all_changes().unwrap()), [5, 4]);
    }

    #[test]
    fn test_transient_append_failure_is_retried() {
        let feed = open_feed(10);
        let change_set = ChangeSet::new(feed.sequencer.next().unwrap(), 1_000, vec!["a".into()]);

        let mut attempts = 0;
        let committed = feed
            .commit(change_set, |change_set| {
                attempts += 1;
                if attempts == 1 {
                    Err(FeedError::TransientStoreFailure("write lock busy".into()))
                } else {
                    feed.log().append(feed.root(), change_set)
                }
            })
            .unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(ids(&feed.get_all_changes().unwrap()), [committed.id().value()]);

        let stats = feed.stats();
        assert_eq!(stats.transient_retries, 1);
        assert_eq!(stats.appended, 1);
        assert_eq!(stats.append_failures, 0);
    }

    #[test]
    fn test_append_failure_surfaces_after_one_retry() {
        let feed = open_feed(10);
        let change_set = ChangeSet::new(feed.sequencer.next().unwrap(), 1_000, vec!["a".into()]);

        let mut attempts = 0;
        let result = feed.commit(change_set, |_| {
            attempts += 1;
            Err(FeedError::TransientStoreFailure("write lock busy".into()))
        });

        assert!(matches!(result, Err(FeedError::TransientStoreFailure(_))));
        assert_eq!(attempts, 2);
        assert!(feed.cache().is_empty());
        assert!(feed.log().read_all(feed.root()).unwrap().is_empty());

        let stats = feed.stats();
        assert_eq!(stats.transient_retries, 1);
        assert_eq!(stats.append_failures, 1);
        assert_eq!(stats.appended, 0);
    }
}

//! Bounded in-memory mirror of a feed's newest entries
//!
//! Entries are kept newest first. A push inserts at the head and trims the
//! tail under the same write lock, so the cache never holds more than its
//! capacity, even momentarily.

use std::collections::VecDeque;
use std::sync::Arc;

use changefeed_core::{ChangeSet, ChangeSetId};
use parking_lot::RwLock;

/// Whether the cache could answer a query on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The cached entries are the complete answer
    Hit(Vec<ChangeSet>),
    /// The answer may reach past the cached window; ask the log
    Miss,
}

/// Newest-first cache of change sets
#[derive(Debug)]
pub struct ChangeSetCache {
    capacity: usize,
    entries: RwLock<VecDeque<Arc<ChangeSet>>>,
}

impl ChangeSetCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Replace the contents with `entries` (newest first), keeping at most
    /// `capacity` of them
    pub fn populate(&self, entries: Vec<ChangeSet>) {
        let mut cached = self.entries.write();
        cached.clear();
        cached.extend(entries.into_iter().take(self.capacity).map(Arc::new));
    }

    /// Insert a freshly committed change set at the head
    pub fn push(&self, change_set: ChangeSet) {
        if self.capacity == 0 {
            return;
        }
        let mut cached = self.entries.write();
        cached.push_front(Arc::new(change_set));
        cached.truncate(self.capacity);
    }

    /// Drop every entry older than `oldest`, the log's tail after a prune
    ///
    /// A cache that does not hold `oldest` already lies entirely within the
    /// retained part of the log and is left as is.
    pub fn trim_after(&self, oldest: ChangeSetId) {
        let mut cached = self.entries.write();
        if let Some(position) = cached.iter().position(|entry| entry.id() == oldest) {
            cached.truncate(position + 1);
        }
    }

    /// Entries newer than `marker`, at most `limit` of them
    ///
    /// Empty when the marker is newer than everything cached.
    pub fn get_since(&self, marker: Option<ChangeSetId>, limit: usize) -> Vec<ChangeSet> {
        match self.lookup(marker, Some(limit)) {
            CacheLookup::Hit(entries) => entries,
            CacheLookup::Miss => {
                // Ran off the tail: return what the window holds unless the
                // marker is ahead of it.
                let cached = self.entries.read();
                match (marker, cached.front()) {
                    (Some(marker), Some(head)) if marker > head.id() => Vec::new(),
                    _ => cached.iter().take(limit).map(|cs| (**cs).clone()).collect(),
                }
            }
        }
    }

    /// Answer a newest-first query if the cached window is enough
    ///
    /// A hit is returned when the scan reaches the marker or the limit, or
    /// when the cache is below capacity and therefore holds the whole
    /// retained feed. A marker newer than the head, or a scan that runs off
    /// the tail of a full cache, is a miss.
    pub fn lookup(&self, marker: Option<ChangeSetId>, limit: Option<usize>) -> CacheLookup {
        let limit = limit.unwrap_or(usize::MAX);
        let cached = self.entries.read();

        if let (Some(marker), Some(head)) = (marker, cached.front()) {
            if marker > head.id() {
                return CacheLookup::Miss;
            }
        }

        let mut found = Vec::new();
        for entry in cached.iter() {
            if found.len() >= limit || Some(entry.id()) == marker {
                return CacheLookup::Hit(found);
            }
            found.push((**entry).clone());
        }

        if found.len() >= limit || cached.len() < self.capacity {
            CacheLookup::Hit(found)
        } else {
            CacheLookup::Miss
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(id: u64) -> ChangeSet {
        ChangeSet::new(ChangeSetId::new(id), 0, vec![format!("c{}", id)])
    }

    fn ids(entries: &[ChangeSet]) -> Vec<u64> {
        entries.iter().map(|c| c.id().value()).collect()
    }

    fn cache_with(capacity: usize, newest: u64) -> ChangeSetCache {
        let cache = ChangeSetCache::new(capacity);
        for id in 1..=newest {
            cache.push(cs(id));
        }
        cache
    }

    #[test]
    fn test_push_trims_tail() {
        let cache = cache_with(3, 5);
        assert_eq!(cache.len(), 3);
        assert_eq!(ids(&cache.get_since(None, 10)), [5, 4, 3]);
    }

    #[test]
    fn test_populate_keeps_capacity() {
        let cache = ChangeSetCache::new(2);
        cache.populate(vec![cs(9), cs(8), cs(7)]);
        assert_eq!(ids(&cache.get_since(None, 10)), [9, 8]);
    }

    #[test]
    fn test_get_since_stops_at_marker() {
        let cache = cache_with(3, 4);
        assert_eq!(ids(&cache.get_since(Some(ChangeSetId::new(2)), 10)), [4, 3]);
        assert_eq!(ids(&cache.get_since(Some(ChangeSetId::new(3)), 1)), [4]);
    }

    #[test]
    fn test_marker_newer_than_head_is_empty() {
        let cache = cache_with(3, 4);
        assert!(cache.get_since(Some(ChangeSetId::new(10)), 10).is_empty());
        assert_eq!(cache.lookup(Some(ChangeSetId::new(10)), None), CacheLookup::Miss);
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        // Full cache holding 5, 4, 3
        let full = cache_with(3, 5);
        assert!(matches!(full.lookup(Some(ChangeSetId::new(3)), None), CacheLookup::Hit(_)));
        assert!(matches!(full.lookup(None, Some(3)), CacheLookup::Hit(_)));
        assert_eq!(full.lookup(None, None), CacheLookup::Miss);
        assert_eq!(full.lookup(Some(ChangeSetId::new(1)), None), CacheLookup::Miss);

        // Below capacity the cache is the whole feed
        let partial = cache_with(10, 3);
        match partial.lookup(None, None) {
            CacheLookup::Hit(entries) => assert_eq!(ids(&entries), [3, 2, 1]),
            CacheLookup::Miss => panic!("expected hit"),
        }
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let cache = cache_with(0, 3);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(None, Some(1)), CacheLookup::Miss);
    }

    #[test]
    fn test_trim_after_drops_pruned_tail() {
        let cache = cache_with(3, 4);
        cache.trim_after(ChangeSetId::new(4));
        assert_eq!(ids(&cache.get_since(None, 10)), [4]);

        // The trimmed cache is below capacity, so it answers alone
        assert_eq!(cache.lookup(None, Some(3)), CacheLookup::Hit(vec![cs(4)]));
    }

    #[test]
    fn test_trim_after_unknown_tail_keeps_everything() {
        let cache = cache_with(3, 6);
        cache.trim_after(ChangeSetId::new(2));
        assert_eq!(ids(&cache.get_since(None, 10)), [6, 5, 4]);
    }

    #[test]
    fn test_clear() {
        let cache = cache_with(3, 3);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 3);
    }
}

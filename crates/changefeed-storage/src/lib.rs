//! # Changefeed Storage
//!
//! Persistent storage for changefeed feeds, built on redb.
//!
//! Every feed is a chain of change sets hanging off a root anchor. Appends,
//! root creation and pruning each run in a single redb write transaction,
//! which doubles as the lock on the root; reads walk a snapshot.
//!
//! ## Components
//!
//! - **RedbStorage**: Database handle and table definitions
//! - **ChainLog**: Root-anchored, append-only chain with newest-first reads
//! - **Sequencer**: Per-feed id assignment with lazy recovery from the log
//! - **ChangeSetCache**: Bounded newest-first mirror of the chain head
//! - **Pruner**: Hysteresis retention with a single-pass guard
//! - **ChangeFeed**: The per-feed facade implementing the core traits
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use changefeed_core::{ChangeReader, FeedName, SystemClock};
//! use changefeed_storage::{ChangeFeed, FeedSettings, RedbStorage};
//!
//! let storage = Arc::new(RedbStorage::in_memory()?);
//! let settings = FeedSettings::named(FeedName::new("orders")?).with_max_changes(50);
//! let feed = ChangeFeed::open(storage, settings, Arc::new(SystemClock))?;
//!
//! feed.record_changes(vec!["created node 12".into()])?;
//! let latest = feed.get_number_of_changes(10)?;
//! ```

pub mod cache;
pub mod chain_log;
pub mod error;
pub mod feed;
pub mod retry;
pub mod sequencer;
pub mod tables;

// Re-exports
pub use cache::{CacheLookup, ChangeSetCache};
pub use chain_log::{ChainLog, ChainReport, Pruner, PrunerState, RootHandle, RootState};
pub use error::StorageError;
pub use feed::{ChangeFeed, FeedSettings, FeedStats, FeedStatsSnapshot};
pub use retry::RetryPolicy;
pub use sequencer::Sequencer;
pub use tables::{RedbStorage, RedbStorageConfig};

// Re-export the traits implemented here for convenience
pub use changefeed_core::{ChangeReader, ChangeWriter};

//! # Changefeed Node
//!
//! Coordinator for a set of feeds sharing one database.
//!
//! The node opens every configured feed, runs one background prune task per
//! feed while started, and exposes the read and write operations a
//! transport layer (REST, RPC) needs, addressed by feed name.
//!
//! ## Example
//!
//! ```rust,ignore
//! use changefeed_node::{ChangeFeedNode, NodeConfig};
//!
//! let node = ChangeFeedNode::new(NodeConfig::with_data_dir("./data")).await?;
//! node.start().await?;
//!
//! node.record_changes("changefeed", vec!["created node 7".into()])?;
//! let latest = node.get_number_of_changes("changefeed", 10)?;
//!
//! node.stop().await?;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod prune_task;

pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use prune_task::PruneTask;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use changefeed_core::{
    ChangeReader, ChangeSet, ChangeSetId, Clock, FeedError, FeedName, PruneOutcome, SystemClock,
};
use changefeed_storage::{
    ChainLog, ChainReport, ChangeFeed, FeedSettings, FeedStatsSnapshot, RedbStorage,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// A set of feeds plus their prune scheduling
pub struct ChangeFeedNode {
    /// Node configuration
    config: NodeConfig,
    /// Database shared by every feed
    storage: Arc<RedbStorage>,
    /// Timestamp source for new change sets
    clock: Arc<dyn Clock>,
    /// Open feeds by name
    feeds: DashMap<String, Arc<ChangeFeed>>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Background task handles
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
    /// Whether the node has been started
    started: AtomicBool,
}

impl ChangeFeedNode {
    /// Create a new node
    ///
    /// Opens the database and every configured feed. Call
    /// [`start`](Self::start) to begin scheduled pruning.
    pub async fn new(config: NodeConfig) -> NodeResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a node stamping change sets with `clock`
    #[instrument(skip(config, clock), fields(data_dir = %config.data_dir.display()))]
    pub async fn with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> NodeResult<Self> {
        config.validate()?;

        // Ensure data directory exists
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let storage_config = config.storage_config();
        let storage = tokio::task::spawn_blocking(move || RedbStorage::open(storage_config))
            .await
            .map_err(|e| NodeError::Io(e.to_string()))??;
        let storage = Arc::new(storage);

        let feeds = DashMap::new();
        for settings in config.feed_settings() {
            let name = settings.name.to_string();
            let feed = ChangeFeed::open(Arc::clone(&storage), settings, Arc::clone(&clock))?;
            feeds.insert(name, Arc::new(feed));
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(feeds = feeds.len(), "Node created");

        Ok(Self {
            config,
            storage,
            clock,
            feeds,
            shutdown_tx,
            background_tasks: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Start one prune task per open feed
    #[instrument(skip(self))]
    pub async fn start(&self) -> NodeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        let feeds: Vec<Arc<ChangeFeed>> = self.feeds.iter().map(|e| Arc::clone(e.value())).collect();
        let mut tasks = self.background_tasks.write().await;
        for feed in feeds {
            tasks.push(PruneTask::spawn(feed, self.shutdown_tx.subscribe()));
        }

        info!(tasks = tasks.len(), "Node started");
        Ok(())
    }

    /// Stop the prune tasks and wait for them to finish
    #[instrument(skip(self))]
    pub async fn stop(&self) -> NodeResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already stopped
        }

        // Signal shutdown
        let _ = self.shutdown_tx.send(());

        // Wait for background tasks
        let mut tasks = self.background_tasks.write().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        info!("Node stopped");
        Ok(())
    }

    /// Check if the node is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<RedbStorage> {
        &self.storage
    }

    /// Open another feed, or return it if already open
    ///
    /// When the node is running the new feed gets its own prune task.
    pub async fn open_feed(&self, settings: FeedSettings) -> NodeResult<Arc<ChangeFeed>> {
        let name = settings.name.to_string();
        if let Some(existing) = self.feeds.get(&name) {
            return Ok(Arc::clone(existing.value()));
        }

        let feed = Arc::new(ChangeFeed::open(
            Arc::clone(&self.storage),
            settings,
            Arc::clone(&self.clock),
        )?);

        let inserted = match self.feeds.entry(name) {
            Entry::Occupied(entry) => return Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => Arc::clone(entry.insert(feed).value()),
        };

        if self.is_started() {
            let handle = PruneTask::spawn(Arc::clone(&inserted), self.shutdown_tx.subscribe());
            self.background_tasks.write().await.push(handle);
        }

        info!(feed = %inserted.name(), "Feed opened");
        Ok(inserted)
    }

    /// Look up an open feed
    pub fn feed(&self, name: &str) -> NodeResult<Arc<ChangeFeed>> {
        self.feeds
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| NodeError::FeedNotFound(name.to_string()))
    }

    /// Look up a feed, opening it with default settings if it exists on disk
    ///
    /// Never creates a root: a name with no stored root is `FeedNotFound`.
    pub async fn existing_feed(&self, name: &str) -> NodeResult<Arc<ChangeFeed>> {
        if let Ok(feed) = self.feed(name) {
            return Ok(feed);
        }

        let feed_name = FeedName::new(name)?;
        match ChainLog::new(Arc::clone(&self.storage)).root(&feed_name) {
            Ok(_) => self.open_feed(FeedSettings::named(feed_name)).await,
            Err(FeedError::NotInitialized(_)) => Err(NodeError::FeedNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a feed and everything stored under it
    ///
    /// A running prune task for the feed stops on its next tick.
    #[instrument(skip(self))]
    pub async fn drop_feed(&self, name: &str) -> NodeResult<usize> {
        let feed = self.existing_feed(name).await?;
        self.feeds.remove(name);
        let removed = feed.drop_log()?;

        info!(feed = name, removed, "Feed dropped");
        Ok(removed)
    }

    /// Names of every open feed, sorted
    pub fn feed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.feeds.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn get_all_changes(&self, feed: &str) -> NodeResult<Vec<ChangeSet>> {
        Ok(self.feed(feed)?.get_all_changes()?)
    }

    pub fn get_number_of_changes(&self, feed: &str, limit: usize) -> NodeResult<Vec<ChangeSet>> {
        Ok(self.feed(feed)?.get_number_of_changes(limit)?)
    }

    pub fn get_changes_since(&self, feed: &str, marker: ChangeSetId) -> NodeResult<Vec<ChangeSet>> {
        Ok(self.feed(feed)?.get_changes_since(marker)?)
    }

    pub fn get_number_of_changes_since(
        &self,
        feed: &str,
        marker: ChangeSetId,
        limit: usize,
    ) -> NodeResult<Vec<ChangeSet>> {
        Ok(self.feed(feed)?.get_number_of_changes_since(marker, limit)?)
    }

    /// Record the changes of one transaction into `feed`
    pub fn record_changes(&self, feed: &str, changes: Vec<String>) -> NodeResult<Option<ChangeSet>> {
        Ok(self.feed(feed)?.record_changes(changes)?)
    }

    /// Run a prune pass now, outside the schedule
    pub fn prune(&self, feed: &str) -> NodeResult<PruneOutcome> {
        Ok(self.feed(feed)?.prune()?)
    }

    pub fn stats(&self, feed: &str) -> NodeResult<FeedStatsSnapshot> {
        Ok(self.feed(feed)?.stats())
    }

    pub fn verify(&self, feed: &str) -> NodeResult<ChainReport> {
        Ok(self.feed(feed)?.verify()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changefeed_core::FeedName;
    use tempfile::TempDir;

    async fn create_test_node() -> (ChangeFeedNode, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = NodeConfig::with_data_dir(temp_dir.path());
        let node = ChangeFeedNode::new(config).await.unwrap();
        (node, temp_dir)
    }

    #[tokio::test]
    async fn test_node_creation() {
        let (node, _temp) = create_test_node().await;

        assert!(!node.is_started());
        assert_eq!(node.feed_names(), [FeedName::DEFAULT]);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (node, _temp) = create_test_node().await;

        // Start
        node.start().await.unwrap();
        assert!(node.is_started());

        // Can't start twice
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

        // Stop
        node.stop().await.unwrap();
        assert!(!node.is_started());
    }

    #[tokio::test]
    async fn test_unknown_feed() {
        let (node, _temp) = create_test_node().await;
        assert!(matches!(
            node.get_all_changes("missing"),
            Err(NodeError::FeedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_feed_is_idempotent() {
        let (node, _temp) = create_test_node().await;
        let settings = FeedSettings::named(FeedName::new("orders").unwrap());

        let first = node.open_feed(settings.clone()).await.unwrap();
        let second = node.open_feed(settings).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(node.feed_names(), [FeedName::DEFAULT, "orders"]);
    }

    #[tokio::test]
    async fn test_existing_feed_never_creates_root() {
        let (node, _temp) = create_test_node().await;

        assert!(matches!(
            node.existing_feed("typo").await,
            Err(NodeError::FeedNotFound(_))
        ));
        let log = ChainLog::new(Arc::clone(node.storage()));
        assert!(matches!(
            log.root(&FeedName::new("typo").unwrap()),
            Err(FeedError::NotInitialized(_))
        ));
        assert!(matches!(
            node.existing_feed("").await,
            Err(NodeError::Feed(FeedError::InvalidFeedName(_)))
        ));
    }

    #[tokio::test]
    async fn test_drop_feed() {
        let (node, _temp) = create_test_node().await;
        let settings = FeedSettings::named(FeedName::new("orders").unwrap());
        node.open_feed(settings).await.unwrap();
        node.record_changes("orders", vec!["a".into()]).unwrap();
        node.record_changes("orders", vec!["b".into()]).unwrap();

        assert_eq!(node.drop_feed("orders").await.unwrap(), 2);
        assert_eq!(node.feed_names(), [FeedName::DEFAULT]);
        assert!(matches!(
            node.existing_feed("orders").await,
            Err(NodeError::FeedNotFound(_))
        ));
        assert!(matches!(
            node.drop_feed("orders").await,
            Err(NodeError::FeedNotFound(_))
        ));
    }
}

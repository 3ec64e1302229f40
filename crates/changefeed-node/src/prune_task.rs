//! Background prune task
//!
//! One task per feed runs a prune pass every `prune_delay`, starting one
//! period after spawn. Passes run on the blocking pool since the chain log
//! does synchronous I/O. A failed pass is logged and retried on the next
//! tick; a feed whose root was dropped ends the task.

use std::sync::Arc;
use std::time::Duration;

use changefeed_core::{FeedError, PruneOutcome};
use changefeed_storage::ChangeFeed;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Periodic pruning of one feed
pub struct PruneTask {
    feed: Arc<ChangeFeed>,
    interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl PruneTask {
    pub fn new(feed: Arc<ChangeFeed>, shutdown_rx: broadcast::Receiver<()>) -> Self {
        let interval = feed.settings().prune_delay();
        Self {
            feed,
            interval,
            shutdown_rx,
        }
    }

    /// Spawn the prune task as a background task
    pub fn spawn(feed: Arc<ChangeFeed>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let task = Self::new(feed, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    /// Run the prune loop until shutdown is signalled
    async fn run(mut self) {
        info!(
            feed = %self.feed.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Prune task started"
        );

        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(feed = %self.feed.name(), "Prune task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if !self.prune_once().await {
                        info!(feed = %self.feed.name(), "Feed dropped, prune task stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Run one pass; `false` once the feed no longer exists
    async fn prune_once(&self) -> bool {
        let feed = Arc::clone(&self.feed);
        match tokio::task::spawn_blocking(move || feed.prune()).await {
            Ok(Ok(PruneOutcome::Pruned { removed, oldest })) => {
                debug!(feed = %self.feed.name(), removed, oldest = %oldest, "Scheduled prune removed entries");
            }
            Ok(Ok(outcome)) => {
                debug!(feed = %self.feed.name(), outcome = %outcome, "Scheduled prune pass");
            }
            Ok(Err(FeedError::NotInitialized(_))) => return false,
            Ok(Err(e)) => {
                warn!(feed = %self.feed.name(), error = %e, "Scheduled prune failed");
            }
            Err(e) => {
                error!(feed = %self.feed.name(), error = %e, "Prune pass panicked");
            }
        }
        true
    }
}

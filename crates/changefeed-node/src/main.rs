use std::sync::Arc;

use anyhow::Context;
use changefeed_core::{ChangeReader, ChangeSetId, FeedName};
use changefeed_logging::FeedSubscriberBuilder;
use changefeed_node::cli::{Cli, Command};
use changefeed_node::{ChangeFeedNode, NodeConfig, NodeError};
use changefeed_storage::{ChangeFeed, FeedSettings};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let mut logging = config.logging.clone();
    if let Some(level) = cli.log_level {
        logging.default_level = level;
    }
    let _log_guard = FeedSubscriberBuilder::new().with_config(logging).init();

    let node = ChangeFeedNode::new(config)
        .await
        .context("opening changefeed node")?;

    match cli.command {
        Command::Serve => {
            node.start().await?;
            info!(feeds = ?node.feed_names(), "Serving; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            node.stop().await?;
        }

        Command::Record { feed, changes } => {
            let feed = open_or_create(&node, &feed).await?;
            match feed.record_changes(changes)? {
                Some(change_set) => println!("{}", serde_json::to_string(&change_set)?),
                None => println!("null"),
            }
        }

        Command::List { feed, since, limit } => {
            let feed = node.existing_feed(&feed).await?;
            let entries = feed.changes(since.map(ChangeSetId::new), limit)?;
            for change_set in entries {
                println!("{}", serde_json::to_string(&change_set)?);
            }
        }

        Command::Prune { feed } => {
            let feed = node.existing_feed(&feed).await?;
            let outcome = feed.prune()?;
            println!("{}", serde_json::to_string(&outcome)?);
        }

        Command::Verify { feed } => {
            let feed = node.existing_feed(&feed).await?;
            let report = feed.verify()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_intact() {
                anyhow::bail!(
                    "feed {} has {} violation(s)",
                    feed.name(),
                    report.violations.len()
                );
            }
        }

        Command::Stats { feed } => {
            let feed = node.existing_feed(&feed).await?;
            let summary = serde_json::json!({
                "feed": feed.name(),
                "root": feed.root_state()?,
                "cached": feed.cache().len(),
                "stats": feed.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Drop { feed } => {
            let removed = node.drop_feed(&feed).await?;
            println!("{}", serde_json::json!({ "feed": feed, "removed": removed }));
        }
    }

    Ok(())
}

/// The named feed, created with default settings if it does not exist
async fn open_or_create(node: &ChangeFeedNode, name: &str) -> anyhow::Result<Arc<ChangeFeed>> {
    match node.feed(name) {
        Ok(feed) => Ok(feed),
        Err(NodeError::FeedNotFound(_)) => {
            let settings = FeedSettings::named(FeedName::new(name)?);
            Ok(node.open_feed(settings).await?)
        }
        Err(e) => Err(e.into()),
    }
}

//! Configuration for the node coordinator
//!
//! Loaded from TOML:
//!
//! ```toml
//! data_dir = "/var/lib/changefeed"
//!
//! [[feeds]]
//! name = "orders"
//! max_changes = 500
//! prune_delay_ms = 30000
//! prune_when_exceeded_by = 50
//!
//! [logging]
//! default_level = "info"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use changefeed_logging::LogConfig;
use changefeed_storage::{FeedSettings, RedbStorageConfig};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Configuration for a ChangeFeedNode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base directory for all node data
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub db_file: String,
    /// Feeds opened at startup; the default feed when empty
    pub feeds: Vec<FeedSettings>,
    /// Logging setup used by the binary
    pub logging: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./changefeed-data"),
            db_file: "changefeed.redb".to_string(),
            feeds: Vec::new(),
            logging: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Add a feed to open at startup
    pub fn with_feed(mut self, settings: FeedSettings) -> Self {
        self.feeds.push(settings);
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> NodeResult<Self> {
        let config: NodeConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    pub fn storage_config(&self) -> RedbStorageConfig {
        RedbStorageConfig::with_path(self.db_path())
    }

    /// Feeds to open, falling back to the default feed
    pub fn feed_settings(&self) -> Vec<FeedSettings> {
        if self.feeds.is_empty() {
            vec![FeedSettings::default()]
        } else {
            self.feeds.clone()
        }
    }

    pub fn validate(&self) -> NodeResult<()> {
        if self.db_file.is_empty() {
            return Err(NodeError::Config("db_file must not be empty".into()));
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !names.insert(feed.name.as_str()) {
                return Err(NodeError::Config(format!(
                    "feed {} configured twice",
                    feed.name
                )));
            }
        }
        Ok(())
    }
}

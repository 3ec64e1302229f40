//! redb table definitions and storage manager
//!
//! Defines all tables used by the chain log.

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadTransaction, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::StorageError;

// Key: feed name, Value: serialized RootRecord
pub const FEED_ROOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("feed_roots");

// Key: (feed name, change set id), Value: serialized ChangeSetRecord
pub const CHANGE_SETS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("change_sets");

/// Configuration for redb storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/changefeed.redb"),
            cache_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl RedbStorageConfig {
    /// Create a configuration for a database file
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}

/// Main redb storage manager
///
/// redb admits a single write transaction at a time; every structural
/// mutation of a feed runs inside one, which makes the write transaction the
/// exclusive lock on the feed's root anchor. Read transactions see a
/// consistent snapshot and never block writers.
pub struct RedbStorage {
    db: Arc<Database>,
    config: Option<RedbStorageConfig>,
}

impl RedbStorage {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)?;

        info!("Opened redb database");

        let storage = Self {
            db: Arc::new(db),
            config: Some(config),
        };

        storage.init_tables()?;

        Ok(storage)
    }

    /// Create a database that lives only in memory
    pub fn in_memory() -> Result<Self, StorageError> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        let storage = Self {
            db: Arc::new(db),
            config: None,
        };

        storage.init_tables()?;

        Ok(storage)
    }

    /// Initialize all tables
    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write()?;

        // Create tables if they don't exist
        write_txn.open_table(FEED_ROOTS)?;
        write_txn.open_table(CHANGE_SETS)?;

        write_txn.commit()?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get a reference to the database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the configuration, `None` for in-memory databases
    pub fn config(&self) -> Option<&RedbStorageConfig> {
        self.config.as_ref()
    }

    /// Begin a write transaction, blocking until no other writer holds one
    pub fn begin_write(&self) -> Result<WriteTransaction, StorageError> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a read transaction over a consistent snapshot
    pub fn begin_read(&self) -> Result<ReadTransaction, StorageError> {
        Ok(self.db.begin_read()?)
    }
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

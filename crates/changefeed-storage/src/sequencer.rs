//! Change set id assignment

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use changefeed_core::{ChangeSetId, FeedResult};
use parking_lot::Mutex;
use tracing::info;

use crate::chain_log::{ChainLog, RootHandle};

/// Hands out ids for one feed
///
/// The counter is recovered from the log on first use. Exactly one caller
/// performs the recovery read while concurrent first callers wait for it. If
/// recovery fails the error is returned and the next call tries again; the
/// counter never starts from a guess.
///
/// Recovery resumes after the highest id stored under the feed. That is the
/// newest entry's id unless writers committed out of id order, in which case
/// resuming after the newest would hand out an id that already exists.
#[derive(Debug)]
pub struct Sequencer {
    log: ChainLog,
    root: RootHandle,
    next: AtomicU64,
    recovered: AtomicBool,
    recovery: Mutex<()>,
}

impl Sequencer {
    pub fn new(log: ChainLog, root: RootHandle) -> Self {
        Self {
            log,
            root,
            next: AtomicU64::new(ChangeSetId::FIRST.value()),
            recovered: AtomicBool::new(false),
            recovery: Mutex::new(()),
        }
    }

    /// Take the next id
    pub fn next(&self) -> FeedResult<ChangeSetId> {
        self.recover()?;
        Ok(ChangeSetId::new(self.next.fetch_add(1, Ordering::SeqCst)))
    }

    /// The id the next call to [`Sequencer::next`] will return
    pub fn peek(&self) -> FeedResult<ChangeSetId> {
        self.recover()?;
        Ok(ChangeSetId::new(self.next.load(Ordering::SeqCst)))
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::Acquire)
    }

    /// Recover the counter from the log if that has not happened yet
    pub fn recover(&self) -> FeedResult<()> {
        if self.recovered.load(Ordering::Acquire) {
            return Ok(());
        }

        let _lock = self.recovery.lock();
        if self.recovered.load(Ordering::Acquire) {
            return Ok(());
        }

        let resume = match self.log.highest_id(&self.root)? {
            Some(highest) => highest.next(),
            None => ChangeSetId::FIRST,
        };
        self.next.store(resume.value(), Ordering::SeqCst);
        self.recovered.store(true, Ordering::Release);

        info!(feed = %self.root.feed(), next = %resume, "Recovered sequencer");
        Ok(())
    }
}

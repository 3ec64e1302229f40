//! Retry of transient write failures

use std::time::Duration;

use changefeed_core::{FeedError, FeedResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How often a write is re-attempted after a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Pause before each retry (milliseconds)
    pub backoff_millis: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_millis: 10,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_millis: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }

    /// Run `op`, repeating it while it fails transiently and retries remain
    ///
    /// `on_retry` is called with the retry number and the error before each
    /// new attempt. Non-transient errors are returned immediately.
    pub fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> FeedResult<T>,
        mut on_retry: impl FnMut(u32, &FeedError),
    ) -> FeedResult<T> {
        let mut retries = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    warn!(operation, retry = retries, error = %e, "Transient failure, retrying");
                    on_retry(retries, &e);
                    if self.backoff_millis > 0 {
                        std::thread::sleep(self.backoff());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Persistent change set chain
//!
//! - [`ChainLog`]: root anchors, appends, newest-first reads, verification
//! - [`Pruner`]: hysteresis retention with a single-pass guard
//! - [`record`]: the persisted record layouts

mod log;
mod pruning;
pub mod record;

pub use log::{ChainLog, ChainReport, RootHandle, RootState};
pub use pruning::{Pruner, PrunerState};
pub use record::{ChangeSetRecord, RootRecord};

//! # Changefeed Core
//!
//! Core traits, types, and errors for the changefeed changelog engine.
//!
//! A *feed* is an ordered, bounded log of [`ChangeSet`]s, one per
//! transaction that mutated the underlying store, read newest first.
//! This crate holds the pieces every layer agrees on; storage, caching and
//! pruning live in `changefeed-storage`.
//!
//! ## Key Traits
//!
//! - [`ChangeReader`]: Paged, newest-first access to a feed
//! - [`ChangeWriter`]: Recording and pruning of change sets
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`ChangeSetId`]: Dense, per-feed sequence number of a change set
//! - [`ChangeSet`]: One recorded unit of change
//! - [`FeedName`]: Validated name of an independently retained feed
//! - [`FeedError`]: Error taxonomy surfaced to feed callers

pub mod changeset;
pub mod clock;
pub mod error;
pub mod feed;
pub mod traits;

// Re-export main types
pub use changeset::*;
pub use clock::*;
pub use error::*;
pub use feed::*;
pub use traits::*;

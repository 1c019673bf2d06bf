//! Synchronizer module
//!
//! One [`Synchronizer`] per network turns the chain's block stream into the durable event log:
//!
//! - `events`: decoding of bridge-contract logs into bridge events.
//! - `reorg`: fork-point search and rollback of the store and deposit trees.
//! - `progress_tracker`: periodic progress logging and gap detection.
//! - `synchronizer`: the polling loop itself.

pub mod events;
pub mod progress_tracker;
pub mod reorg;
#[allow(clippy::module_inception)]
mod synchronizer;
pub mod types;

pub use events::{DecodeError, EventDecoder};
pub use progress_tracker::{SyncProgressTracker, SyncStats};
pub use synchronizer::Synchronizer;
pub use types::{SyncConfig, SyncError, SyncProgress, SyncResult};

//! Configuration and error types for the synchronizers.

use std::time::Duration;

use thiserror::Error;

use super::events::DecodeError;
use crate::bridgectrl::BridgeCtrlError;
use crate::chain::{ChainError, NetworkId};
use crate::storage::StorageError;

/// Error types for synchronization
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Invalid chain response: {0}")]
	InvalidResponse(String),

	#[error("Failed to decode log {log_index} in block {block_number}: {source}")]
	Decode {
		block_number: u64,
		log_index: u32,
		#[source]
		source: DecodeError,
	},

	#[error("Reorg on network {network} deeper than {max_depth} blocks below block {cursor}")]
	DeepReorg {
		network: NetworkId,
		cursor: u64,
		max_depth: u64,
	},

	#[error("Bridge controller error: {0}")]
	Controller(#[from] BridgeCtrlError),

	#[error("Tree state diverged from the event log: {0}")]
	Inconsistent(String),
}

impl SyncError {
	/// Whether the synchronizer should back off and retry from the same cursor.
	pub fn is_transient(&self) -> bool {
		match self {
			SyncError::Chain(e) => e.is_transient(),
			SyncError::Storage(e) => e.is_transient(),
			SyncError::InvalidResponse(_) => true,
			SyncError::Decode { .. }
			| SyncError::DeepReorg { .. }
			| SyncError::Controller(_)
			| SyncError::Inconsistent(_) => false,
		}
	}
}

/// Result type for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronizer knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// First block to process when the network has no cursor yet
	pub start_block: u64,
	/// Sleep between polls once caught up
	pub poll_interval: Duration,
	/// Maximum number of blocks fetched per round
	pub chunk_size: u64,
	/// Blocks below the head considered final
	pub confirmation_depth: u64,
	/// Deepest reorg the synchronizer rolls back on its own
	pub max_rollback_depth: u64,
	/// First delay before retrying a transient error
	pub retry_interval: Duration,
	/// Upper bound on the backoff between retries of transient errors
	pub max_backoff: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			start_block: 0,
			poll_interval: Duration::from_secs(2),
			chunk_size: 100,
			confirmation_depth: 0,
			max_rollback_depth: 64,
			retry_interval: Duration::from_millis(400),
			max_backoff: Duration::from_secs(60),
		}
	}
}

/// Outcome of one synchronization round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncProgress {
	/// The cursor is at the confirmed head
	Idle,
	/// Blocks were processed; the cursor now points at `cursor`
	Advanced { blocks: u64, cursor: u64 },
	/// A reorg was rolled back to `fork_point` (`None` when every block was removed)
	RolledBack { fork_point: Option<u64>, deposits: u64 },
}

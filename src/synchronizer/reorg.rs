//! Reorg handling: locate the fork point and roll the event log and trees back to it.

use tracing::{info, warn};

use super::types::{SyncError, SyncResult};
use crate::bridgectrl::BridgeController;
use crate::chain::{ChainAccess, NetworkId};
use crate::storage::{BlockCursor, BridgeStorage, EventRepository, RollbackSummary};
use crate::utils::short_hash;

/// Walk back from `cursor` until the stored block hash matches the canonical one.
///
/// Returns the highest common height, or `None` when no stored block survives. Removing more than
/// `max_depth` blocks is refused with [`SyncError::DeepReorg`].
pub async fn find_fork_point(
	network: NetworkId,
	chain: &dyn ChainAccess,
	storage: &dyn BridgeStorage,
	cursor: &BlockCursor,
	max_depth: u64,
) -> SyncResult<Option<u64>> {
	let mut height = cursor.number;
	loop {
		let Some(stored) = storage.get_block(network, height).await? else {
			// Stored blocks are contiguous up to the cursor
			return Ok(None);
		};
		let canonical = chain.block_hash(height).await?;
		if canonical == Some(stored.hash) {
			return Ok(Some(height));
		}
		warn!(
			network,
			height,
			stored = %short_hash(&stored.hash),
			canonical = %canonical.map_or_else(|| "none".to_string(), |h| short_hash(&h)),
			"Stored block is no longer canonical"
		);

		let removed = cursor.number - height + 1;
		if removed > max_depth {
			return Err(SyncError::DeepReorg {
				network,
				cursor: cursor.number,
				max_depth,
			});
		}
		if height == 0 {
			return Ok(None);
		}
		height -= 1;
	}
}

/// Delete everything above `fork_point` and bring the controller back in line with the store.
///
/// Failure to undo the tree appends leaves the trees ahead of the event log and is fatal.
pub async fn roll_back(
	network: NetworkId,
	controller: &BridgeController,
	storage: &dyn BridgeStorage,
	fork_point: Option<u64>,
) -> SyncResult<RollbackSummary> {
	let summary = storage.rollback_to(network, fork_point).await?;

	controller
		.remove_last_deposits(network, summary.deposits)
		.map_err(|e| SyncError::Inconsistent(e.to_string()))?;

	let latest = storage.latest_global_exit_root(network).await?;
	controller.reset_global_exit_root(network, latest)?;

	info!(
		network,
		fork_point = ?fork_point,
		blocks = summary.blocks,
		deposits = summary.deposits,
		claims = summary.claims,
		global_exit_roots = summary.global_exit_roots,
		"Rolled back reorged blocks"
	);
	Ok(summary)
}

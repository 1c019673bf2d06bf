//! Records persisted by the storage layer.

use crate::bridgectrl::Coverage;
use crate::chain::{Block, Claim, Deposit, GlobalExitRoot, Hash, NetworkId};

/// A processed block kept for reorg detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
	pub network_id: NetworkId,
	pub number: u64,
	pub hash: Hash,
	pub parent_hash: Hash,
	pub timestamp: u64,
}

impl BlockRecord {
	pub fn from_block(network_id: NetworkId, block: &Block) -> Self {
		Self {
			network_id,
			number: block.number,
			hash: block.hash,
			parent_hash: block.parent_hash,
			timestamp: block.timestamp,
		}
	}
}

/// Last fully processed block of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCursor {
	pub network_id: NetworkId,
	pub number: u64,
	pub hash: Hash,
}

/// Root of a network's deposit tree after a block's deposits were appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositExitRoot {
	pub network_id: NetworkId,
	/// Tree size the root corresponds to
	pub deposit_count: u64,
	pub root: Hash,
	pub block_number: u64,
}

/// A computed rollup exit root and the leaf tree sizes it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupExitRoot {
	pub root: Hash,
	pub covered: Coverage,
	/// Leaf network whose block produced this root
	pub network_id: NetworkId,
	pub block_number: u64,
}

/// Everything one block contributes, written atomically together with the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBatch {
	pub block: BlockRecord,
	pub deposits: Vec<Deposit>,
	pub exit_roots: Vec<DepositExitRoot>,
	pub claims: Vec<Claim>,
	pub global_exit_roots: Vec<GlobalExitRoot>,
	pub rollup_exit_roots: Vec<RollupExitRoot>,
}

impl BlockBatch {
	pub fn new(block: BlockRecord) -> Self {
		Self {
			block,
			deposits: Vec::new(),
			exit_roots: Vec::new(),
			claims: Vec::new(),
			global_exit_roots: Vec::new(),
			rollup_exit_roots: Vec::new(),
		}
	}

	pub fn network_id(&self) -> NetworkId {
		self.block.network_id
	}

	pub fn cursor(&self) -> BlockCursor {
		BlockCursor {
			network_id: self.block.network_id,
			number: self.block.number,
			hash: self.block.hash,
		}
	}

	/// Whether the block carried no bridge events.
	pub fn has_no_events(&self) -> bool {
		self.deposits.is_empty() && self.claims.is_empty() && self.global_exit_roots.is_empty()
	}
}

/// What a rollback removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
	pub blocks: u64,
	pub deposits: u64,
	pub claims: u64,
	pub global_exit_roots: u64,
	pub monitored_txs: u64,
}

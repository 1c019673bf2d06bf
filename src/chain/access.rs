use async_trait::async_trait;

use super::types::{Block, ChainError, ClaimTx, FeeParams, Hash, NetworkId, SentTx, TxStatus};

/// Per-network chain access used by the synchronizers and claim managers.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call from
/// several tasks at once.
#[async_trait]
pub trait ChainAccess: Send + Sync {
	/// Network id the chain reports for itself.
	async fn network_id(&self) -> Result<NetworkId, ChainError>;

	/// Height of the current chain head.
	async fn latest_block_number(&self) -> Result<u64, ChainError>;

	/// Blocks with numbers in `(after, up_to]`, ascending, each with its logs in log order.
	/// `after = None` starts from block 0.
	async fn blocks_since(&self, after: Option<u64>, up_to: u64) -> Result<Vec<Block>, ChainError>;

	/// Canonical block hash at `number`, if the chain has that block.
	async fn block_hash(&self, number: u64) -> Result<Option<Hash>, ChainError>;

	/// Sign and broadcast a claim transaction.
	async fn sign_and_send(&self, tx: &ClaimTx) -> Result<SentTx, ChainError>;

	async fn tx_status(&self, hash: &Hash) -> Result<TxStatus, ChainError>;

	async fn estimate_fee(&self) -> Result<FeeParams, ChainError>;
}

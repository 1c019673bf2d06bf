//! Type definitions shared between chain access, the synchronizers and the claim managers.

use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::utils::encoding::{serde_bytes, serde_fixed, serde_hash_list};

/// Identifier a chain reports for itself; 0 is conventionally the root network.
pub type NetworkId = u32;
/// 32-byte hash (block hash, tx hash, Merkle node).
pub type Hash = [u8; 32];
/// 20-byte account or contract address.
pub type Address = [u8; 20];

/// A raw contract log as returned by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
	#[serde(with = "serde_fixed")]
	pub address: Address,
	#[serde(with = "serde_hash_list")]
	pub topics: Vec<Hash>,
	#[serde(with = "serde_bytes")]
	pub data: Vec<u8>,
	pub log_index: u32,
	#[serde(with = "serde_fixed")]
	pub tx_hash: Hash,
}

/// A block together with the logs it produced, in log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
	pub number: u64,
	#[serde(with = "serde_fixed")]
	pub hash: Hash,
	#[serde(with = "serde_fixed")]
	pub parent_hash: Hash,
	pub timestamp: u64,
	#[serde(default)]
	pub logs: Vec<RawLog>,
}

/// A deposit (bridge) event emitted on its origin network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
	/// Network that emitted the deposit; owner of the tree it is appended to
	pub origin_network: NetworkId,
	pub destination_network: NetworkId,
	pub destination_address: Address,
	/// Network the bridged token originally lives on
	pub token_network: NetworkId,
	pub token_address: Address,
	pub amount: U256,
	pub metadata: Vec<u8>,
	pub leaf_type: u8,
	/// Leaf index in the origin network's deposit tree
	pub deposit_count: u32,
	pub block_number: u64,
	pub block_hash: Hash,
	pub tx_hash: Hash,
}

/// A claim event emitted on the destination network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
	/// Network that emitted the claim
	pub network_id: NetworkId,
	pub origin_network: NetworkId,
	pub deposit_count: u32,
	pub token_address: Address,
	pub destination_address: Address,
	pub amount: U256,
	pub block_number: u64,
	pub block_hash: Hash,
	pub tx_hash: Hash,
}

/// A global exit root update observed on some network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalExitRoot {
	/// Network on which the update was observed
	pub network_id: NetworkId,
	pub mainnet_exit_root: Hash,
	pub rollup_exit_root: Hash,
	pub global_exit_root: Hash,
	pub block_number: u64,
	pub block_hash: Hash,
}

/// A decoded bridge-contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
	Deposit(Deposit),
	Claim(Claim),
	GlobalExitRoot(GlobalExitRoot),
}

/// Fee parameters suggested by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeParams {
	pub gas_price: u128,
	pub gas_limit: u64,
}

/// An unsigned claim transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTx {
	#[serde(with = "serde_fixed")]
	pub to: Address,
	#[serde(with = "serde_bytes")]
	pub data: Vec<u8>,
	pub gas_price: u128,
	pub gas_limit: u64,
	/// Nonce to reuse when replacing a pending attempt
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub nonce: Option<u64>,
}

/// Result of a successful broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentTx {
	#[serde(with = "serde_fixed")]
	pub hash: Hash,
	pub nonce: u64,
}

/// Status of a broadcast transaction as seen by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TxStatus {
	Pending,
	#[serde(rename_all = "camelCase")]
	Confirmed { block_number: u64, gas_used: u64 },
	/// Mined but the call reverted
	#[serde(rename_all = "camelCase")]
	Reverted { block_number: u64 },
	Dropped,
	Underpriced,
}

/// Error types for chain access
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Request timed out: {0}")]
	Timeout(String),

	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("Invalid response: {0}")]
	InvalidResponse(String),

	#[error("Transaction underpriced: {0}")]
	Underpriced(String),

	#[error("Transaction rejected: {0}")]
	Rejected(String),

	#[error("Execution reverted: {0}")]
	Reverted(String),
}

impl ChainError {
	/// Whether the same request may succeed if retried later.
	pub fn is_transient(&self) -> bool {
		!matches!(
			self,
			ChainError::Rejected(_) | ChainError::Underpriced(_) | ChainError::Reverted(_)
		)
	}
}

impl From<reqwest::Error> for ChainError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			ChainError::Timeout(e.to_string())
		} else {
			ChainError::Transport(e.to_string())
		}
	}
}

impl From<serde_json::Error> for ChainError {
	fn from(e: serde_json::Error) -> Self {
		ChainError::InvalidResponse(e.to_string())
	}
}

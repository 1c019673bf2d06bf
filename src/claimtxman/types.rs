//! Monitored claim transactions and their lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridgectrl::BridgeCtrlError;
use crate::chain::{Address, ChainError, GlobalExitRoot, Hash, NetworkId, SentTx};
use crate::storage::StorageError;
use crate::utils::encoding::serde_fixed;

/// Error types for the claim transaction manager
#[derive(Debug, Error)]
pub enum ClaimTxError {
	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Bridge controller error: {0}")]
	Controller(#[from] BridgeCtrlError),

	#[error("Deposit {0} is not in the event log")]
	MissingDeposit(DepositKey),
}

impl ClaimTxError {
	pub fn is_transient(&self) -> bool {
		match self {
			ClaimTxError::Chain(e) => e.is_transient(),
			ClaimTxError::Storage(e) => e.is_transient(),
			ClaimTxError::Controller(_) | ClaimTxError::MissingDeposit(_) => false,
		}
	}
}

/// Result type for claim manager operations
pub type ClaimTxResult<T> = Result<T, ClaimTxError>;

/// Claim manager knobs.
#[derive(Debug, Clone)]
pub struct ClaimTxConfig {
	/// Interval between monitoring passes over pending transactions
	pub poll_interval: Duration,
	/// Total broadcasts allowed per deposit, accepted or rejected by the node
	pub max_retries: u32,
	/// Age after which a claim that is still not confirmed fails
	pub max_age: Duration,
	/// Time a submission may stay pending before it is replaced
	pub tx_timeout: Duration,
	/// Gas price increase applied to each replacement, in percent
	pub gas_bump_percent: u64,
	/// Highest gas price a claim is ever sent with
	pub max_gas_price: Option<u128>,
}

impl Default for ClaimTxConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(5),
			max_retries: 5,
			max_age: Duration::from_secs(24 * 60 * 60),
			tx_timeout: Duration::from_secs(120),
			gas_bump_percent: 20,
			max_gas_price: None,
		}
	}
}

/// Lifecycle of a monitored claim transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoredTxStatus {
	/// Deposit is claimable, nothing built yet
	#[default]
	Discovered,
	/// Claim transaction built and persisted, not yet broadcast
	Built,
	/// Broadcast, waiting for inclusion
	Submitted,
	/// Included on the destination chain
	Confirmed,
	/// Broadcast attempt lost or rejected; will be rebuilt with a higher fee
	Dropped,
	/// Retry budget exhausted
	Failed,
}

impl MonitoredTxStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Confirmed | Self::Failed)
	}
}

impl std::fmt::Display for MonitoredTxStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Discovered => "discovered",
			Self::Built => "built",
			Self::Submitted => "submitted",
			Self::Confirmed => "confirmed",
			Self::Dropped => "dropped",
			Self::Failed => "failed",
		};
		write!(f, "{}", s)
	}
}

impl std::str::FromStr for MonitoredTxStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"discovered" => Ok(Self::Discovered),
			"built" => Ok(Self::Built),
			"submitted" => Ok(Self::Submitted),
			"confirmed" => Ok(Self::Confirmed),
			"dropped" => Ok(Self::Dropped),
			"failed" => Ok(Self::Failed),
			_ => Err(format!("unknown status: {}", s)),
		}
	}
}

/// Identifies the deposit a monitored transaction claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepositKey {
	pub destination_network: NetworkId,
	pub origin_network: NetworkId,
	pub deposit_count: u32,
}

impl std::fmt::Display for DepositKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}/{}->{}",
			self.origin_network, self.deposit_count, self.destination_network
		)
	}
}

/// One broadcast of a claim transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAttempt {
	#[serde(with = "serde_fixed")]
	pub hash: Hash,
	pub nonce: u64,
	pub gas_price: u128,
	pub submitted_at: i64,
	pub gas_used: Option<u64>,
}

/// A claim transaction tracked through its lifecycle by the claim manager of its
/// destination network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTx {
	pub key: DepositKey,
	pub status: MonitoredTxStatus,
	/// Global exit root the proof was built against
	pub global_exit_root: Hash,
	pub mainnet_exit_root: Hash,
	pub rollup_exit_root: Hash,
	/// Size of the origin tree covered by `global_exit_root`
	pub tree_size: u64,
	/// Bridge contract the claim is sent to
	pub to: Address,
	/// Encoded claim call, set once built
	pub call_data: Vec<u8>,
	pub gas_price: u128,
	pub gas_limit: u64,
	pub nonce: Option<u64>,
	/// Every broadcast the node accepted, oldest first; only the last one can be outstanding
	pub attempts: Vec<TxAttempt>,
	/// Broadcasts the node refused
	pub failed_sends: u32,
	pub created_at: i64,
	pub updated_at: i64,
	pub last_error: Option<String>,
}

impl MonitoredTx {
	/// Create a newly discovered claim for `key` under the given global exit root.
	pub fn new(key: DepositKey, root: &GlobalExitRoot, tree_size: u64, to: Address) -> Self {
		let now = chrono::Utc::now().timestamp();
		Self {
			key,
			status: MonitoredTxStatus::Discovered,
			global_exit_root: root.global_exit_root,
			mainnet_exit_root: root.mainnet_exit_root,
			rollup_exit_root: root.rollup_exit_root,
			tree_size,
			to,
			call_data: Vec::new(),
			gas_price: 0,
			gas_limit: 0,
			nonce: None,
			attempts: Vec::new(),
			failed_sends: 0,
			created_at: now,
			updated_at: now,
			last_error: None,
		}
	}

	pub fn latest_attempt(&self) -> Option<&TxAttempt> {
		self.attempts.last()
	}

	/// Broadcasts made so far, accepted or not.
	pub fn submissions(&self) -> u32 {
		self.attempts.len() as u32 + self.failed_sends
	}

	/// Seconds since the latest broadcast, if any.
	pub fn seconds_since_submission(&self, now: i64) -> Option<i64> {
		self.latest_attempt().map(|a| now - a.submitted_at)
	}

	pub fn age_secs(&self, now: i64) -> i64 {
		now - self.created_at
	}

	fn touch(&mut self) {
		self.updated_at = chrono::Utc::now().timestamp();
	}

	/// Mark as built with the encoded call and gas parameters
	pub fn mark_built(&mut self, call_data: Vec<u8>, gas_price: u128, gas_limit: u64) {
		self.call_data = call_data;
		self.gas_price = gas_price;
		self.gas_limit = gas_limit;
		self.status = MonitoredTxStatus::Built;
		self.touch();
	}

	/// Record a broadcast
	pub fn mark_submitted(&mut self, sent: SentTx) {
		let now = chrono::Utc::now().timestamp();
		self.nonce = Some(sent.nonce);
		self.attempts.push(TxAttempt {
			hash: sent.hash,
			nonce: sent.nonce,
			gas_price: self.gas_price,
			submitted_at: now,
			gas_used: None,
		});
		self.status = MonitoredTxStatus::Submitted;
		self.last_error = None;
		self.updated_at = now;
	}

	/// Mark as confirmed, recording gas used by the latest attempt
	pub fn mark_confirmed(&mut self, gas_used: Option<u64>) {
		if let Some(attempt) = self.attempts.last_mut() {
			attempt.gas_used = gas_used.or(attempt.gas_used);
		}
		self.status = MonitoredTxStatus::Confirmed;
		self.touch();
	}

	/// Record a broadcast the node refused
	pub fn mark_send_failed(&mut self, reason: String) {
		self.failed_sends += 1;
		self.last_error = Some(reason);
		self.touch();
	}

	pub fn mark_dropped(&mut self, reason: String) {
		self.status = MonitoredTxStatus::Dropped;
		self.last_error = Some(reason);
		self.touch();
	}

	pub fn mark_failed(&mut self, reason: String) {
		self.status = MonitoredTxStatus::Failed;
		self.last_error = Some(reason);
		self.touch();
	}
}

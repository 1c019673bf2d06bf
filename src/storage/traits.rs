//! Storage Trait Definitions
//!
//! Repository interfaces for the bridge event log and the claim manager's monitored
//! transactions. Implementations can use SQLite (production) or memory (testing).

use async_trait::async_trait;
use thiserror::Error;

use super::types::{BlockBatch, BlockCursor, BlockRecord, RollbackSummary, RollupExitRoot};
use crate::bridgectrl::Coverage;
use crate::chain::{Claim, Deposit, GlobalExitRoot, NetworkId};
use crate::claimtxman::{DepositKey, MonitoredTx};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Record not found: {0}")]
	NotFound(String),

	#[error("Duplicate record: {0}")]
	Duplicate(String),

	#[error("Database error: {0}")]
	Database(String),

	#[error("Invalid data: {0}")]
	InvalidData(String),

	#[error("Connection error: {0}")]
	Connection(String),
}

impl StorageError {
	/// Whether retrying the same operation later may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, StorageError::Database(_) | StorageError::Connection(_))
	}
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Repository for the per-network event log written by the synchronizers
#[async_trait]
pub trait EventRepository: Send + Sync {
	/// Last fully processed block of `network`
	async fn get_cursor(&self, network: NetworkId) -> StorageResult<Option<BlockCursor>>;

	/// A processed block by height
	async fn get_block(&self, network: NetworkId, number: u64) -> StorageResult<Option<BlockRecord>>;

	/// Write a block, its events and roots, and advance the cursor, all or nothing
	async fn persist_block(&self, batch: &BlockBatch) -> StorageResult<()>;

	/// Delete everything `network` recorded above `fork_point` and move the cursor back to it.
	/// `None` removes every block of the network. Unconfirmed monitored transactions for removed
	/// deposits go with them.
	async fn rollback_to(
		&self,
		network: NetworkId,
		fork_point: Option<u64>,
	) -> StorageResult<RollbackSummary>;

	/// All deposits of `network` ordered by deposit count
	async fn get_deposits(&self, network: NetworkId) -> StorageResult<Vec<Deposit>>;

	async fn get_deposit(
		&self,
		network: NetworkId,
		deposit_count: u32,
	) -> StorageResult<Option<Deposit>>;

	/// Deposits from `origin` to `destination` with a count below `below_count` that no monitored
	/// transaction tracks yet
	async fn get_unclaimed_deposits(
		&self,
		origin: NetworkId,
		destination: NetworkId,
		below_count: u64,
	) -> StorageResult<Vec<Deposit>>;

	/// Claim recorded on `network` for deposit `deposit_count` of `origin`
	async fn get_claim(
		&self,
		network: NetworkId,
		origin: NetworkId,
		deposit_count: u32,
	) -> StorageResult<Option<Claim>>;

	/// Every recorded rollup exit root
	async fn get_rollup_exit_roots(&self) -> StorageResult<Vec<RollupExitRoot>>;

	/// Delete rollup exit roots superseded by `floor`, returning how many went
	async fn prune_rollup_exit_roots(&self, floor: &Coverage) -> StorageResult<u64>;

	/// Most recent global exit root observed on `network`
	async fn latest_global_exit_root(
		&self,
		network: NetworkId,
	) -> StorageResult<Option<GlobalExitRoot>>;
}

/// Repository for claim transactions tracked by the claim managers
#[async_trait]
pub trait MonitoredTxRepository: Send + Sync {
	/// Insert a new monitored transaction; fails if one exists for the same deposit
	async fn insert_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()>;

	async fn update_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()>;

	async fn get_monitored_tx(&self, key: &DepositKey) -> StorageResult<Option<MonitoredTx>>;

	/// Non-terminal monitored transactions targeting `destination`, oldest first
	async fn get_pending_monitored_txs(
		&self,
		destination: NetworkId,
	) -> StorageResult<Vec<MonitoredTx>>;

	/// Update `tx` and record `claim` (unless already known) in one write
	async fn confirm_monitored_tx(&self, tx: &MonitoredTx, claim: &Claim) -> StorageResult<()>;
}

/// Full storage interface shared by synchronizers, the bridge controller and claim managers
///
/// Implementations:
/// - `SqliteStorage` - Production storage with SQLite
/// - `MemoryStorage` - In-memory storage for testing
pub trait BridgeStorage: EventRepository + MonitoredTxRepository {}

impl<T: EventRepository + MonitoredTxRepository> BridgeStorage for T {}

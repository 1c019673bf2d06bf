//! In-Memory Storage Implementation
//!
//! Provides in-memory storage for tests and local runs.
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::traits::{EventRepository, MonitoredTxRepository, StorageError, StorageResult};
use super::types::{
	BlockBatch, BlockCursor, BlockRecord, DepositExitRoot, RollbackSummary, RollupExitRoot,
};
use crate::bridgectrl::{Coverage, is_superseded};
use crate::chain::{Claim, Deposit, GlobalExitRoot, NetworkId};
use crate::claimtxman::{DepositKey, MonitoredTx, MonitoredTxStatus};

#[derive(Default)]
struct MemoryState {
	blocks: BTreeMap<(NetworkId, u64), BlockRecord>,
	cursors: HashMap<NetworkId, BlockCursor>,
	/// Keyed by (origin network, deposit count)
	deposits: BTreeMap<(NetworkId, u32), Deposit>,
	exit_roots: Vec<DepositExitRoot>,
	/// Keyed by (claiming network, origin network, deposit count)
	claims: BTreeMap<(NetworkId, NetworkId, u32), Claim>,
	global_exit_roots: Vec<GlobalExitRoot>,
	rollup_exit_roots: Vec<RollupExitRoot>,
	monitored: BTreeMap<DepositKey, MonitoredTx>,
}

/// In-memory bridge storage
///
/// Thread-safe; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStorage {
	state: Arc<RwLock<MemoryState>>,
	/// Number of upcoming `persist_block` calls that fail
	failing_writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
	/// Create a new empty store
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `count` block writes fail with a database error.
	pub fn fail_next_writes(&self, count: usize) {
		self.failing_writes.store(count, Ordering::SeqCst);
	}

	/// Every monitored transaction, for inspection.
	pub async fn all_monitored_txs(&self) -> Vec<MonitoredTx> {
		self.state.read().await.monitored.values().cloned().collect()
	}

	/// Deposit exit roots recorded for `network`, oldest first.
	pub async fn deposit_exit_roots(&self, network: NetworkId) -> Vec<DepositExitRoot> {
		self.state
			.read()
			.await
			.exit_roots
			.iter()
			.filter(|r| r.network_id == network)
			.cloned()
			.collect()
	}
}

fn insert_claim(state: &mut MemoryState, claim: &Claim, overwrite: bool) {
	let key = (claim.network_id, claim.origin_network, claim.deposit_count);
	if overwrite || !state.claims.contains_key(&key) {
		state.claims.insert(key, claim.clone());
	}
}

#[async_trait]
impl EventRepository for MemoryStorage {
	async fn get_cursor(&self, network: NetworkId) -> StorageResult<Option<BlockCursor>> {
		Ok(self.state.read().await.cursors.get(&network).copied())
	}

	async fn get_block(&self, network: NetworkId, number: u64) -> StorageResult<Option<BlockRecord>> {
		Ok(self.state.read().await.blocks.get(&(network, number)).cloned())
	}

	async fn persist_block(&self, batch: &BlockBatch) -> StorageResult<()> {
		let pending_failures = self.failing_writes.load(Ordering::SeqCst);
		if pending_failures > 0 {
			self.failing_writes
				.store(pending_failures - 1, Ordering::SeqCst);
			return Err(StorageError::Database("injected write failure".to_string()));
		}

		let mut state = self.state.write().await;
		let network = batch.network_id();
		let block_key = (network, batch.block.number);
		if state.blocks.contains_key(&block_key) {
			return Err(StorageError::Duplicate(format!(
				"block {} of network {}",
				batch.block.number, network
			)));
		}
		for deposit in &batch.deposits {
			if state
				.deposits
				.contains_key(&(deposit.origin_network, deposit.deposit_count))
			{
				return Err(StorageError::Duplicate(format!(
					"deposit {} of network {}",
					deposit.deposit_count, deposit.origin_network
				)));
			}
		}

		state.blocks.insert(block_key, batch.block.clone());
		state.cursors.insert(network, batch.cursor());
		for deposit in &batch.deposits {
			state.deposits.insert(
				(deposit.origin_network, deposit.deposit_count),
				deposit.clone(),
			);
		}
		state.exit_roots.extend(batch.exit_roots.iter().cloned());
		for claim in &batch.claims {
			insert_claim(&mut *state, claim, true);
		}
		state
			.global_exit_roots
			.extend(batch.global_exit_roots.iter().cloned());
		state
			.rollup_exit_roots
			.extend(batch.rollup_exit_roots.iter().cloned());
		Ok(())
	}

	async fn rollback_to(
		&self,
		network: NetworkId,
		fork_point: Option<u64>,
	) -> StorageResult<RollbackSummary> {
		let mut state = self.state.write().await;
		let above = |n: u64| fork_point.is_none_or(|fork| n > fork);
		let mut summary = RollbackSummary::default();

		let before = state.blocks.len();
		state
			.blocks
			.retain(|(net, number), _| *net != network || !above(*number));
		summary.blocks = (before - state.blocks.len()) as u64;

		let removed: Vec<u32> = state
			.deposits
			.range((network, 0)..=(network, u32::MAX))
			.filter(|(_, d)| above(d.block_number))
			.map(|(_, d)| d.deposit_count)
			.collect();
		let before = state.monitored.len();
		state.monitored.retain(|key, tx| {
			key.origin_network != network
				|| tx.status == MonitoredTxStatus::Confirmed
				|| !removed.contains(&key.deposit_count)
		});
		summary.monitored_txs = (before - state.monitored.len()) as u64;

		let before = state.deposits.len();
		state
			.deposits
			.retain(|(net, _), d| *net != network || !above(d.block_number));
		summary.deposits = (before - state.deposits.len()) as u64;

		let before = state.claims.len();
		state
			.claims
			.retain(|(net, _, _), c| *net != network || !above(c.block_number));
		summary.claims = (before - state.claims.len()) as u64;

		let before = state.global_exit_roots.len();
		state
			.global_exit_roots
			.retain(|g| g.network_id != network || !above(g.block_number));
		summary.global_exit_roots = (before - state.global_exit_roots.len()) as u64;

		state
			.exit_roots
			.retain(|r| r.network_id != network || !above(r.block_number));
		state
			.rollup_exit_roots
			.retain(|r| r.network_id != network || !above(r.block_number));

		let cursor = fork_point
			.and_then(|fork| state.blocks.get(&(network, fork)))
			.map(|block| BlockCursor {
				network_id: network,
				number: block.number,
				hash: block.hash,
			});
		match cursor {
			Some(cursor) => state.cursors.insert(network, cursor),
			None => state.cursors.remove(&network),
		};

		Ok(summary)
	}

	async fn get_deposits(&self, network: NetworkId) -> StorageResult<Vec<Deposit>> {
		let state = self.state.read().await;
		Ok(state
			.deposits
			.range((network, 0)..=(network, u32::MAX))
			.map(|(_, d)| d.clone())
			.collect())
	}

	async fn get_deposit(
		&self,
		network: NetworkId,
		deposit_count: u32,
	) -> StorageResult<Option<Deposit>> {
		Ok(self
			.state
			.read()
			.await
			.deposits
			.get(&(network, deposit_count))
			.cloned())
	}

	async fn get_unclaimed_deposits(
		&self,
		origin: NetworkId,
		destination: NetworkId,
		below_count: u64,
	) -> StorageResult<Vec<Deposit>> {
		let state = self.state.read().await;
		Ok(state
			.deposits
			.range((origin, 0)..=(origin, u32::MAX))
			.map(|(_, d)| d)
			.filter(|d| {
				d.destination_network == destination
					&& u64::from(d.deposit_count) < below_count
					&& !state.monitored.contains_key(&DepositKey {
						destination_network: destination,
						origin_network: origin,
						deposit_count: d.deposit_count,
					})
			})
			.cloned()
			.collect())
	}

	async fn get_claim(
		&self,
		network: NetworkId,
		origin: NetworkId,
		deposit_count: u32,
	) -> StorageResult<Option<Claim>> {
		Ok(self
			.state
			.read()
			.await
			.claims
			.get(&(network, origin, deposit_count))
			.cloned())
	}

	async fn get_rollup_exit_roots(&self) -> StorageResult<Vec<RollupExitRoot>> {
		Ok(self.state.read().await.rollup_exit_roots.clone())
	}

	async fn prune_rollup_exit_roots(&self, floor: &Coverage) -> StorageResult<u64> {
		let mut state = self.state.write().await;
		let before = state.rollup_exit_roots.len();
		state
			.rollup_exit_roots
			.retain(|r| !is_superseded(&r.covered, floor));
		Ok((before - state.rollup_exit_roots.len()) as u64)
	}

	async fn latest_global_exit_root(
		&self,
		network: NetworkId,
	) -> StorageResult<Option<GlobalExitRoot>> {
		Ok(self
			.state
			.read()
			.await
			.global_exit_roots
			.iter()
			.rev()
			.find(|g| g.network_id == network)
			.cloned())
	}
}

#[async_trait]
impl MonitoredTxRepository for MemoryStorage {
	async fn insert_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()> {
		let mut state = self.state.write().await;
		if state.monitored.contains_key(&tx.key) {
			return Err(StorageError::Duplicate(tx.key.to_string()));
		}
		state.monitored.insert(tx.key, tx.clone());
		Ok(())
	}

	async fn update_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()> {
		let mut state = self.state.write().await;
		match state.monitored.get_mut(&tx.key) {
			Some(existing) => {
				*existing = tx.clone();
				Ok(())
			}
			None => Err(StorageError::NotFound(tx.key.to_string())),
		}
	}

	async fn get_monitored_tx(&self, key: &DepositKey) -> StorageResult<Option<MonitoredTx>> {
		Ok(self.state.read().await.monitored.get(key).cloned())
	}

	async fn get_pending_monitored_txs(
		&self,
		destination: NetworkId,
	) -> StorageResult<Vec<MonitoredTx>> {
		let state = self.state.read().await;
		let mut pending: Vec<MonitoredTx> = state
			.monitored
			.values()
			.filter(|tx| tx.key.destination_network == destination && !tx.status.is_terminal())
			.cloned()
			.collect();
		pending.sort_by_key(|tx| (tx.created_at, tx.key));
		Ok(pending)
	}

	async fn confirm_monitored_tx(&self, tx: &MonitoredTx, claim: &Claim) -> StorageResult<()> {
		let mut state = self.state.write().await;
		if !state.monitored.contains_key(&tx.key) {
			return Err(StorageError::NotFound(tx.key.to_string()));
		}
		state.monitored.insert(tx.key, tx.clone());
		insert_claim(&mut *state, claim, false);
		Ok(())
	}
}

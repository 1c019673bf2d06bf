//! Per-network synchronizer.
//!
//! A [`Synchronizer`] follows one chain from its cursor to the confirmed head, one block at a time.
//! Each block's bridge events are applied to the [`BridgeController`] and persisted atomically
//! together with the new cursor; only then are the global exit roots it carried committed and
//! announced on the [`ExitRootChannel`].
//!
//! A synchronizer may also carry a [`TrustedExitRootSource`]. While caught up it announces the
//! sequencer's latest global exit root ahead of the block that records it; those announcements
//! are never persisted.

use std::sync::Arc;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::EventDecoder;
use super::progress_tracker::SyncProgressTracker;
use super::reorg;
use super::types::{SyncConfig, SyncError, SyncProgress, SyncResult};
use crate::bridgectrl::{BridgeController, Coverage, compute_global_exit_root, deposit_leaf_hash};
use crate::chain::{
	Address, Block, BridgeEvent, ChainAccess, GlobalExitRoot, Hash, NetworkId,
	TrustedExitRootSource,
};
use crate::exit_root_channel::{ExitRootChannel, ExitRootNotification};
use crate::storage::{
	BlockBatch, BlockCursor, BlockRecord, BridgeStorage, DepositExitRoot, EventRepository,
};
use crate::utils::short_hash;

/// Follows one network and feeds its bridge events into the controller and the store.
pub struct Synchronizer {
	network_id: NetworkId,
	config: SyncConfig,
	decoder: EventDecoder,
	chain: Arc<dyn ChainAccess>,
	controller: Arc<BridgeController>,
	storage: Arc<dyn BridgeStorage>,
	channel: ExitRootChannel,
	progress: SyncProgressTracker,
	trusted: Option<Arc<dyn TrustedExitRootSource>>,
	/// Last trusted global exit root announced
	last_trusted: Option<Hash>,
}

impl Synchronizer {
	pub fn new(
		network_id: NetworkId,
		bridge_address: Address,
		config: SyncConfig,
		chain: Arc<dyn ChainAccess>,
		controller: Arc<BridgeController>,
		storage: Arc<dyn BridgeStorage>,
		channel: ExitRootChannel,
	) -> Self {
		let progress = SyncProgressTracker::new(network_id, config.start_block);
		Self {
			network_id,
			decoder: EventDecoder::new(network_id, bridge_address),
			config,
			chain,
			controller,
			storage,
			channel,
			progress,
			trusted: None,
			last_trusted: None,
		}
	}

	/// Announce the sequencer's global exit roots while caught up.
	pub fn with_trusted_source(mut self, source: Arc<dyn TrustedExitRootSource>) -> Self {
		self.trusted = Some(source);
		self
	}

	pub fn network_id(&self) -> NetworkId {
		self.network_id
	}

	pub fn progress(&self) -> &SyncProgressTracker {
		&self.progress
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			initial_interval: self.config.retry_interval,
			randomization_factor: 0.1,
			multiplier: 2.0,
			max_interval: self.config.max_backoff,
			max_elapsed_time: None,
			..Default::default()
		}
	}

	/// Run until cancelled.
	///
	/// Transient chain and storage errors are retried from the same cursor with exponential
	/// backoff. Returns an error only for failures that retrying cannot fix.
	pub async fn sync(&mut self, cancel: CancellationToken) -> SyncResult<()> {
		info!(
			network = self.network_id,
			start_block = self.config.start_block,
			"Starting synchronizer"
		);
		let mut backoff = self.backoff();

		loop {
			if cancel.is_cancelled() {
				break;
			}

			let delay = match self.sync_once().await {
				Ok(SyncProgress::Idle) => {
					backoff.reset();
					self.progress.log_progress(false);
					if let Err(e) = self.poll_trusted_exit_root().await {
						warn!(
							network = self.network_id,
							"Trusted exit root poll failed: {}", e
						);
					}
					self.config.poll_interval
				}
				Ok(SyncProgress::Advanced { .. }) | Ok(SyncProgress::RolledBack { .. }) => {
					backoff.reset();
					self.progress.log_progress(false);
					continue;
				}
				Err(e) if e.is_transient() => {
					let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
					warn!(
						network = self.network_id,
						"Sync round failed, retrying in {:?}: {}", delay, e
					);
					delay
				}
				Err(e) => {
					error!(network = self.network_id, "Synchronizer stopped: {}", e);
					self.progress.log_progress(true);
					return Err(e);
				}
			};

			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		self.progress.log_progress(true);
		info!(
			network = self.network_id,
			"Synchronizer stopped: {}",
			self.progress.get_stats().summary()
		);
		Ok(())
	}

	/// One round: process up to one chunk of confirmed blocks after the cursor.
	pub async fn sync_once(&mut self) -> SyncResult<SyncProgress> {
		let cursor = self.storage.get_cursor(self.network_id).await?;
		let latest = self.chain.latest_block_number().await?;
		let confirmed = latest.saturating_sub(self.config.confirmation_depth);

		let after = match cursor {
			Some(c) => Some(c.number),
			None => self.config.start_block.checked_sub(1),
		};
		let next = after.map_or(0, |a| a + 1);
		if next > confirmed {
			return Ok(SyncProgress::Idle);
		}
		let up_to = confirmed.min(next.saturating_add(self.config.chunk_size.max(1) - 1));

		let blocks = self.chain.blocks_since(after, up_to).await?;
		if blocks.is_empty() {
			return Err(SyncError::InvalidResponse(format!(
				"no blocks returned for range {}..={}",
				next, up_to
			)));
		}
		debug!(
			network = self.network_id,
			"Fetched {} blocks in range {}..={}",
			blocks.len(),
			next,
			up_to
		);

		let mut parent = cursor;
		let mut processed = 0;
		for block in &blocks {
			let expected = parent.map_or(next, |p| p.number + 1);
			if block.number != expected {
				return Err(SyncError::InvalidResponse(format!(
					"expected block {}, got {}",
					expected, block.number
				)));
			}
			if let Some(p) = parent {
				if block.parent_hash != p.hash {
					info!(
						network = self.network_id,
						block = block.number,
						expected_parent = %short_hash(&p.hash),
						actual_parent = %short_hash(&block.parent_hash),
						"Reorg detected"
					);
					return self.handle_reorg(&p).await;
				}
			}

			parent = Some(self.process_block(block).await?);
			processed += 1;
		}

		Ok(SyncProgress::Advanced {
			blocks: processed,
			cursor: parent.map_or(up_to, |p| p.number),
		})
	}

	async fn handle_reorg(&mut self, cursor: &BlockCursor) -> SyncResult<SyncProgress> {
		let fork_point = reorg::find_fork_point(
			self.network_id,
			self.chain.as_ref(),
			self.storage.as_ref(),
			cursor,
			self.config.max_rollback_depth,
		)
		.await?;
		let summary = reorg::roll_back(
			self.network_id,
			&self.controller,
			self.storage.as_ref(),
			fork_point,
		)
		.await?;
		self.progress.record_rollback(fork_point);

		Ok(SyncProgress::RolledBack {
			fork_point,
			deposits: summary.deposits,
		})
	}

	/// Apply, persist and announce one block. Returns the new cursor.
	async fn process_block(&mut self, block: &Block) -> SyncResult<BlockCursor> {
		let events = self.decoder.decode_block(block)?;
		let mut batch = BlockBatch::new(BlockRecord::from_block(self.network_id, block));
		let mut staged = Vec::new();
		let mut appended = 0u64;

		let applied = self.apply_events(events, &mut batch, &mut staged, &mut appended);
		if let Err(e) = applied {
			self.undo_appends(appended)?;
			return Err(e);
		}

		if let Err(e) = self.storage.persist_block(&batch).await {
			warn!(
				network = self.network_id,
				block = block.number,
				"Failed to persist block, undoing {} deposits: {}",
				appended,
				e
			);
			self.undo_appends(appended)?;
			return Err(e.into());
		}

		let committed_roots = !staged.is_empty();
		for (update, covered) in staged {
			self.controller.commit_global_exit_root(update.clone())?;
			info!(
				network = self.network_id,
				block = update.block_number,
				global_exit_root = %short_hash(&update.global_exit_root),
				"New global exit root"
			);
			self.channel.publish(ExitRootNotification { update, covered });
		}
		if committed_roots {
			self.prune_rollup_history().await;
		}

		if !batch.has_no_events() {
			debug!(
				network = self.network_id,
				block = block.number,
				deposits = batch.deposits.len(),
				claims = batch.claims.len(),
				global_exit_roots = batch.global_exit_roots.len(),
				"Processed block"
			);
		}
		self.progress.record_block(
			block.number,
			batch.deposits.len(),
			batch.claims.len(),
			batch.global_exit_roots.len(),
		);
		Ok(batch.cursor())
	}

	/// Apply a block's events to the controller in log order, filling `batch`.
	fn apply_events(
		&self,
		events: Vec<BridgeEvent>,
		batch: &mut BlockBatch,
		staged: &mut Vec<(GlobalExitRoot, Coverage)>,
		appended: &mut u64,
	) -> SyncResult<()> {
		let is_leaf = self.controller.is_leaf_network(self.network_id);
		let mut unsnapshotted = false;

		for event in events {
			match event {
				BridgeEvent::Deposit(deposit) => {
					let (count, root) = self.controller.add_deposit(
						self.network_id,
						deposit_leaf_hash(&deposit),
						deposit.deposit_count,
					)?;
					*appended += 1;
					unsnapshotted = is_leaf;
					batch.exit_roots.push(DepositExitRoot {
						network_id: self.network_id,
						deposit_count: u64::from(count) + 1,
						root,
						block_number: deposit.block_number,
					});
					batch.deposits.push(deposit);
				}
				BridgeEvent::Claim(claim) => batch.claims.push(claim),
				BridgeEvent::GlobalExitRoot(update) => {
					if unsnapshotted {
						self.snapshot_rollup(batch)?;
						unsnapshotted = false;
					}
					if let Some(covered) = self.stage_global_exit_root(&update, staged)? {
						staged.push((update.clone(), covered));
					}
					batch.global_exit_roots.push(update);
				}
			}
		}

		if unsnapshotted {
			self.snapshot_rollup(batch)?;
		}
		Ok(())
	}

	fn snapshot_rollup(&self, batch: &mut BlockBatch) -> SyncResult<()> {
		let snapshot = self
			.controller
			.snapshot_rollup(self.network_id, batch.block.number)?;
		debug!(
			network = self.network_id,
			rollup_exit_root = %short_hash(&snapshot.root),
			"Recorded rollup exit root"
		);
		batch.rollup_exit_roots.push(snapshot);
		Ok(())
	}

	/// Coverage of `update` if it changes the aggregate observed on this network.
	fn stage_global_exit_root(
		&self,
		update: &GlobalExitRoot,
		staged: &[(GlobalExitRoot, Coverage)],
	) -> SyncResult<Option<Coverage>> {
		let combined = compute_global_exit_root(&update.mainnet_exit_root, &update.rollup_exit_root);
		if combined != update.global_exit_root {
			return Err(SyncError::Inconsistent(format!(
				"global exit root {} does not match its components in block {}",
				short_hash(&update.global_exit_root),
				update.block_number
			)));
		}

		let is_new = match staged.last() {
			Some((previous, _)) => previous.global_exit_root != update.global_exit_root,
			None => self.controller.is_new_global_exit_root(update)?,
		};
		if !is_new {
			return Ok(None);
		}

		let covered = self.controller.resolve_coverage(update)?;
		if !covered.contains_key(&self.controller.root_network()) {
			warn!(
				network = self.network_id,
				mainnet_exit_root = %short_hash(&update.mainnet_exit_root),
				"Mainnet exit root not known locally yet"
			);
		}
		Ok(Some(covered))
	}

	/// Drop rollup exit roots no observed global exit root can reference any more.
	async fn prune_rollup_history(&self) {
		let floor = match self.controller.prune_rollup_history() {
			Ok(Some(floor)) => floor,
			Ok(None) => return,
			Err(e) => {
				warn!(network = self.network_id, "Failed to prune rollup history: {}", e);
				return;
			}
		};
		match self.storage.prune_rollup_exit_roots(&floor).await {
			Ok(0) => {}
			Ok(pruned) => debug!(
				network = self.network_id,
				"Deleted {} superseded rollup exit roots", pruned
			),
			Err(e) => warn!(
				network = self.network_id,
				"Failed to delete superseded rollup exit roots: {}", e
			),
		}
	}

	/// Announce the trusted source's latest global exit root if it is new for this network.
	///
	/// The update is tagged with the current cursor block. Returns whether it was published.
	pub async fn poll_trusted_exit_root(&mut self) -> SyncResult<bool> {
		let Some(source) = self.trusted.clone() else {
			return Ok(false);
		};
		let Some(roots) = source.latest_exit_roots().await? else {
			return Ok(false);
		};
		if self.last_trusted == Some(roots.global_exit_root) {
			return Ok(false);
		}
		let combined = compute_global_exit_root(&roots.mainnet_exit_root, &roots.rollup_exit_root);
		if combined != roots.global_exit_root {
			return Err(SyncError::InvalidResponse(format!(
				"trusted global exit root {} does not match its components",
				short_hash(&roots.global_exit_root)
			)));
		}
		let Some(cursor) = self.storage.get_cursor(self.network_id).await? else {
			return Ok(false);
		};

		let update = GlobalExitRoot {
			network_id: self.network_id,
			mainnet_exit_root: roots.mainnet_exit_root,
			rollup_exit_root: roots.rollup_exit_root,
			global_exit_root: roots.global_exit_root,
			block_number: cursor.number,
			block_hash: cursor.hash,
		};
		self.last_trusted = Some(roots.global_exit_root);
		if !self.controller.is_new_global_exit_root(&update)? {
			return Ok(false);
		}

		let covered = self.controller.resolve_coverage(&update)?;
		info!(
			network = self.network_id,
			global_exit_root = %short_hash(&update.global_exit_root),
			"New trusted global exit root"
		);
		self.channel.publish(ExitRootNotification { update, covered });
		Ok(true)
	}

	fn undo_appends(&self, appended: u64) -> SyncResult<()> {
		if appended == 0 {
			return Ok(());
		}
		self.controller
			.remove_last_deposits(self.network_id, appended)
			.map_err(|e| SyncError::Inconsistent(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::bridgectrl::MerkleTree;
	use crate::exit_root_channel::Received;
	use crate::storage::MemoryStorage;
	use crate::chain::trusted::TrustedExitRoots;
	use crate::test_utils::{
		MockChain, MockTrustedSource, TEST_BRIDGE, claim, claim_log, deposit, deposit_log,
		global_exit_root_log,
	};

	const ROOT: NetworkId = 0;
	const LEAF: NetworkId = 1;

	struct Harness {
		controller: Arc<BridgeController>,
		storage: Arc<MemoryStorage>,
		channel: ExitRootChannel,
	}

	impl Harness {
		fn new() -> Self {
			Self {
				controller: Arc::new(BridgeController::new(32, ROOT, &[LEAF]).unwrap()),
				storage: Arc::new(MemoryStorage::new()),
				channel: ExitRootChannel::new(16, ROOT),
			}
		}

		fn synchronizer(&self, chain: Arc<MockChain>, config: SyncConfig) -> Synchronizer {
			Synchronizer::new(
				chain.id(),
				TEST_BRIDGE,
				config,
				chain,
				self.controller.clone(),
				self.storage.clone(),
				self.channel.clone(),
			)
		}
	}

	fn fast_config() -> SyncConfig {
		SyncConfig {
			poll_interval: Duration::from_millis(10),
			retry_interval: Duration::from_millis(5),
			max_backoff: Duration::from_millis(20),
			..SyncConfig::default()
		}
	}

	fn direct_root(deposits: &[crate::chain::Deposit]) -> crate::chain::Hash {
		let mut tree = MerkleTree::new(32).unwrap();
		for d in deposits {
			tree.append(deposit_leaf_hash(d)).unwrap();
		}
		tree.root()
	}

	#[tokio::test]
	async fn test_syncs_deposits_claims_and_exit_roots() {
		let h = Harness::new();
		let mut subscription = h.channel.subscribe(LEAF);

		let leaf_chain = Arc::new(MockChain::new(LEAF));
		let leaf_deposit = deposit(LEAF, ROOT, 0, 5);
		leaf_chain.push_block(vec![deposit_log(&leaf_deposit)]);
		let mut leaf_sync = h.synchronizer(leaf_chain.clone(), fast_config());
		assert_eq!(
			leaf_sync.sync_once().await.unwrap(),
			SyncProgress::Advanced {
				blocks: 2,
				cursor: 1
			}
		);
		let rollup = h.controller.rollup_exit_root().unwrap();
		let rollups = h.storage.get_rollup_exit_roots().await.unwrap();
		assert!(
			rollups
				.iter()
				.any(|r| r.root == rollup && r.covered.get(&LEAF) == Some(&1))
		);

		let root_chain = Arc::new(MockChain::new(ROOT));
		let d0 = deposit(ROOT, LEAF, 0, 100);
		let d1 = deposit(ROOT, LEAF, 1, 200);
		let mainnet = direct_root(&[d0.clone(), d1.clone()]);
		root_chain.push_block(vec![deposit_log(&d0), deposit_log(&d1)]);
		root_chain.push_block(vec![
			claim_log(&claim(ROOT, LEAF, 0, 2)),
			global_exit_root_log(&mainnet, &rollup),
		]);
		let mut root_sync = h.synchronizer(root_chain.clone(), fast_config());
		assert_eq!(
			root_sync.sync_once().await.unwrap(),
			SyncProgress::Advanced {
				blocks: 3,
				cursor: 2
			}
		);

		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 2);
		assert_eq!(h.controller.current_root(ROOT).unwrap(), mainnet);
		assert_eq!(h.storage.get_deposits(ROOT).await.unwrap().len(), 2);
		assert!(h.storage.get_claim(ROOT, LEAF, 0).await.unwrap().is_some());
		let cursor = h.storage.get_cursor(ROOT).await.unwrap().unwrap();
		assert_eq!(cursor.number, 2);
		assert_eq!(cursor.hash, root_chain.block(2).hash);

		let committed = h.controller.observed_global_exit_root().unwrap().unwrap();
		assert_eq!(
			committed.global_exit_root,
			compute_global_exit_root(&mainnet, &rollup)
		);
		match subscription.recv().await {
			Received::Notification(n) => {
				assert_eq!(n.origin_network(), ROOT);
				assert_eq!(n.covered.get(&ROOT), Some(&2));
				assert_eq!(n.covered.get(&LEAF), Some(&1));
			}
			other => panic!("unexpected {:?}", other),
		}

		assert_eq!(root_sync.sync_once().await.unwrap(), SyncProgress::Idle);
	}

	#[tokio::test]
	async fn test_repeated_exit_root_is_not_republished() {
		let h = Harness::new();
		let mut subscription = h.channel.subscribe(LEAF);
		let chain = Arc::new(MockChain::new(ROOT));
		let mainnet = direct_root(&[]);
		let rollup = h.controller.rollup_exit_root().unwrap();
		chain.push_block(vec![global_exit_root_log(&mainnet, &rollup)]);
		chain.push_block(vec![global_exit_root_log(&mainnet, &rollup)]);

		let mut sync = h.synchronizer(chain, fast_config());
		sync.sync_once().await.unwrap();

		assert!(matches!(subscription.recv().await, Received::Notification(_)));
		h.channel.publish(ExitRootNotification {
			update: crate::test_utils::global_exit_root(LEAF, 99),
			covered: Coverage::new(),
		});
		match subscription.recv().await {
			Received::Notification(n) => assert_eq!(n.observed_at_block(), 99),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_trusted_exit_root_is_announced_before_it_is_mined() {
		let h = Harness::new();
		let root_chain = Arc::new(MockChain::new(ROOT));
		let d0 = deposit(ROOT, LEAF, 0, 100);
		root_chain.push_block(vec![deposit_log(&d0)]);
		h.synchronizer(root_chain, fast_config())
			.sync_once()
			.await
			.unwrap();

		let leaf_chain = Arc::new(MockChain::new(LEAF));
		let source = Arc::new(MockTrustedSource::default());
		let mut leaf_sync = h
			.synchronizer(leaf_chain.clone(), fast_config())
			.with_trusted_source(source.clone());
		let mut subscription = h.channel.subscribe(LEAF);

		// nothing to announce before the first block is processed
		source.set(direct_root(&[d0.clone()]), h.controller.rollup_exit_root().unwrap());
		assert!(!leaf_sync.poll_trusted_exit_root().await.unwrap());
		leaf_sync.sync_once().await.unwrap();

		assert!(leaf_sync.poll_trusted_exit_root().await.unwrap());
		match subscription.recv().await {
			Received::Notification(n) => {
				assert_eq!(n.origin_network(), LEAF);
				assert_eq!(n.observed_at_block(), 0);
				assert_eq!(n.covered.get(&ROOT), Some(&1));
			}
			other => panic!("unexpected {:?}", other),
		}
		// announced once, never persisted
		assert!(!leaf_sync.poll_trusted_exit_root().await.unwrap());
		assert!(h.storage.latest_global_exit_root(LEAF).await.unwrap().is_none());
		assert!(h.controller.observed_global_exit_root_on(LEAF).unwrap().is_none());
	}

	#[tokio::test]
	async fn test_trusted_exit_root_must_match_its_components() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(LEAF));
		let source = Arc::new(MockTrustedSource::default());
		let mut sync = h
			.synchronizer(chain, fast_config())
			.with_trusted_source(source.clone());
		sync.sync_once().await.unwrap();

		source.set_raw(TrustedExitRoots {
			global_exit_root: [9; 32],
			mainnet_exit_root: [1; 32],
			rollup_exit_root: [2; 32],
		});
		let err = sync.poll_trusted_exit_root().await.unwrap_err();
		assert!(matches!(err, SyncError::InvalidResponse(_)));

		source.set_failing(true);
		assert!(sync.poll_trusted_exit_root().await.unwrap_err().is_transient());
	}

	#[tokio::test]
	async fn test_committed_exit_roots_prune_rollup_history() {
		let h = Harness::new();
		let leaf_chain = Arc::new(MockChain::new(LEAF));
		leaf_chain.push_block(vec![deposit_log(&deposit(LEAF, ROOT, 0, 1))]);
		leaf_chain.push_block(vec![deposit_log(&deposit(LEAF, ROOT, 1, 1))]);
		let mut leaf_sync = h.synchronizer(leaf_chain.clone(), fast_config());
		leaf_sync.sync_once().await.unwrap();
		assert_eq!(h.storage.get_rollup_exit_roots().await.unwrap().len(), 2);

		// both networks observe the rollup root covering two leaf deposits
		let mainnet = direct_root(&[]);
		let rollup = h.controller.rollup_exit_root().unwrap();
		let root_chain = Arc::new(MockChain::new(ROOT));
		root_chain.push_block(vec![global_exit_root_log(&mainnet, &rollup)]);
		h.synchronizer(root_chain, fast_config())
			.sync_once()
			.await
			.unwrap();
		leaf_chain.push_block(vec![global_exit_root_log(&mainnet, &rollup)]);
		leaf_sync.sync_once().await.unwrap();

		let remaining = h.storage.get_rollup_exit_roots().await.unwrap();
		assert_eq!(remaining.len(), 1);
		assert_eq!(remaining[0].root, rollup);
	}

	#[tokio::test]
	async fn test_respects_start_block_chunks_and_confirmations() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(ROOT));
		chain.push_empty_blocks(20);
		let config = SyncConfig {
			start_block: 5,
			chunk_size: 4,
			confirmation_depth: 3,
			..fast_config()
		};
		let mut sync = h.synchronizer(chain.clone(), config);

		assert_eq!(
			sync.sync_once().await.unwrap(),
			SyncProgress::Advanced {
				blocks: 4,
				cursor: 8
			}
		);
		assert!(h.storage.get_block(ROOT, 4).await.unwrap().is_none());
		while sync.sync_once().await.unwrap() != SyncProgress::Idle {}
		assert_eq!(h.storage.get_cursor(ROOT).await.unwrap().unwrap().number, 17);
		assert!(sync.progress().check_for_gaps().is_empty());
	}

	#[tokio::test]
	async fn test_root_reorg_rolls_back_to_fork_point() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(ROOT));
		chain.push_empty_blocks(500);
		let d0 = deposit(ROOT, LEAF, 0, 1);
		let d1 = deposit(ROOT, LEAF, 1, 2);
		chain.set_logs(499, vec![deposit_log(&d0)]);
		chain.set_logs(500, vec![deposit_log(&d1)]);

		let config = SyncConfig {
			chunk_size: 1000,
			..fast_config()
		};
		let mut sync = h.synchronizer(chain.clone(), config);
		sync.sync_once().await.unwrap();
		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 2);

		chain.reorg(499, 2, 1);
		let replacement = deposit(ROOT, LEAF, 0, 77);
		chain.set_logs(500, vec![deposit_log(&replacement)]);
		chain.push_block(Vec::new());

		assert_eq!(
			sync.sync_once().await.unwrap(),
			SyncProgress::RolledBack {
				fork_point: Some(498),
				deposits: 2
			}
		);
		assert_eq!(h.storage.get_cursor(ROOT).await.unwrap().unwrap().number, 498);
		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 0);

		assert_eq!(
			sync.sync_once().await.unwrap(),
			SyncProgress::Advanced {
				blocks: 3,
				cursor: 501
			}
		);
		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 1);
		assert_eq!(
			h.controller.current_root(ROOT).unwrap(),
			direct_root(&[replacement])
		);
		let stored = h.storage.get_deposit(ROOT, 0).await.unwrap().unwrap();
		assert_eq!(stored.amount, crate::chain::U256::from(77u32));
		assert_eq!(stored.block_number, 500);
	}

	#[tokio::test]
	async fn test_deep_reorg_is_fatal() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(ROOT));
		chain.push_empty_blocks(10);
		let config = SyncConfig {
			max_rollback_depth: 2,
			..fast_config()
		};
		let mut sync = h.synchronizer(chain.clone(), config);
		sync.sync_once().await.unwrap();

		chain.reorg(6, 6, 1);
		let err = sync.sync(CancellationToken::new()).await.unwrap_err();
		assert!(matches!(err, SyncError::DeepReorg { cursor: 10, .. }));
		assert_eq!(h.storage.get_cursor(ROOT).await.unwrap().unwrap().number, 10);
	}

	#[tokio::test]
	async fn test_transient_errors_never_advance_the_cursor() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(ROOT));
		chain.push_block(vec![deposit_log(&deposit(ROOT, LEAF, 0, 1))]);
		let config = SyncConfig {
			start_block: 1,
			..fast_config()
		};
		let mut sync = h.synchronizer(chain.clone(), config);

		chain.fail_next_calls(1);
		let err = sync.sync_once().await.unwrap_err();
		assert!(err.is_transient());
		assert!(h.storage.get_cursor(ROOT).await.unwrap().is_none());

		h.storage.fail_next_writes(1);
		let err = sync.sync_once().await.unwrap_err();
		assert!(matches!(err, SyncError::Storage(_)));
		assert!(err.is_transient());
		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 0);

		sync.sync_once().await.unwrap();
		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 1);
		assert_eq!(h.storage.get_cursor(ROOT).await.unwrap().unwrap().number, 1);
	}

	#[tokio::test]
	async fn test_out_of_order_deposit_is_fatal_and_leaves_tree_untouched() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(ROOT));
		chain.push_block(vec![
			deposit_log(&deposit(ROOT, LEAF, 0, 1)),
			deposit_log(&deposit(ROOT, LEAF, 2, 1)),
		]);
		let mut sync = h.synchronizer(chain, fast_config());

		let err = sync.sync_once().await.unwrap_err();
		assert!(!err.is_transient());
		assert_eq!(h.controller.deposit_count(ROOT).unwrap(), 0);
		assert_eq!(h.storage.get_cursor(ROOT).await.unwrap().unwrap().number, 0);
	}

	#[tokio::test]
	async fn test_sync_loop_retries_until_cancelled() {
		let h = Harness::new();
		let chain = Arc::new(MockChain::new(ROOT));
		chain.push_empty_blocks(5);
		chain.fail_next_calls(3);
		let mut sync = h.synchronizer(chain.clone(), fast_config());

		let cancel = CancellationToken::new();
		let handle = {
			let cancel = cancel.clone();
			tokio::spawn(async move { sync.sync(cancel).await })
		};

		let storage = h.storage.clone();
		tokio::time::timeout(Duration::from_secs(5), async move {
			loop {
				if let Some(cursor) = storage.get_cursor(ROOT).await.unwrap() {
					if cursor.number == 5 {
						break;
					}
				}
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.unwrap();

		cancel.cancel();
		handle.await.unwrap().unwrap();
	}
}

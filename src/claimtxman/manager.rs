//! Claim transaction manager for one destination network.
//!
//! The manager turns claimable deposits into confirmed `claimAsset` transactions. Each deposit
//! gets exactly one [`MonitoredTx`], which walks `Discovered -> Built -> Submitted -> Confirmed`,
//! looping through `Dropped` with a bumped gas price until the retry or age budget runs out.
//! Every broadcast counts against the retry budget, including those the node refuses.
//! Every transition is written to storage before the chain call that depends on it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gas::next_gas_price;
use super::types::{
	ClaimTxConfig, ClaimTxError, ClaimTxResult, DepositKey, MonitoredTx, MonitoredTxStatus,
};
use crate::bridgectrl::{BridgeController, Coverage};
use crate::chain::contract::encode_claim_asset;
use crate::chain::{
	Address, ChainAccess, ChainError, Claim, ClaimTx, GlobalExitRoot, Hash, NetworkId, TxStatus,
};
use crate::exit_root_channel::{ExitRootSubscription, Received};
use crate::storage::{BridgeStorage, EventRepository, MonitoredTxRepository, StorageError};
use crate::utils::short_hash;

/// Claims deposits destined to one leaf network.
pub struct ClaimTxManager {
	network_id: NetworkId,
	/// Bridge contract the claims are sent to
	bridge_address: Address,
	config: ClaimTxConfig,
	chain: Arc<dyn ChainAccess>,
	controller: Arc<BridgeController>,
	storage: Arc<dyn BridgeStorage>,
}

impl ClaimTxManager {
	pub fn new(
		network_id: NetworkId,
		bridge_address: Address,
		config: ClaimTxConfig,
		chain: Arc<dyn ChainAccess>,
		controller: Arc<BridgeController>,
		storage: Arc<dyn BridgeStorage>,
	) -> Self {
		Self {
			network_id,
			bridge_address,
			config,
			chain,
			controller,
			storage,
		}
	}

	pub fn network_id(&self) -> NetworkId {
		self.network_id
	}

	/// Run until cancelled, reacting to exit-root notifications and polling pending claims.
	pub async fn run(&self, mut subscription: ExitRootSubscription, cancel: CancellationToken) {
		info!(network = self.network_id, "Starting claim manager");

		self.log_failure("resume", self.process_pending().await);
		self.log_failure("rescan", self.rescan().await);

		let mut ticker = tokio::time::interval(self.config.poll_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		let mut listening = true;

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				received = subscription.recv(), if listening => match received {
					Received::Notification(notification) => {
						let discovered = self
							.discover(&notification.update, &notification.covered)
							.await;
						self.log_failure("discovery", discovered);
						self.log_failure("monitor", self.process_pending().await);
					}
					Received::Lagged(missed) => {
						warn!(
							network = self.network_id,
							"Missed {} exit root notifications, rescanning", missed
						);
						self.log_failure("rescan", self.rescan().await);
					}
					Received::Closed => {
						warn!(network = self.network_id, "Exit root channel closed");
						listening = false;
					}
				},
				_ = ticker.tick() => {
					self.log_failure("monitor", self.process_pending().await);
				}
			}
		}

		info!(network = self.network_id, "Claim manager stopped");
	}

	fn log_failure<T>(&self, step: &str, result: ClaimTxResult<T>) {
		if let Err(e) = result {
			if e.is_transient() {
				warn!(network = self.network_id, "Claim {} failed, will retry: {}", step, e);
			} else {
				error!(network = self.network_id, "Claim {} failed: {}", step, e);
			}
		}
	}

	/// Re-run discovery against the latest stored exit roots of this network and the root network.
	pub async fn rescan(&self) -> ClaimTxResult<usize> {
		let mut networks = vec![self.network_id];
		if self.controller.root_network() != self.network_id {
			networks.push(self.controller.root_network());
		}

		let mut discovered = 0;
		for network in networks {
			if let Some(update) = self.storage.latest_global_exit_root(network).await? {
				let covered = self.controller.resolve_coverage(&update)?;
				discovered += self.discover(&update, &covered).await?;
			}
		}
		if discovered > 0 {
			self.process_pending().await?;
		}
		Ok(discovered)
	}

	/// Create monitored transactions for deposits to this network that `update` makes provable.
	///
	/// Returns how many monitored transactions were created.
	pub async fn discover(&self, update: &GlobalExitRoot, covered: &Coverage) -> ClaimTxResult<usize> {
		let mut created = 0;
		for (origin, size) in covered {
			if *origin == self.network_id || *size == 0 {
				continue;
			}
			let deposits = self
				.storage
				.get_unclaimed_deposits(*origin, self.network_id, *size)
				.await?;

			for deposit in deposits {
				let key = DepositKey {
					destination_network: self.network_id,
					origin_network: *origin,
					deposit_count: deposit.deposit_count,
				};
				let mut tx = MonitoredTx::new(key, update, *size, self.bridge_address);
				if self
					.storage
					.get_claim(self.network_id, *origin, deposit.deposit_count)
					.await?
					.is_some()
				{
					debug!(network = self.network_id, deposit = %key, "Deposit already claimed");
					tx.mark_confirmed(None);
				}

				match self.storage.insert_monitored_tx(&tx).await {
					Ok(()) => {
						created += 1;
						info!(
							network = self.network_id,
							deposit = %key,
							global_exit_root = %short_hash(&update.global_exit_root),
							status = %tx.status,
							"Tracking claim"
						);
					}
					Err(StorageError::Duplicate(_)) => {}
					Err(e) => return Err(e.into()),
				}
			}
		}
		Ok(created)
	}

	/// Advance every non-terminal monitored transaction of this network by one step.
	pub async fn process_pending(&self) -> ClaimTxResult<()> {
		let pending = self.storage.get_pending_monitored_txs(self.network_id).await?;
		for mut tx in pending {
			let key = tx.key;
			if let Err(e) = self.advance(&mut tx).await {
				if e.is_transient() {
					warn!(network = self.network_id, deposit = %key, "Claim step failed: {}", e);
				} else {
					tx.mark_failed(e.to_string());
					self.storage.update_monitored_tx(&tx).await?;
					error!(network = self.network_id, deposit = %key, "Claim failed: {}", e);
				}
			}
		}
		Ok(())
	}

	async fn advance(&self, tx: &mut MonitoredTx) -> ClaimTxResult<()> {
		let now = chrono::Utc::now().timestamp();
		if tx.age_secs(now) > self.config.max_age.as_secs() as i64 {
			return self.fail(tx, "claim exceeded its maximum age").await;
		}

		if tx.status == MonitoredTxStatus::Submitted {
			self.poll(tx, now).await?;
		}

		if matches!(
			tx.status,
			MonitoredTxStatus::Discovered | MonitoredTxStatus::Dropped | MonitoredTxStatus::Built
		) && tx.submissions() >= self.config.max_retries
		{
			let reason = format!(
				"gave up after {} submissions: {}",
				tx.submissions(),
				tx.last_error.as_deref().unwrap_or("not confirmed")
			);
			return self.fail(tx, &reason).await;
		}

		if matches!(
			tx.status,
			MonitoredTxStatus::Discovered | MonitoredTxStatus::Dropped
		) {
			self.build(tx).await?;
		}

		if tx.status == MonitoredTxStatus::Built {
			self.submit(tx).await?;
		}
		Ok(())
	}

	async fn fail(&self, tx: &mut MonitoredTx, reason: &str) -> ClaimTxResult<()> {
		tx.mark_failed(reason.to_string());
		self.storage.update_monitored_tx(tx).await?;
		error!(
			network = self.network_id,
			deposit = %tx.key,
			submissions = tx.submissions(),
			"Claim failed: {}",
			reason
		);
		Ok(())
	}

	/// `Discovered`/`Dropped -> Built`: proof, call data and gas price.
	async fn build(&self, tx: &mut MonitoredTx) -> ClaimTxResult<()> {
		let key = tx.key;
		let deposit = self
			.storage
			.get_deposit(key.origin_network, key.deposit_count)
			.await?
			.ok_or(ClaimTxError::MissingDeposit(key))?;
		let proof = self
			.controller
			.get_proof_at(key.origin_network, key.deposit_count, tx.tree_size)?;
		let call_data =
			encode_claim_asset(&proof, &deposit, &tx.mainnet_exit_root, &tx.rollup_exit_root);

		let fee = self.chain.estimate_fee().await?;
		let previous = (tx.gas_price > 0).then_some(tx.gas_price);
		let gas_price = next_gas_price(
			fee.gas_price,
			previous,
			self.config.gas_bump_percent,
			self.config.max_gas_price,
		);

		tx.mark_built(call_data, gas_price, fee.gas_limit);
		self.storage.update_monitored_tx(tx).await?;
		debug!(
			network = self.network_id,
			deposit = %key,
			gas_price,
			"Built claim"
		);
		Ok(())
	}

	/// `Built -> Submitted`, or `Dropped` when the node wants a higher price. A refused broadcast
	/// still uses up one submission.
	async fn submit(&self, tx: &mut MonitoredTx) -> ClaimTxResult<()> {
		let key = tx.key;
		if let Some(claim) = self
			.storage
			.get_claim(self.network_id, key.origin_network, key.deposit_count)
			.await?
		{
			info!(network = self.network_id, deposit = %key, "Deposit claimed by someone else");
			tx.mark_confirmed(None);
			self.storage.confirm_monitored_tx(tx, &claim).await?;
			return Ok(());
		}

		let request = ClaimTx {
			to: tx.to,
			data: tx.call_data.clone(),
			gas_price: tx.gas_price,
			gas_limit: tx.gas_limit,
			nonce: tx.nonce,
		};
		match self.chain.sign_and_send(&request).await {
			Ok(sent) => {
				tx.mark_submitted(sent);
				self.storage.update_monitored_tx(tx).await?;
				info!(
					network = self.network_id,
					deposit = %key,
					tx_hash = %short_hash(&sent.hash),
					nonce = sent.nonce,
					gas_price = tx.gas_price,
					attempt = tx.attempts.len(),
					"Submitted claim"
				);
				Ok(())
			}
			Err(e) => {
				tx.mark_send_failed(e.to_string());
				if let ChainError::Underpriced(reason) = &e {
					warn!(
						network = self.network_id,
						deposit = %key,
						gas_price = tx.gas_price,
						submissions = tx.submissions(),
						"Claim underpriced: {}",
						reason
					);
					tx.mark_dropped(format!("underpriced: {}", reason));
					self.storage.update_monitored_tx(tx).await?;
					return Ok(());
				}
				self.storage.update_monitored_tx(tx).await?;
				Err(e.into())
			}
		}
	}

	/// Check the latest submission of a `Submitted` transaction.
	async fn poll(&self, tx: &mut MonitoredTx, now: i64) -> ClaimTxResult<()> {
		let Some(attempt) = tx.latest_attempt().cloned() else {
			tx.mark_dropped("no submission recorded".to_string());
			self.storage.update_monitored_tx(tx).await?;
			return Ok(());
		};

		match self.chain.tx_status(&attempt.hash).await? {
			TxStatus::Confirmed {
				block_number,
				gas_used,
			} => self.confirm(tx, attempt.hash, block_number, gas_used).await,
			TxStatus::Pending => {
				let waited = tx.seconds_since_submission(now).unwrap_or(0);
				if waited >= self.config.tx_timeout.as_secs() as i64 {
					warn!(
						network = self.network_id,
						deposit = %tx.key,
						tx_hash = %short_hash(&attempt.hash),
						"Claim pending for {}s, replacing it",
						waited
					);
					tx.mark_dropped(format!("pending for {}s", waited));
					self.storage.update_monitored_tx(tx).await?;
				}
				Ok(())
			}
			TxStatus::Reverted { block_number } => {
				let reason = format!("claim reverted in block {}", block_number);
				self.fail(tx, &reason).await
			}
			status @ (TxStatus::Dropped | TxStatus::Underpriced) => {
				warn!(
					network = self.network_id,
					deposit = %tx.key,
					tx_hash = %short_hash(&attempt.hash),
					"Claim {:?} by the node",
					status
				);
				tx.mark_dropped(format!("{:?}", status).to_lowercase());
				self.storage.update_monitored_tx(tx).await?;
				Ok(())
			}
		}
	}

	async fn confirm(
		&self,
		tx: &mut MonitoredTx,
		tx_hash: Hash,
		block_number: u64,
		gas_used: u64,
	) -> ClaimTxResult<()> {
		let key = tx.key;
		let deposit = self
			.storage
			.get_deposit(key.origin_network, key.deposit_count)
			.await?
			.ok_or(ClaimTxError::MissingDeposit(key))?;
		let block_hash = self.chain.block_hash(block_number).await?.unwrap_or_default();
		let claim = Claim {
			network_id: self.network_id,
			origin_network: key.origin_network,
			deposit_count: key.deposit_count,
			token_address: deposit.token_address,
			destination_address: deposit.destination_address,
			amount: deposit.amount,
			block_number,
			block_hash,
			tx_hash,
		};

		tx.mark_confirmed(Some(gas_used));
		self.storage.confirm_monitored_tx(tx, &claim).await?;
		info!(
			network = self.network_id,
			deposit = %key,
			tx_hash = %short_hash(&tx_hash),
			block = block_number,
			gas_used,
			"Claim confirmed"
		);
		Ok(())
	}
}

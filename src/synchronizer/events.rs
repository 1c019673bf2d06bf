//! Decoding of bridge-contract logs into bridge events.
//!
//! Logs are matched on the emitting contract and on `topics[0]`. Logs of other contracts and
//! unknown topics are skipped; a known topic whose payload does not decode is an error, since the
//! event log would otherwise silently diverge from the chain.

use tracing::trace;

use super::types::{SyncError, SyncResult};
use crate::bridgectrl::compute_global_exit_root;
pub use crate::chain::contract::DecodeError;
use crate::chain::contract::{
	CLAIM_EVENT_TOPIC, DEPOSIT_EVENT_TOPIC, GLOBAL_EXIT_ROOT_EVENT_TOPIC, decode_claim_event,
	decode_deposit_event, decode_global_exit_root_event,
};
use crate::chain::{
	Address, Block, BridgeEvent, Claim, Deposit, GlobalExitRoot, NetworkId, RawLog,
};

/// Decodes the logs of one network's bridge contract.
#[derive(Debug, Clone, Copy)]
pub struct EventDecoder {
	network_id: NetworkId,
	bridge_address: Address,
}

impl EventDecoder {
	pub fn new(network_id: NetworkId, bridge_address: Address) -> Self {
		Self {
			network_id,
			bridge_address,
		}
	}

	/// Bridge events of `block` in log order.
	pub fn decode_block(&self, block: &Block) -> SyncResult<Vec<BridgeEvent>> {
		let mut events = Vec::new();
		for log in &block.logs {
			if log.address != self.bridge_address {
				continue;
			}
			match self.decode_log(block, log) {
				Ok(Some(event)) => events.push(event),
				Ok(None) => trace!(
					network = self.network_id,
					block = block.number,
					log_index = log.log_index,
					"Skipping log with unknown topic"
				),
				Err(source) => {
					return Err(SyncError::Decode {
						block_number: block.number,
						log_index: log.log_index,
						source,
					});
				}
			}
		}
		Ok(events)
	}

	fn decode_log(&self, block: &Block, log: &RawLog) -> Result<Option<BridgeEvent>, DecodeError> {
		let Some(topic) = log.topics.first() else {
			return Ok(None);
		};

		if *topic == *DEPOSIT_EVENT_TOPIC {
			self.decode_deposit(block, log).map(|d| Some(BridgeEvent::Deposit(d)))
		} else if *topic == *CLAIM_EVENT_TOPIC {
			self.decode_claim(block, log).map(|c| Some(BridgeEvent::Claim(c)))
		} else if *topic == *GLOBAL_EXIT_ROOT_EVENT_TOPIC {
			self.decode_global_exit_root(block, log)
				.map(|g| Some(BridgeEvent::GlobalExitRoot(g)))
		} else {
			Ok(None)
		}
	}

	fn decode_deposit(&self, block: &Block, log: &RawLog) -> Result<Deposit, DecodeError> {
		let event = decode_deposit_event(&log.data)?;
		Ok(Deposit {
			origin_network: self.network_id,
			leaf_type: event.leaf_type,
			token_network: event.token_network,
			token_address: event.token_address,
			destination_network: event.destination_network,
			destination_address: event.destination_address,
			amount: event.amount,
			metadata: event.metadata,
			deposit_count: event.deposit_count,
			block_number: block.number,
			block_hash: block.hash,
			tx_hash: log.tx_hash,
		})
	}

	fn decode_claim(&self, block: &Block, log: &RawLog) -> Result<Claim, DecodeError> {
		let event = decode_claim_event(&log.data)?;
		Ok(Claim {
			network_id: self.network_id,
			deposit_count: event.deposit_count,
			origin_network: event.origin_network,
			token_address: event.token_address,
			destination_address: event.destination_address,
			amount: event.amount,
			block_number: block.number,
			block_hash: block.hash,
			tx_hash: log.tx_hash,
		})
	}

	fn decode_global_exit_root(
		&self,
		block: &Block,
		log: &RawLog,
	) -> Result<GlobalExitRoot, DecodeError> {
		let (mainnet, rollup) = decode_global_exit_root_event(&log.topics)?;
		Ok(GlobalExitRoot {
			network_id: self.network_id,
			mainnet_exit_root: mainnet,
			rollup_exit_root: rollup,
			global_exit_root: compute_global_exit_root(&mainnet, &rollup),
			block_number: block.number,
			block_hash: block.hash,
		})
	}
}

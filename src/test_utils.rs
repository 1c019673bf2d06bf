//! Test helpers: a scripted in-memory chain and builders for events and logs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use ethers::abi::{self, Token};

use crate::bridgectrl::compute_global_exit_root;
use crate::chain::contract::{
	CLAIM_EVENT_TOPIC, DEPOSIT_EVENT_TOPIC, GLOBAL_EXIT_ROOT_EVENT_TOPIC, encode_deposit_event,
};
use crate::chain::trusted::{TrustedExitRootSource, TrustedExitRoots};
use crate::chain::{
	Address, Block, ChainAccess, ChainError, Claim, ClaimTx, Deposit, FeeParams, GlobalExitRoot,
	Hash, NetworkId, RawLog, SentTx, TxStatus, U256,
};
use crate::storage::BlockRecord;
use crate::utils::keccak256;

/// Bridge contract address used by every test chain.
pub const TEST_BRIDGE: Address = [0xb1; 20];

/// Deterministic block hash; `fork` distinguishes competing branches.
pub fn block_hash(network: NetworkId, number: u64, fork: u8) -> Hash {
	let mut buf = Vec::with_capacity(13);
	buf.extend_from_slice(&network.to_be_bytes());
	buf.extend_from_slice(&number.to_be_bytes());
	buf.push(fork);
	keccak256(&buf)
}

pub fn block_record(network: NetworkId, number: u64) -> BlockRecord {
	BlockRecord {
		network_id: network,
		number,
		hash: block_hash(network, number, 0),
		parent_hash: block_hash(network, number.wrapping_sub(1), 0),
		timestamp: 1_700_000_000 + number,
	}
}

pub fn deposit(origin: NetworkId, destination: NetworkId, count: u32, amount: u128) -> Deposit {
	Deposit {
		origin_network: origin,
		destination_network: destination,
		destination_address: [0xd0 + destination as u8; 20],
		token_network: 0,
		token_address: [0; 20],
		amount: U256::from(amount),
		metadata: Vec::new(),
		leaf_type: 0,
		deposit_count: count,
		block_number: 1,
		block_hash: block_hash(origin, 1, 0),
		tx_hash: keccak256(&[origin as u8, count as u8, 0xdd]),
	}
}

pub fn claim(network: NetworkId, origin: NetworkId, count: u32, block_number: u64) -> Claim {
	Claim {
		network_id: network,
		origin_network: origin,
		deposit_count: count,
		token_address: [0; 20],
		destination_address: [0xd0 + network as u8; 20],
		amount: U256::one(),
		block_number,
		block_hash: block_hash(network, block_number, 0),
		tx_hash: keccak256(&[network as u8, count as u8, 0xcc]),
	}
}

pub fn global_exit_root(network: NetworkId, block_number: u64) -> GlobalExitRoot {
	let mainnet = keccak256(&block_number.to_be_bytes());
	let rollup = keccak256(&mainnet);
	GlobalExitRoot {
		network_id: network,
		mainnet_exit_root: mainnet,
		rollup_exit_root: rollup,
		global_exit_root: compute_global_exit_root(&mainnet, &rollup),
		block_number,
		block_hash: block_hash(network, block_number, 0),
	}
}

fn log(topics: Vec<Hash>, data: Vec<u8>, tx_hash: Hash) -> RawLog {
	RawLog {
		address: TEST_BRIDGE,
		topics,
		data,
		log_index: 0,
		tx_hash,
	}
}

pub fn deposit_log(d: &Deposit) -> RawLog {
	log(vec![*DEPOSIT_EVENT_TOPIC], encode_deposit_event(d), d.tx_hash)
}

pub fn claim_log(c: &Claim) -> RawLog {
	let data = abi::encode(&[
		Token::Uint(c.deposit_count.into()),
		Token::Uint(c.origin_network.into()),
		Token::Address(c.token_address.into()),
		Token::Address(c.destination_address.into()),
		Token::Uint(c.amount),
	]);
	log(vec![*CLAIM_EVENT_TOPIC], data, c.tx_hash)
}

pub fn global_exit_root_log(mainnet: &Hash, rollup: &Hash) -> RawLog {
	log(
		vec![*GLOBAL_EXIT_ROOT_EVENT_TOPIC, *mainnet, *rollup],
		Vec::new(),
		keccak256(&[mainnet.as_slice(), rollup.as_slice()].concat()),
	)
}

/// How the mock node treats broadcast claim transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxBehavior {
	/// Confirm once the status was polled this many times
	ConfirmAfterPolls(u32),
	/// Report every transaction as pending forever
	NeverConfirm,
	/// Report every transaction as dropped
	Drop,
	/// Mine every transaction with a failed status
	Revert,
}

struct MockState {
	blocks: Vec<Block>,
	transient_failures: usize,
	failing_sends: usize,
	sent: Vec<ClaimTx>,
	polls: HashMap<Hash, u32>,
	behavior: TxBehavior,
	fee: FeeParams,
	min_gas_price: u128,
	next_nonce: u64,
}

/// Scripted chain with a canonical block list starting at block 0.
pub struct MockChain {
	network_id: NetworkId,
	state: Mutex<MockState>,
}

impl MockChain {
	pub fn new(network_id: NetworkId) -> Self {
		let genesis = Block {
			number: 0,
			hash: block_hash(network_id, 0, 0),
			parent_hash: [0; 32],
			timestamp: 1_700_000_000,
			logs: Vec::new(),
		};
		Self {
			network_id,
			state: Mutex::new(MockState {
				blocks: vec![genesis],
				transient_failures: 0,
				failing_sends: 0,
				sent: Vec::new(),
				polls: HashMap::new(),
				behavior: TxBehavior::ConfirmAfterPolls(1),
				fee: FeeParams {
					gas_price: 1_000,
					gas_limit: 300_000,
				},
				min_gas_price: 0,
				next_nonce: 0,
			}),
		}
	}

	pub fn id(&self) -> NetworkId {
		self.network_id
	}

	/// Append a block carrying `logs` on the current branch and return its number.
	pub fn push_block(&self, logs: Vec<RawLog>) -> u64 {
		let mut state = self.state.lock().unwrap();
		let parent = state.blocks.last().unwrap().clone();
		let number = parent.number + 1;
		let fork = fork_of(&state.blocks, self.network_id);
		let mut logs = logs;
		for (i, l) in logs.iter_mut().enumerate() {
			l.log_index = i as u32;
		}
		state.blocks.push(Block {
			number,
			hash: block_hash(self.network_id, number, fork),
			parent_hash: parent.hash,
			timestamp: parent.timestamp + 1,
			logs,
		});
		number
	}

	/// Append `count` empty blocks.
	pub fn push_empty_blocks(&self, count: u64) {
		for _ in 0..count {
			self.push_block(Vec::new());
		}
	}

	/// Replace every block from `from` onward with a new branch tagged `fork`, `len` blocks long.
	pub fn reorg(&self, from: u64, len: u64, fork: u8) {
		let mut state = self.state.lock().unwrap();
		state.blocks.truncate(from as usize);
		for number in from..from + len {
			let parent_hash = state.blocks[number as usize - 1].hash;
			state.blocks.push(Block {
				number,
				hash: block_hash(self.network_id, number, fork),
				parent_hash,
				timestamp: 1_700_000_000 + number,
				logs: Vec::new(),
			});
		}
	}

	/// Put `logs` into the existing block `number` (used to script reorged branches).
	pub fn set_logs(&self, number: u64, logs: Vec<RawLog>) {
		let mut state = self.state.lock().unwrap();
		state.blocks[number as usize].logs = logs;
	}

	pub fn block(&self, number: u64) -> Block {
		self.state.lock().unwrap().blocks[number as usize].clone()
	}

	pub fn head(&self) -> u64 {
		self.state.lock().unwrap().blocks.len() as u64 - 1
	}

	pub fn fail_next_calls(&self, count: usize) {
		self.state.lock().unwrap().transient_failures = count;
	}

	/// Make the next `count` broadcasts fail with a transport error.
	pub fn fail_next_sends(&self, count: usize) {
		self.state.lock().unwrap().failing_sends = count;
	}

	pub fn set_tx_behavior(&self, behavior: TxBehavior) {
		self.state.lock().unwrap().behavior = behavior;
	}

	pub fn set_min_gas_price(&self, price: u128) {
		self.state.lock().unwrap().min_gas_price = price;
	}

	pub fn sent_txs(&self) -> Vec<ClaimTx> {
		self.state.lock().unwrap().sent.clone()
	}

	fn check_failure(&self) -> Result<(), ChainError> {
		let mut state = self.state.lock().unwrap();
		if state.transient_failures > 0 {
			state.transient_failures -= 1;
			return Err(ChainError::Transport("connection reset".to_string()));
		}
		Ok(())
	}
}

/// Fork tag of the current branch tip, so appended blocks stay on the same branch.
fn fork_of(blocks: &[Block], network: NetworkId) -> u8 {
	let tip = &blocks[blocks.len() - 1];
	(0..=u8::MAX)
		.find(|fork| block_hash(network, tip.number, *fork) == tip.hash)
		.unwrap_or(0)
}

#[async_trait]
impl ChainAccess for MockChain {
	async fn network_id(&self) -> Result<NetworkId, ChainError> {
		Ok(self.network_id)
	}

	async fn latest_block_number(&self) -> Result<u64, ChainError> {
		self.check_failure()?;
		Ok(self.head())
	}

	async fn blocks_since(&self, after: Option<u64>, up_to: u64) -> Result<Vec<Block>, ChainError> {
		self.check_failure()?;
		let state = self.state.lock().unwrap();
		Ok(state
			.blocks
			.iter()
			.filter(|b| after.is_none_or(|a| b.number > a) && b.number <= up_to)
			.cloned()
			.collect())
	}

	async fn block_hash(&self, number: u64) -> Result<Option<Hash>, ChainError> {
		self.check_failure()?;
		let state = self.state.lock().unwrap();
		Ok(state.blocks.get(number as usize).map(|b| b.hash))
	}

	async fn sign_and_send(&self, tx: &ClaimTx) -> Result<SentTx, ChainError> {
		let mut state = self.state.lock().unwrap();
		state.sent.push(tx.clone());
		if state.failing_sends > 0 {
			state.failing_sends -= 1;
			return Err(ChainError::Transport("connection reset".to_string()));
		}
		if tx.gas_price < state.min_gas_price {
			return Err(ChainError::Underpriced(format!(
				"gas price {} below {}",
				tx.gas_price, state.min_gas_price
			)));
		}
		let nonce = tx.nonce.unwrap_or(state.next_nonce);
		state.next_nonce = state.next_nonce.max(nonce + 1);
		let mut preimage = tx.data.clone();
		preimage.extend_from_slice(&tx.gas_price.to_be_bytes());
		preimage.extend_from_slice(&(state.sent.len() as u64).to_be_bytes());
		Ok(SentTx {
			hash: keccak256(&preimage),
			nonce,
		})
	}

	async fn tx_status(&self, hash: &Hash) -> Result<TxStatus, ChainError> {
		let mut state = self.state.lock().unwrap();
		let behavior = state.behavior;
		let head = state.blocks.len() as u64 - 1;
		let polls = state.polls.entry(*hash).or_insert(0);
		*polls += 1;
		Ok(match behavior {
			TxBehavior::ConfirmAfterPolls(n) if *polls >= n => TxStatus::Confirmed {
				block_number: head,
				gas_used: 55_000,
			},
			TxBehavior::ConfirmAfterPolls(_) | TxBehavior::NeverConfirm => TxStatus::Pending,
			TxBehavior::Drop => TxStatus::Dropped,
			TxBehavior::Revert => TxStatus::Reverted { block_number: head },
		})
	}

	async fn estimate_fee(&self) -> Result<FeeParams, ChainError> {
		Ok(self.state.lock().unwrap().fee)
	}
}

/// Trusted exit-root source answering with whatever was last set.
#[derive(Default)]
pub struct MockTrustedSource {
	latest: Mutex<Option<TrustedExitRoots>>,
	failing: Mutex<bool>,
}

impl MockTrustedSource {
	pub fn set(&self, mainnet: Hash, rollup: Hash) {
		*self.latest.lock().unwrap() = Some(TrustedExitRoots {
			global_exit_root: compute_global_exit_root(&mainnet, &rollup),
			mainnet_exit_root: mainnet,
			rollup_exit_root: rollup,
		});
	}

	pub fn set_raw(&self, roots: TrustedExitRoots) {
		*self.latest.lock().unwrap() = Some(roots);
	}

	pub fn set_failing(&self, failing: bool) {
		*self.failing.lock().unwrap() = failing;
	}
}

#[async_trait]
impl TrustedExitRootSource for MockTrustedSource {
	async fn latest_exit_roots(&self) -> Result<Option<TrustedExitRoots>, ChainError> {
		if *self.failing.lock().unwrap() {
			return Err(ChainError::Transport("sequencer unreachable".to_string()));
		}
		Ok(*self.latest.lock().unwrap())
	}
}

//! Bridge contract ABI.
//!
//! Event topics and payload decoding for the three bridge events the relayer follows, the
//! `claimAsset` call it sends and the `networkID` view it reads. Encoding and decoding go
//! through `ethers::abi`; amounts stay `uint256` end to end.

use std::sync::LazyLock;

use ethers::abi::{self, ParamType, Token};
use ethers::types::U256;
use thiserror::Error;

use super::types::{Address, Deposit, Hash, NetworkId};

/// Why a log with a known topic could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error(transparent)]
	Abi(#[from] abi::Error),

	#[error("{field} does not fit its declared type: {value}")]
	Overflow { field: &'static str, value: U256 },

	#[error("Unexpected token layout for {0}")]
	UnexpectedTokens(&'static str),

	#[error("Expected {expected} topics, found {actual}")]
	MissingTopics { expected: usize, actual: usize },
}

fn deposit_event_params() -> Vec<ParamType> {
	vec![
		ParamType::Uint(8),
		ParamType::Uint(32),
		ParamType::Address,
		ParamType::Uint(32),
		ParamType::Address,
		ParamType::Uint(256),
		ParamType::Bytes,
		ParamType::Uint(32),
	]
}

fn claim_event_params() -> Vec<ParamType> {
	vec![
		ParamType::Uint(32),
		ParamType::Uint(32),
		ParamType::Address,
		ParamType::Address,
		ParamType::Uint(256),
	]
}

fn global_exit_root_event_params() -> Vec<ParamType> {
	vec![ParamType::FixedBytes(32), ParamType::FixedBytes(32)]
}

/// `BridgeEvent(uint8,uint32,address,uint32,address,uint256,bytes,uint32)`
pub static DEPOSIT_EVENT_TOPIC: LazyLock<Hash> =
	LazyLock::new(|| abi::long_signature("BridgeEvent", &deposit_event_params()).0);
/// `ClaimEvent(uint32,uint32,address,address,uint256)`
pub static CLAIM_EVENT_TOPIC: LazyLock<Hash> =
	LazyLock::new(|| abi::long_signature("ClaimEvent", &claim_event_params()).0);
/// `UpdateGlobalExitRoot(bytes32 indexed,bytes32 indexed)`
pub static GLOBAL_EXIT_ROOT_EVENT_TOPIC: LazyLock<Hash> = LazyLock::new(|| {
	abi::long_signature("UpdateGlobalExitRoot", &global_exit_root_event_params()).0
});

/// Topics of every event the relayer decodes, for log filters.
pub fn bridge_event_topics() -> Vec<Hash> {
	vec![
		*DEPOSIT_EVENT_TOPIC,
		*CLAIM_EVENT_TOPIC,
		*GLOBAL_EXIT_ROOT_EVENT_TOPIC,
	]
}

/// Payload of a `BridgeEvent` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
	pub leaf_type: u8,
	pub token_network: NetworkId,
	pub token_address: Address,
	pub destination_network: NetworkId,
	pub destination_address: Address,
	pub amount: U256,
	pub metadata: Vec<u8>,
	pub deposit_count: u32,
}

/// Payload of a `ClaimEvent` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvent {
	pub deposit_count: u32,
	pub origin_network: NetworkId,
	pub token_address: Address,
	pub destination_address: Address,
	pub amount: U256,
}

fn narrow<T: TryFrom<U256>>(field: &'static str, value: U256) -> Result<T, DecodeError> {
	T::try_from(value).map_err(|_| DecodeError::Overflow { field, value })
}

pub fn decode_deposit_event(data: &[u8]) -> Result<DepositEvent, DecodeError> {
	let tokens = abi::decode(&deposit_event_params(), data)?;
	match tokens.as_slice() {
		[
			Token::Uint(leaf_type),
			Token::Uint(token_network),
			Token::Address(token_address),
			Token::Uint(destination_network),
			Token::Address(destination_address),
			Token::Uint(amount),
			Token::Bytes(metadata),
			Token::Uint(deposit_count),
		] => Ok(DepositEvent {
			leaf_type: narrow("leafType", *leaf_type)?,
			token_network: narrow("originNetwork", *token_network)?,
			token_address: token_address.0,
			destination_network: narrow("destinationNetwork", *destination_network)?,
			destination_address: destination_address.0,
			amount: *amount,
			metadata: metadata.clone(),
			deposit_count: narrow("depositCount", *deposit_count)?,
		}),
		_ => Err(DecodeError::UnexpectedTokens("BridgeEvent")),
	}
}

pub fn decode_claim_event(data: &[u8]) -> Result<ClaimEvent, DecodeError> {
	let tokens = abi::decode(&claim_event_params(), data)?;
	match tokens.as_slice() {
		[
			Token::Uint(index),
			Token::Uint(origin_network),
			Token::Address(token_address),
			Token::Address(destination_address),
			Token::Uint(amount),
		] => Ok(ClaimEvent {
			deposit_count: narrow("index", *index)?,
			origin_network: narrow("originNetwork", *origin_network)?,
			token_address: token_address.0,
			destination_address: destination_address.0,
			amount: *amount,
		}),
		_ => Err(DecodeError::UnexpectedTokens("ClaimEvent")),
	}
}

/// Mainnet and rollup exit roots of an `UpdateGlobalExitRoot` log; both are indexed.
pub fn decode_global_exit_root_event(topics: &[Hash]) -> Result<(Hash, Hash), DecodeError> {
	match topics {
		[_, mainnet, rollup, ..] => Ok((*mainnet, *rollup)),
		_ => Err(DecodeError::MissingTopics {
			expected: 3,
			actual: topics.len(),
		}),
	}
}

/// ABI data of a `BridgeEvent` log carrying `deposit`.
pub fn encode_deposit_event(deposit: &Deposit) -> Vec<u8> {
	abi::encode(&[
		Token::Uint(deposit.leaf_type.into()),
		Token::Uint(deposit.token_network.into()),
		Token::Address(deposit.token_address.into()),
		Token::Uint(deposit.destination_network.into()),
		Token::Address(deposit.destination_address.into()),
		Token::Uint(deposit.amount),
		Token::Bytes(deposit.metadata.clone()),
		Token::Uint(deposit.deposit_count.into()),
	])
}

fn claim_asset_params(height: usize) -> Vec<ParamType> {
	vec![
		ParamType::FixedArray(Box::new(ParamType::FixedBytes(32)), height),
		ParamType::Uint(32),
		ParamType::FixedBytes(32),
		ParamType::FixedBytes(32),
		ParamType::Uint(32),
		ParamType::Address,
		ParamType::Uint(32),
		ParamType::Address,
		ParamType::Uint(256),
		ParamType::Bytes,
	]
}

/// Selector of `claimAsset` for a proof of `height` siblings.
pub fn claim_asset_selector(height: usize) -> [u8; 4] {
	abi::short_signature("claimAsset", &claim_asset_params(height))
}

/// Call data claiming `deposit` with `proof` under the given exit roots.
pub fn encode_claim_asset(
	proof: &[Hash],
	deposit: &Deposit,
	mainnet_exit_root: &Hash,
	rollup_exit_root: &Hash,
) -> Vec<u8> {
	let siblings = proof
		.iter()
		.map(|sibling| Token::FixedBytes(sibling.to_vec()))
		.collect();
	let args = abi::encode(&[
		Token::FixedArray(siblings),
		Token::Uint(deposit.deposit_count.into()),
		Token::FixedBytes(mainnet_exit_root.to_vec()),
		Token::FixedBytes(rollup_exit_root.to_vec()),
		Token::Uint(deposit.token_network.into()),
		Token::Address(deposit.token_address.into()),
		Token::Uint(deposit.destination_network.into()),
		Token::Address(deposit.destination_address.into()),
		Token::Uint(deposit.amount),
		Token::Bytes(deposit.metadata.clone()),
	]);

	let mut data = claim_asset_selector(proof.len()).to_vec();
	data.extend_from_slice(&args);
	data
}

/// Decode `claimAsset` arguments; used to inspect what was sent.
pub fn decode_claim_asset(height: usize, data: &[u8]) -> Result<Vec<Token>, DecodeError> {
	if data.len() < 4 || data[..4] != claim_asset_selector(height) {
		return Err(DecodeError::UnexpectedTokens("claimAsset"));
	}
	Ok(abi::decode(&claim_asset_params(height), &data[4..])?)
}

/// Call data of the bridge's `networkID()` view.
pub fn network_id_call() -> Vec<u8> {
	abi::short_signature("networkID", &[]).to_vec()
}

pub fn decode_network_id(data: &[u8]) -> Result<NetworkId, DecodeError> {
	match abi::decode(&[ParamType::Uint(32)], data)?.as_slice() {
		[Token::Uint(id)] => narrow("networkID", *id),
		_ => Err(DecodeError::UnexpectedTokens("networkID")),
	}
}

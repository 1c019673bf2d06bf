//! Environment-based configuration for the relayer.
//!
//! # Networks
//! - `RELAYER_ROOT_RPC_URL` - JSON-RPC endpoint of the root network (required)
//! - `RELAYER_ROOT_BRIDGE_ADDRESS` - Hex bridge contract address on the root network (required)
//! - `RELAYER_LEAF_RPC_URLS` - Comma separated leaf network endpoints
//! - `RELAYER_LEAF_BRIDGE_ADDRESSES` - Comma separated leaf bridge addresses, same order and count
//! - `RELAYER_TRUSTED_RPC_URLS` - Comma separated sequencer endpoints, one per leaf when set
//! - `RELAYER_GENESIS_BLOCK` - First root network block to process (default: 0)
//!
//! # Storage and trees
//! - `RELAYER_STORE` - Storage backend, "sqlite" or "memory" (default: "sqlite")
//! - `RELAYER_DB_PATH` - SQLite database file (default: "data/bridge-relayer.db")
//! - `RELAYER_TREE_HEIGHT` - Deposit tree height (default: 32)
//!
//! # Synchronizers
//! - `RELAYER_SYNC_INTERVAL_MS`, `RELAYER_SYNC_CHUNK_SIZE`, `RELAYER_CONFIRMATION_DEPTH`,
//!   `RELAYER_MAX_ROLLBACK_DEPTH`
//!
//! # Claim managers
//! - `RELAYER_CLAIM_PRIVATE_KEY` - Hex key paying for claims (required with leaf networks)
//! - `RELAYER_CLAIM_GAS_LIMIT` - Gas limit of claim transactions (default: 300000)
//! - `RELAYER_CLAIM_MAX_GAS_PRICE` - Ceiling for escalated gas prices in wei (default: none)
//! - `RELAYER_CLAIM_INTERVAL_MS`, `RELAYER_CLAIM_MAX_RETRIES`, `RELAYER_CLAIM_MAX_AGE_SECS`,
//!   `RELAYER_CLAIM_TX_TIMEOUT_SECS`, `RELAYER_CLAIM_GAS_BUMP_PERCENT`
//!
//! # Optional Settings
//! - `RELAYER_RPC_TIMEOUT_SECS` - Timeout of every chain call (default: 30)
//! - `RELAYER_CHANNEL_CAPACITY` - Exit-root notifications buffered per subscriber (default: 256)
//! - `RELAYER_LOG_LEVEL` - Logging level (debug, info, warn, error)
//! - `RELAYER_LOG_JSON` - Set to "1" for JSON log lines

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::bridgectrl::merkle::MAX_TREE_HEIGHT;
use crate::chain::{Address, SigningKey};
use crate::claimtxman::ClaimTxConfig;
use crate::synchronizer::SyncConfig;
use crate::utils::decode_fixed;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing required environment variable: {0}")]
	MissingEnvVar(String),

	#[error("invalid value for {0}: {1}")]
	InvalidValue(String, String),

	#[error("{urls} leaf RPC URLs but {addresses} leaf bridge addresses")]
	LeafCountMismatch { urls: usize, addresses: usize },

	#[error("{urls} trusted RPC URLs for {leaves} leaf networks")]
	TrustedCountMismatch { urls: usize, leaves: usize },

	#[error("storage backend {0:?} is not registered")]
	StorageNotRegistered(String),
}

/// Storage backends the relayer can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
	Sqlite,
	/// Nothing survives a restart
	Memory,
}

impl FromStr for StorageBackend {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"sqlite" => Ok(StorageBackend::Sqlite),
			"memory" => Ok(StorageBackend::Memory),
			other => Err(ConfigError::StorageNotRegistered(other.to_string())),
		}
	}
}

/// Where to reach one network and its bridge contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
	pub rpc_url: String,
	pub bridge_address: Address,
	/// Sequencer endpoint announcing global exit roots before they are mined
	pub trusted_rpc_url: Option<String>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct RelayerConfig {
	pub root: NetworkEndpoint,
	pub leaves: Vec<NetworkEndpoint>,
	/// First root network block to process
	pub genesis_block: u64,
	pub store: StorageBackend,
	pub db_path: String,
	pub tree_height: u8,
	/// Synchronizer settings shared by every network; the start block is set per network
	pub sync: SyncConfig,
	pub claim: ClaimTxConfig,
	pub claim_signing_key: Option<SigningKey>,
	pub claim_gas_limit: u64,
	pub rpc_timeout: Duration,
	pub channel_capacity: usize,
	pub log_level: String,
	pub log_json: bool,
}

impl RelayerConfig {
	/// Load configuration from environment variables
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| env::var(name).ok())
	}

	/// Load configuration from any variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let root = NetworkEndpoint {
			rpc_url: required(&lookup, "RELAYER_ROOT_RPC_URL")?,
			bridge_address: parse_address(
				"RELAYER_ROOT_BRIDGE_ADDRESS",
				&required(&lookup, "RELAYER_ROOT_BRIDGE_ADDRESS")?,
			)?,
			trusted_rpc_url: None,
		};

		let urls = list(&lookup, "RELAYER_LEAF_RPC_URLS");
		let addresses = list(&lookup, "RELAYER_LEAF_BRIDGE_ADDRESSES");
		if urls.len() != addresses.len() {
			return Err(ConfigError::LeafCountMismatch {
				urls: urls.len(),
				addresses: addresses.len(),
			});
		}
		let trusted = list(&lookup, "RELAYER_TRUSTED_RPC_URLS");
		if !trusted.is_empty() && trusted.len() != urls.len() {
			return Err(ConfigError::TrustedCountMismatch {
				urls: trusted.len(),
				leaves: urls.len(),
			});
		}
		let mut trusted = trusted.into_iter();
		let leaves = urls
			.into_iter()
			.zip(addresses)
			.map(|(rpc_url, address)| {
				Ok(NetworkEndpoint {
					rpc_url,
					bridge_address: parse_address("RELAYER_LEAF_BRIDGE_ADDRESSES", &address)?,
					trusted_rpc_url: trusted.next(),
				})
			})
			.collect::<Result<Vec<_>, ConfigError>>()?;

		let claim_signing_key = if leaves.is_empty() {
			None
		} else {
			Some(SigningKey::new(required(&lookup, "RELAYER_CLAIM_PRIVATE_KEY")?))
		};
		let store = match lookup("RELAYER_STORE") {
			Some(name) => name.parse()?,
			None => StorageBackend::Sqlite,
		};

		let tree_height: u8 = parsed(&lookup, "RELAYER_TREE_HEIGHT", MAX_TREE_HEIGHT)?;
		if tree_height == 0 || tree_height > MAX_TREE_HEIGHT {
			return Err(ConfigError::InvalidValue(
				"RELAYER_TREE_HEIGHT".to_string(),
				format!("must be between 1 and {}", MAX_TREE_HEIGHT),
			));
		}

		let sync_defaults = SyncConfig::default();
		let sync = SyncConfig {
			poll_interval: Duration::from_millis(parsed(
				&lookup,
				"RELAYER_SYNC_INTERVAL_MS",
				sync_defaults.poll_interval.as_millis() as u64,
			)?),
			chunk_size: parsed(&lookup, "RELAYER_SYNC_CHUNK_SIZE", sync_defaults.chunk_size)?,
			confirmation_depth: parsed(
				&lookup,
				"RELAYER_CONFIRMATION_DEPTH",
				sync_defaults.confirmation_depth,
			)?,
			max_rollback_depth: parsed(
				&lookup,
				"RELAYER_MAX_ROLLBACK_DEPTH",
				sync_defaults.max_rollback_depth,
			)?,
			..sync_defaults
		};
		if sync.chunk_size == 0 {
			return Err(ConfigError::InvalidValue(
				"RELAYER_SYNC_CHUNK_SIZE".to_string(),
				"must be positive".to_string(),
			));
		}

		let claim_defaults = ClaimTxConfig::default();
		let claim = ClaimTxConfig {
			poll_interval: Duration::from_millis(parsed(
				&lookup,
				"RELAYER_CLAIM_INTERVAL_MS",
				claim_defaults.poll_interval.as_millis() as u64,
			)?),
			max_retries: parsed(&lookup, "RELAYER_CLAIM_MAX_RETRIES", claim_defaults.max_retries)?,
			max_age: Duration::from_secs(parsed(
				&lookup,
				"RELAYER_CLAIM_MAX_AGE_SECS",
				claim_defaults.max_age.as_secs(),
			)?),
			tx_timeout: Duration::from_secs(parsed(
				&lookup,
				"RELAYER_CLAIM_TX_TIMEOUT_SECS",
				claim_defaults.tx_timeout.as_secs(),
			)?),
			gas_bump_percent: parsed(
				&lookup,
				"RELAYER_CLAIM_GAS_BUMP_PERCENT",
				claim_defaults.gas_bump_percent,
			)?,
			max_gas_price: match lookup("RELAYER_CLAIM_MAX_GAS_PRICE") {
				Some(_) => Some(parsed(&lookup, "RELAYER_CLAIM_MAX_GAS_PRICE", 0u128)?),
				None => claim_defaults.max_gas_price,
			},
		};
		if claim.max_retries == 0 {
			return Err(ConfigError::InvalidValue(
				"RELAYER_CLAIM_MAX_RETRIES".to_string(),
				"must be positive".to_string(),
			));
		}

		Ok(Self {
			root,
			leaves,
			genesis_block: parsed(&lookup, "RELAYER_GENESIS_BLOCK", 0)?,
			store,
			db_path: lookup("RELAYER_DB_PATH")
				.unwrap_or_else(|| "data/bridge-relayer.db".to_string()),
			tree_height,
			sync,
			claim,
			claim_signing_key,
			claim_gas_limit: parsed(&lookup, "RELAYER_CLAIM_GAS_LIMIT", 300_000)?,
			rpc_timeout: Duration::from_secs(parsed(&lookup, "RELAYER_RPC_TIMEOUT_SECS", 30)?),
			channel_capacity: parsed(&lookup, "RELAYER_CHANNEL_CAPACITY", 256)?,
			log_level: lookup("RELAYER_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
			log_json: lookup("RELAYER_LOG_JSON").is_some_and(|v| v == "1" || v == "true"),
		})
	}

	/// Synchronizer settings for a network starting at `start_block`.
	pub fn sync_config(&self, start_block: u64) -> SyncConfig {
		SyncConfig {
			start_block,
			..self.sync.clone()
		}
	}
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	lookup(name)
		.filter(|v| !v.trim().is_empty())
		.ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn list<F>(lookup: &F, name: &str) -> Vec<String>
where
	F: Fn(&str) -> Option<String>,
{
	lookup(name)
		.map(|v| {
			v.split(',')
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default()
}

fn parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
	F: Fn(&str) -> Option<String>,
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match lookup(name) {
		Some(value) => value
			.trim()
			.parse()
			.map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
		None => Ok(default),
	}
}

fn parse_address(name: &str, value: &str) -> Result<Address, ConfigError> {
	decode_fixed::<20>(value.trim())
		.map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

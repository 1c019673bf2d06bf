//! Ethereum JSON-RPC client implementing [`ChainAccess`] on top of an ethers [`Provider`].
//!
//! Blocks are assembled from `eth_getLogs` filtered on the bridge address and event topics plus
//! one header per block for hash linkage. Claims are signed locally and broadcast with
//! `eth_sendRawTransaction`; their fate is read back from receipts.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
	BlockId, BlockNumber, Bytes, Filter, H160, H256, Log, TransactionRequest, U256, ValueOrArray,
	transaction::eip2718::TypedTransaction,
};
use futures::future::try_join_all;
use tracing::debug;

use super::access::ChainAccess;
use super::contract::{bridge_event_topics, decode_network_id, network_id_call};
use super::types::{
	Address, Block, ChainError, ClaimTx, FeeParams, Hash, NetworkId, RawLog, SentTx, TxStatus,
};

/// Hex private key of the account that pays for claims. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(String);

impl SigningKey {
	pub fn new(hex_key: impl Into<String>) -> Self {
		Self(hex_key.into())
	}
}

impl std::fmt::Debug for SigningKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("SigningKey(<redacted>)")
	}
}

type Signing = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Classify a provider or signer failure.
///
/// JSON-RPC error objects are inspected: fee rejections become [`ChainError::Underpriced`] and
/// execution reverts become [`ChainError::Reverted`]; both are final for the request that caused
/// them. Everything else is a transport problem worth retrying.
pub fn classify_error<E: MiddlewareError>(e: E) -> ChainError {
	let Some(response) = e.as_error_response() else {
		return ChainError::Transport(e.to_string());
	};
	let message = response.message.to_lowercase();
	if message.contains("underpriced") || message.contains("fee too low") {
		ChainError::Underpriced(response.message.clone())
	} else if response.code == 3 || message.contains("revert") {
		ChainError::Reverted(response.message.clone())
	} else if message.contains("nonce too low") || message.contains("already known") {
		ChainError::Rejected(response.message.clone())
	} else {
		ChainError::Rpc {
			code: response.code,
			message: response.message.clone(),
		}
	}
}

/// Bridge network client
pub struct RpcChainClient {
	provider: Provider<Http>,
	/// Present on networks the relayer sends claims to
	signer: Option<Signing>,
	bridge_address: H160,
	gas_limit: u64,
	timeout: Duration,
}

impl RpcChainClient {
	/// Connect to a node.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP JSON-RPC endpoint of the node.
	/// * `bridge_address` - The bridge contract whose events are followed.
	/// * `timeout` - Upper bound on every call.
	/// * `gas_limit` - Gas limit of claim transactions.
	/// * `signing_key` - Key used to sign claims; read-only client when absent.
	pub async fn connect(
		rpc_url: &str,
		bridge_address: Address,
		timeout: Duration,
		gas_limit: u64,
		signing_key: Option<&SigningKey>,
	) -> Result<Self, ChainError> {
		let provider = Provider::<Http>::try_from(rpc_url)
			.map_err(|e| ChainError::Transport(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

		let signer = match signing_key {
			Some(key) => {
				let chain_id = tokio::time::timeout(timeout, provider.get_chainid())
					.await
					.map_err(|_| ChainError::Timeout("eth_chainId".to_string()))?
					.map_err(classify_error)?;
				let wallet = key
					.0
					.trim_start_matches("0x")
					.parse::<LocalWallet>()
					.map_err(|e| ChainError::Rejected(format!("Invalid signing key: {}", e)))?
					.with_chain_id(chain_id.low_u64());
				debug!(address = ?wallet.address(), "Loaded claim signer");
				Some(SignerMiddleware::new(provider.clone(), wallet))
			}
			None => None,
		};

		Ok(Self {
			provider,
			signer,
			bridge_address: H160(bridge_address),
			gas_limit,
			timeout,
		})
	}

	/// Run one call under the client timeout.
	async fn timed<T, E, F>(&self, method: &str, call: F) -> Result<T, ChainError>
	where
		E: MiddlewareError,
		F: Future<Output = Result<T, E>>,
	{
		debug!("RPC {}", method);
		match tokio::time::timeout(self.timeout, call).await {
			Ok(result) => result.map_err(classify_error),
			Err(_) => Err(ChainError::Timeout(method.to_string())),
		}
	}

	fn signer(&self) -> Result<&Signing, ChainError> {
		self.signer
			.as_ref()
			.ok_or_else(|| ChainError::Rejected("no signing key configured".to_string()))
	}

	async fn header(&self, number: u64) -> Result<(u64, Hash, Hash, u64), ChainError> {
		let block = self
			.timed("eth_getBlockByNumber", self.provider.get_block(number))
			.await?
			.ok_or_else(|| ChainError::InvalidResponse(format!("block {} not found", number)))?;
		let hash = block
			.hash
			.ok_or_else(|| ChainError::InvalidResponse(format!("block {} is pending", number)))?;
		Ok((number, hash.0, block.parent_hash.0, block.timestamp.low_u64()))
	}
}

/// Group `logs` under the headers they belong to, dropping logs of replaced branches.
fn assemble_blocks(
	headers: Vec<(u64, Hash, Hash, u64)>,
	logs: Vec<Log>,
) -> Result<Vec<Block>, ChainError> {
	let mut by_number: BTreeMap<u64, Vec<Log>> = BTreeMap::new();
	for log in logs {
		if log.removed == Some(true) {
			continue;
		}
		let number = log
			.block_number
			.ok_or_else(|| ChainError::InvalidResponse("log without block number".to_string()))?;
		by_number.entry(number.as_u64()).or_default().push(log);
	}

	let mut blocks = Vec::with_capacity(headers.len());
	for (number, hash, parent_hash, timestamp) in headers {
		let mut logs = by_number.remove(&number).unwrap_or_default();
		logs.sort_by_key(|l| l.log_index.unwrap_or_default());
		let mut raw = Vec::with_capacity(logs.len());
		for log in logs {
			if log.block_hash.is_some_and(|h| h.0 != hash) {
				return Err(ChainError::InvalidResponse(format!(
					"log of block {} belongs to another branch",
					number
				)));
			}
			raw.push(RawLog {
				address: log.address.0,
				topics: log.topics.iter().map(|t| t.0).collect(),
				data: log.data.to_vec(),
				log_index: log.log_index.unwrap_or_default().low_u32(),
				tx_hash: log.transaction_hash.unwrap_or_default().0,
			});
		}
		blocks.push(Block {
			number,
			hash,
			parent_hash,
			timestamp,
			logs: raw,
		});
	}
	Ok(blocks)
}

#[async_trait]
impl ChainAccess for RpcChainClient {
	async fn network_id(&self) -> Result<NetworkId, ChainError> {
		let call: TypedTransaction = TransactionRequest::new()
			.to(self.bridge_address)
			.data(network_id_call())
			.into();
		let answer = self
			.timed("eth_call", self.provider.call(&call, None))
			.await?;
		decode_network_id(&answer).map_err(|e| ChainError::InvalidResponse(e.to_string()))
	}

	async fn latest_block_number(&self) -> Result<u64, ChainError> {
		let number = self
			.timed("eth_blockNumber", self.provider.get_block_number())
			.await?;
		Ok(number.as_u64())
	}

	async fn blocks_since(&self, after: Option<u64>, up_to: u64) -> Result<Vec<Block>, ChainError> {
		let from = after.map_or(0, |n| n + 1);
		if from > up_to {
			return Ok(Vec::new());
		}
		let topics = bridge_event_topics()
			.into_iter()
			.map(|topic| Some(H256(topic)))
			.collect();
		let filter = Filter::new()
			.address(self.bridge_address)
			.from_block(from)
			.to_block(up_to)
			.topic0(ValueOrArray::Array(topics));
		let logs = self.timed("eth_getLogs", self.provider.get_logs(&filter)).await?;
		let headers = try_join_all((from..=up_to).map(|n| self.header(n))).await?;
		assemble_blocks(headers, logs)
	}

	async fn block_hash(&self, number: u64) -> Result<Option<Hash>, ChainError> {
		let block = self
			.timed("eth_getBlockByNumber", self.provider.get_block(number))
			.await?;
		Ok(block.and_then(|b| b.hash).map(|h| h.0))
	}

	async fn sign_and_send(&self, tx: &ClaimTx) -> Result<SentTx, ChainError> {
		let signer = self.signer()?;
		let nonce = match tx.nonce {
			Some(nonce) => nonce,
			None => self
				.timed(
					"eth_getTransactionCount",
					signer.get_transaction_count(
						signer.address(),
						Some(BlockId::Number(BlockNumber::Pending)),
					),
				)
				.await?
				.low_u64(),
		};
		let request = TransactionRequest::new()
			.from(signer.address())
			.to(H160(tx.to))
			.data(Bytes::from(tx.data.clone()))
			.gas(tx.gas_limit)
			.gas_price(U256::from(tx.gas_price))
			.nonce(nonce);

		let pending = self
			.timed(
				"eth_sendRawTransaction",
				signer.send_transaction(request, None),
			)
			.await?;
		Ok(SentTx {
			hash: pending.tx_hash().0,
			nonce,
		})
	}

	async fn tx_status(&self, hash: &Hash) -> Result<TxStatus, ChainError> {
		let hash = H256(*hash);
		let receipt = self
			.timed(
				"eth_getTransactionReceipt",
				self.provider.get_transaction_receipt(hash),
			)
			.await?;
		if let Some(receipt) = receipt {
			let block_number = receipt.block_number.unwrap_or_default().as_u64();
			return Ok(match receipt.status.map(|s| s.as_u64()) {
				Some(0) => TxStatus::Reverted { block_number },
				_ => TxStatus::Confirmed {
					block_number,
					gas_used: receipt.gas_used.unwrap_or_default().low_u64(),
				},
			});
		}

		let known = self
			.timed(
				"eth_getTransactionByHash",
				self.provider.get_transaction(hash),
			)
			.await?;
		Ok(match known {
			Some(_) => TxStatus::Pending,
			None => TxStatus::Dropped,
		})
	}

	async fn estimate_fee(&self) -> Result<FeeParams, ChainError> {
		let price = self
			.timed("eth_gasPrice", self.provider.get_gas_price())
			.await?;
		let gas_price = u128::try_from(price)
			.map_err(|_| ChainError::InvalidResponse(format!("gas price {} out of range", price)))?;
		Ok(FeeParams {
			gas_price,
			gas_limit: self.gas_limit,
		})
	}
}

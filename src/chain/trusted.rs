//! Trusted exit-root feed.
//!
//! A leaf network's sequencer knows which global exit root it will use before the update shows
//! up in a block. [`TrustedStateClient`] reads it over the sequencer's JSON-RPC API so claims on
//! that leaf can start early; the on-chain update remains the durable record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::types::{ChainError, Hash};
use crate::utils::decode_fixed;
use crate::utils::encoding::serde_fixed;

/// Exit roots a sequencer reports for its latest global exit root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedExitRoots {
	pub global_exit_root: Hash,
	pub mainnet_exit_root: Hash,
	pub rollup_exit_root: Hash,
}

/// Source of not-yet-final global exit roots for one network.
#[async_trait]
pub trait TrustedExitRootSource: Send + Sync {
	/// Latest global exit root known to the source, `None` before the first one.
	async fn latest_exit_roots(&self) -> Result<Option<TrustedExitRoots>, ChainError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExitRootsResponse {
	#[serde(with = "serde_fixed")]
	mainnet_exit_root: Hash,
	#[serde(with = "serde_fixed")]
	rollup_exit_root: Hash,
}

/// Sequencer JSON-RPC client
pub struct TrustedStateClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// The sequencer's JSON-RPC endpoint.
	rpc_url: String,
	next_id: AtomicU64,
}

impl TrustedStateClient {
	/// Create a new client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP JSON-RPC endpoint of the sequencer.
	/// * `timeout` - Per-request timeout.
	pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, ChainError> {
		let http_client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ChainError::Transport(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			http_client,
			rpc_url,
			next_id: AtomicU64::new(1),
		})
	}

	/// Execute one JSON-RPC call and return its `result` member.
	async fn execute_rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		debug!("RPC {} -> {} (id {})", method, self.rpc_url, id);

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(ChainError::Transport(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let mut response_json: Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
			let message = error
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			return Err(ChainError::Rpc { code, message });
		}

		Ok(response_json
			.get_mut("result")
			.map(Value::take)
			.unwrap_or(Value::Null))
	}

	async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
		let result = self.execute_rpc(method, params).await?;
		Ok(serde_json::from_value(result)?)
	}
}

fn parse_hash(value: &str) -> Result<Hash, ChainError> {
	decode_fixed::<32>(value)
		.map_err(|e| ChainError::InvalidResponse(format!("Invalid hash {}: {}", value, e)))
}

#[async_trait]
impl TrustedExitRootSource for TrustedStateClient {
	async fn latest_exit_roots(&self) -> Result<Option<TrustedExitRoots>, ChainError> {
		let latest: Option<String> = self
			.call("zkevm_getLatestGlobalExitRoot", json!([]))
			.await?;
		let Some(latest) = latest else {
			return Ok(None);
		};
		let global_exit_root = parse_hash(&latest)?;
		if global_exit_root == [0; 32] {
			return Ok(None);
		}

		let roots: Option<ExitRootsResponse> = self
			.call("zkevm_getExitRootsByGER", json!([latest]))
			.await?;
		Ok(roots.map(|r| TrustedExitRoots {
			global_exit_root,
			mainnet_exit_root: r.mainnet_exit_root,
			rollup_exit_root: r.rollup_exit_root,
		}))
	}
}

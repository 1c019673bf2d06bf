use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bridge_relayer::bridgectrl::{BridgeController, BridgeCtrlError};
use bridge_relayer::chain::{
	ChainAccess, ChainError, NetworkId, RpcChainClient, SigningKey, TrustedStateClient,
};
use bridge_relayer::claimtxman::ClaimTxManager;
use bridge_relayer::config::{ConfigError, NetworkEndpoint, RelayerConfig, StorageBackend};
use bridge_relayer::exit_root_channel::ExitRootChannel;
use bridge_relayer::storage::{BridgeStorage, MemoryStorage, SqliteStorage, StorageError};
use bridge_relayer::synchronizer::Synchronizer;

/// Errors that abort the relayer before or while starting its tasks
#[derive(Debug, thiserror::Error)]
enum RelayerError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Bridge controller error: {0}")]
	Controller(#[from] BridgeCtrlError),

	#[error("Network id {0} is reported by more than one chain")]
	DuplicateNetwork(NetworkId),

	#[error("Failed to initialize logging: {0}")]
	Logging(String),

	#[error("Failed to wait for shutdown signal: {0}")]
	Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
	dotenv::dotenv().ok();

	if let Err(e) = run().await {
		error!("Relayer failed: {}", e);
		eprintln!("Relayer failed: {}", e);
		std::process::exit(1);
	}
}

fn init_tracing(config: &RelayerConfig) -> Result<(), RelayerError> {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("bridge_relayer={}", config.log_level)));

	let registry = tracing_subscriber::registry().with(filter);
	let result = if config.log_json {
		registry
			.with(tracing_subscriber::fmt::layer().json().with_target(false))
			.try_init()
	} else {
		registry
			.with(
				tracing_subscriber::fmt::layer()
					.with_target(false)
					.with_thread_ids(false)
					.with_thread_names(false)
					.with_file(false)
					.with_line_number(false)
					.with_timer(tracing_subscriber::fmt::time::time()),
			)
			.try_init()
	};
	result.map_err(|e| RelayerError::Logging(e.to_string()))
}

/// Connect to a network and read the id it reports.
async fn connect(
	endpoint: &NetworkEndpoint,
	config: &RelayerConfig,
	signing_key: Option<&SigningKey>,
) -> Result<(NetworkId, Arc<RpcChainClient>), RelayerError> {
	let client = Arc::new(
		RpcChainClient::connect(
			&endpoint.rpc_url,
			endpoint.bridge_address,
			config.rpc_timeout,
			config.claim_gas_limit,
			signing_key,
		)
		.await?,
	);
	let network_id = client.network_id().await?;
	info!(
		network = network_id,
		rpc_url = %endpoint.rpc_url,
		"Connected to chain"
	);
	Ok((network_id, client))
}

async fn run() -> Result<(), RelayerError> {
	let config = RelayerConfig::from_env()?;
	init_tracing(&config)?;
	info!(
		"Starting bridge relayer with {} leaf networks",
		config.leaves.len()
	);

	let (root_id, root_client) = connect(&config.root, &config, None).await?;
	let mut seen = HashSet::from([root_id]);
	let mut leaves = Vec::with_capacity(config.leaves.len());
	for endpoint in &config.leaves {
		let (network_id, client) =
			connect(endpoint, &config, config.claim_signing_key.as_ref()).await?;
		if !seen.insert(network_id) {
			return Err(RelayerError::DuplicateNetwork(network_id));
		}
		let trusted = match &endpoint.trusted_rpc_url {
			Some(url) => Some(Arc::new(TrustedStateClient::new(
				url.clone(),
				config.rpc_timeout,
			)?)),
			None => None,
		};
		leaves.push((network_id, endpoint.bridge_address, client, trusted));
	}
	let leaf_ids: Vec<NetworkId> = leaves.iter().map(|(id, ..)| *id).collect();

	let storage: Arc<dyn BridgeStorage> = match config.store {
		StorageBackend::Sqlite => {
			let store = SqliteStorage::new(&config.db_path)?;
			info!(path = %config.db_path, "Opened store");
			Arc::new(store)
		}
		StorageBackend::Memory => {
			info!("Using in-memory store, nothing survives a restart");
			Arc::new(MemoryStorage::new())
		}
	};

	let controller = Arc::new(BridgeController::new(
		config.tree_height,
		root_id,
		&leaf_ids,
	)?);
	controller.load(storage.as_ref()).await?;

	let channel = ExitRootChannel::new(config.channel_capacity, root_id);
	let cancel = CancellationToken::new();
	let mut handles: Vec<JoinHandle<()>> = Vec::new();

	let mut synchronizers = vec![Synchronizer::new(
		root_id,
		config.root.bridge_address,
		config.sync_config(config.genesis_block),
		root_client,
		controller.clone(),
		storage.clone(),
		channel.clone(),
	)];
	for (network_id, bridge_address, client, trusted) in &leaves {
		let mut synchronizer = Synchronizer::new(
			*network_id,
			*bridge_address,
			config.sync_config(0),
			client.clone(),
			controller.clone(),
			storage.clone(),
			channel.clone(),
		);
		if let Some(trusted) = trusted {
			synchronizer = synchronizer.with_trusted_source(trusted.clone());
		}
		synchronizers.push(synchronizer);
	}
	for mut synchronizer in synchronizers {
		let cancel = cancel.clone();
		handles.push(tokio::spawn(async move {
			let network = synchronizer.network_id();
			if let Err(e) = synchronizer.sync(cancel).await {
				error!(network, "Synchronizer terminated: {}", e);
			}
		}));
	}

	for (network_id, bridge_address, client, _) in leaves {
		let manager = ClaimTxManager::new(
			network_id,
			bridge_address,
			config.claim.clone(),
			client,
			controller.clone(),
			storage.clone(),
		);
		let subscription = channel.subscribe(network_id);
		let cancel = cancel.clone();
		handles.push(tokio::spawn(async move {
			manager.run(subscription, cancel).await;
		}));
	}

	info!("Relayer running, press Ctrl-C to stop");
	tokio::signal::ctrl_c().await?;
	info!("Shutting down");
	cancel.cancel();

	for result in join_all(handles).await {
		if let Err(e) = result {
			error!("Task panicked: {}", e);
		}
	}
	info!("Relayer stopped");
	Ok(())
}

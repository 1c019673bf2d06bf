//! SQLite Persistent Storage for the bridge relayer
//!
//! Durable event log, computed roots and monitored claim transactions.
//! Uses connection pooling via r2d2; every block write and every confirmation
//! runs inside a single SQLite transaction.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Transaction, params};
use std::path::Path;

use super::traits::{EventRepository, MonitoredTxRepository, StorageError, StorageResult};
use super::types::{BlockBatch, BlockCursor, BlockRecord, RollbackSummary, RollupExitRoot};
use crate::bridgectrl::{Coverage, is_superseded};
use crate::chain::{Claim, Deposit, GlobalExitRoot, NetworkId, U256};
use crate::claimtxman::{DepositKey, MonitoredTx, MonitoredTxStatus, TxAttempt};

const DEPOSIT_COLUMNS: &str = "network_id, deposit_count, destination_network, destination_address, \
	token_network, token_address, amount, metadata, leaf_type, block_number, block_hash, tx_hash";

const CLAIM_COLUMNS: &str = "network_id, origin_network, deposit_count, token_address, \
	destination_address, amount, block_number, block_hash, tx_hash";

const MONITORED_TX_COLUMNS: &str = "destination_network, origin_network, deposit_count, status, \
	global_exit_root, mainnet_exit_root, rollup_exit_root, tree_size, to_address, call_data, \
	gas_price, gas_limit, nonce, attempts, failed_sends, created_at, updated_at, last_error";

/// SQLite-backed bridge storage with connection pooling
pub struct SqliteStorage {
	pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: rusqlite::Error) -> StorageError {
	match &e {
		rusqlite::Error::SqliteFailure(code, _)
			if code.code == rusqlite::ErrorCode::ConstraintViolation =>
		{
			StorageError::Duplicate(e.to_string())
		}
		_ => StorageError::Database(e.to_string()),
	}
}

fn conversion_err(column: usize, message: String) -> rusqlite::Error {
	rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

fn fixed<const N: usize>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<[u8; N]> {
	let blob: Vec<u8> = row.get(column)?;
	let len = blob.len();
	blob.try_into()
		.map_err(|_| conversion_err(0, format!("{}: expected {} bytes, got {}", column, N, len)))
}

fn amount(row: &rusqlite::Row, column: &str) -> rusqlite::Result<U256> {
	let text: String = row.get(column)?;
	U256::from_dec_str(&text)
		.map_err(|e| conversion_err(0, format!("{}: invalid amount {}: {}", column, text, e)))
}

/// WAL lets readers run beside the single writer; the busy timeout queues writers from other
/// pooled connections instead of failing with `SQLITE_BUSY`.
fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
	conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
}

impl SqliteStorage {
	/// Create a new store with the given database path
	///
	/// Creates the database file and runs migrations if needed.
	pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
		if let Some(parent) = db_path.as_ref().parent() {
			std::fs::create_dir_all(parent).ok();
		}

		let manager = SqliteConnectionManager::file(db_path).with_init(configure_connection);
		let pool = Pool::builder()
			.max_size(10)
			.build(manager)
			.map_err(|e| StorageError::Connection(e.to_string()))?;

		let store = Self { pool };
		store.run_migrations()?;

		Ok(store)
	}

	/// Create an in-memory store (for testing)
	pub fn in_memory() -> Result<Self, StorageError> {
		let manager = SqliteConnectionManager::memory();
		let pool = Pool::builder()
			.max_size(1)
			.build(manager)
			.map_err(|e| StorageError::Connection(e.to_string()))?;

		let store = Self { pool };
		store.run_migrations()?;

		Ok(store)
	}

	fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
		self.pool
			.get()
			.map_err(|e| StorageError::Connection(e.to_string()))
	}

	fn run_migrations(&self) -> Result<(), StorageError> {
		let conn = self.conn()?;

		conn.execute_batch(
			r#"
			CREATE TABLE IF NOT EXISTS block (
				network_id INTEGER NOT NULL,
				number INTEGER NOT NULL,
				hash BLOB NOT NULL,
				parent_hash BLOB NOT NULL,
				timestamp INTEGER NOT NULL,
				PRIMARY KEY (network_id, number)
			);

			CREATE TABLE IF NOT EXISTS block_cursor (
				network_id INTEGER PRIMARY KEY,
				number INTEGER NOT NULL,
				hash BLOB NOT NULL
			);

			CREATE TABLE IF NOT EXISTS deposit (
				network_id INTEGER NOT NULL,
				deposit_count INTEGER NOT NULL,
				destination_network INTEGER NOT NULL,
				destination_address BLOB NOT NULL,
				token_network INTEGER NOT NULL,
				token_address BLOB NOT NULL,
				amount TEXT NOT NULL,
				metadata BLOB NOT NULL,
				leaf_type INTEGER NOT NULL,
				block_number INTEGER NOT NULL,
				block_hash BLOB NOT NULL,
				tx_hash BLOB NOT NULL,
				PRIMARY KEY (network_id, deposit_count)
			);

			CREATE INDEX IF NOT EXISTS idx_deposit_destination ON deposit(destination_network, network_id);
			CREATE INDEX IF NOT EXISTS idx_deposit_block ON deposit(network_id, block_number);

			CREATE TABLE IF NOT EXISTS claim (
				network_id INTEGER NOT NULL,
				origin_network INTEGER NOT NULL,
				deposit_count INTEGER NOT NULL,
				token_address BLOB NOT NULL,
				destination_address BLOB NOT NULL,
				amount TEXT NOT NULL,
				block_number INTEGER NOT NULL,
				block_hash BLOB NOT NULL,
				tx_hash BLOB NOT NULL,
				PRIMARY KEY (network_id, origin_network, deposit_count)
			);

			CREATE TABLE IF NOT EXISTS exit_root (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				scope TEXT NOT NULL,
				network_id INTEGER NOT NULL,
				block_number INTEGER NOT NULL,
				block_hash BLOB,
				root BLOB NOT NULL,
				deposit_count INTEGER,
				covered TEXT,
				mainnet_exit_root BLOB,
				rollup_exit_root BLOB
			);

			CREATE INDEX IF NOT EXISTS idx_exit_root_scope ON exit_root(scope, network_id, block_number);

			CREATE TABLE IF NOT EXISTS monitored_tx (
				destination_network INTEGER NOT NULL,
				origin_network INTEGER NOT NULL,
				deposit_count INTEGER NOT NULL,
				status TEXT NOT NULL,
				global_exit_root BLOB NOT NULL,
				mainnet_exit_root BLOB NOT NULL,
				rollup_exit_root BLOB NOT NULL,
				tree_size INTEGER NOT NULL,
				to_address BLOB NOT NULL,
				call_data BLOB NOT NULL,
				gas_price TEXT NOT NULL,
				gas_limit INTEGER NOT NULL,
				nonce INTEGER,
				attempts TEXT NOT NULL,
				failed_sends INTEGER NOT NULL DEFAULT 0,
				created_at INTEGER NOT NULL,
				updated_at INTEGER NOT NULL,
				last_error TEXT,
				PRIMARY KEY (destination_network, origin_network, deposit_count)
			);

			CREATE INDEX IF NOT EXISTS idx_monitored_tx_status ON monitored_tx(destination_network, status);
			"#,
		)
		.map_err(|e| StorageError::Database(e.to_string()))?;

		Ok(())
	}

	fn row_to_deposit(row: &rusqlite::Row) -> rusqlite::Result<Deposit> {
		Ok(Deposit {
			origin_network: row.get("network_id")?,
			destination_network: row.get("destination_network")?,
			destination_address: fixed(row, "destination_address")?,
			token_network: row.get("token_network")?,
			token_address: fixed(row, "token_address")?,
			amount: amount(row, "amount")?,
			metadata: row.get("metadata")?,
			leaf_type: row.get("leaf_type")?,
			deposit_count: row.get("deposit_count")?,
			block_number: row.get::<_, i64>("block_number")? as u64,
			block_hash: fixed(row, "block_hash")?,
			tx_hash: fixed(row, "tx_hash")?,
		})
	}

	fn row_to_claim(row: &rusqlite::Row) -> rusqlite::Result<Claim> {
		Ok(Claim {
			network_id: row.get("network_id")?,
			origin_network: row.get("origin_network")?,
			deposit_count: row.get("deposit_count")?,
			token_address: fixed(row, "token_address")?,
			destination_address: fixed(row, "destination_address")?,
			amount: amount(row, "amount")?,
			block_number: row.get::<_, i64>("block_number")? as u64,
			block_hash: fixed(row, "block_hash")?,
			tx_hash: fixed(row, "tx_hash")?,
		})
	}

	fn row_to_block(row: &rusqlite::Row) -> rusqlite::Result<BlockRecord> {
		Ok(BlockRecord {
			network_id: row.get("network_id")?,
			number: row.get::<_, i64>("number")? as u64,
			hash: fixed(row, "hash")?,
			parent_hash: fixed(row, "parent_hash")?,
			timestamp: row.get::<_, i64>("timestamp")? as u64,
		})
	}

	fn row_to_global_exit_root(row: &rusqlite::Row) -> rusqlite::Result<GlobalExitRoot> {
		Ok(GlobalExitRoot {
			network_id: row.get("network_id")?,
			mainnet_exit_root: fixed(row, "mainnet_exit_root")?,
			rollup_exit_root: fixed(row, "rollup_exit_root")?,
			global_exit_root: fixed(row, "root")?,
			block_number: row.get::<_, i64>("block_number")? as u64,
			block_hash: fixed(row, "block_hash")?,
		})
	}

	fn row_to_rollup_exit_root(row: &rusqlite::Row) -> rusqlite::Result<RollupExitRoot> {
		let covered: String = row.get("covered")?;
		Ok(RollupExitRoot {
			root: fixed(row, "root")?,
			covered: serde_json::from_str::<Coverage>(&covered)
				.map_err(|e| conversion_err(0, format!("covered: {}", e)))?,
			network_id: row.get("network_id")?,
			block_number: row.get::<_, i64>("block_number")? as u64,
		})
	}

	fn row_to_monitored_tx(row: &rusqlite::Row) -> rusqlite::Result<MonitoredTx> {
		let status: String = row.get("status")?;
		let attempts: String = row.get("attempts")?;
		let gas_price: String = row.get("gas_price")?;
		Ok(MonitoredTx {
			key: DepositKey {
				destination_network: row.get("destination_network")?,
				origin_network: row.get("origin_network")?,
				deposit_count: row.get("deposit_count")?,
			},
			status: status
				.parse::<MonitoredTxStatus>()
				.map_err(|e| conversion_err(0, e))?,
			global_exit_root: fixed(row, "global_exit_root")?,
			mainnet_exit_root: fixed(row, "mainnet_exit_root")?,
			rollup_exit_root: fixed(row, "rollup_exit_root")?,
			tree_size: row.get::<_, i64>("tree_size")? as u64,
			to: fixed(row, "to_address")?,
			call_data: row.get("call_data")?,
			gas_price: gas_price
				.parse()
				.map_err(|e| conversion_err(0, format!("gas_price: {}", e)))?,
			gas_limit: row.get::<_, i64>("gas_limit")? as u64,
			nonce: row.get::<_, Option<i64>>("nonce")?.map(|n| n as u64),
			attempts: serde_json::from_str::<Vec<TxAttempt>>(&attempts)
				.map_err(|e| conversion_err(0, format!("attempts: {}", e)))?,
			failed_sends: row.get("failed_sends")?,
			created_at: row.get("created_at")?,
			updated_at: row.get("updated_at")?,
			last_error: row.get("last_error")?,
		})
	}

	fn insert_claim_tx(tx: &Transaction, claim: &Claim, overwrite: bool) -> StorageResult<()> {
		let conflict = if overwrite {
			"ON CONFLICT(network_id, origin_network, deposit_count) DO UPDATE SET \
			 block_number = excluded.block_number, block_hash = excluded.block_hash, \
			 tx_hash = excluded.tx_hash"
		} else {
			"ON CONFLICT(network_id, origin_network, deposit_count) DO NOTHING"
		};
		tx.execute(
			&format!(
				"INSERT INTO claim ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) {}",
				CLAIM_COLUMNS, conflict
			),
			params![
				claim.network_id,
				claim.origin_network,
				claim.deposit_count,
				&claim.token_address[..],
				&claim.destination_address[..],
				claim.amount.to_string(),
				claim.block_number as i64,
				&claim.block_hash[..],
				&claim.tx_hash[..],
			],
		)
		.map_err(db_err)?;
		Ok(())
	}

	// Synchronous helper methods for the trait implementations

	fn persist_block_sync(&self, batch: &BlockBatch) -> StorageResult<()> {
		let mut conn = self.conn()?;
		let tx = conn.transaction().map_err(db_err)?;
		let network = batch.network_id();
		let block = &batch.block;

		tx.execute(
			"INSERT INTO block (network_id, number, hash, parent_hash, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
			params![
				network,
				block.number as i64,
				&block.hash[..],
				&block.parent_hash[..],
				block.timestamp as i64
			],
		)
		.map_err(db_err)?;

		tx.execute(
			"INSERT INTO block_cursor (network_id, number, hash) VALUES (?1, ?2, ?3)
			 ON CONFLICT(network_id) DO UPDATE SET number = excluded.number, hash = excluded.hash",
			params![network, block.number as i64, &block.hash[..]],
		)
		.map_err(db_err)?;

		for d in &batch.deposits {
			tx.execute(
				&format!(
					"INSERT INTO deposit ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
					DEPOSIT_COLUMNS
				),
				params![
					d.origin_network,
					d.deposit_count,
					d.destination_network,
					&d.destination_address[..],
					d.token_network,
					&d.token_address[..],
					d.amount.to_string(),
					&d.metadata,
					d.leaf_type,
					d.block_number as i64,
					&d.block_hash[..],
					&d.tx_hash[..],
				],
			)
			.map_err(db_err)?;
		}

		for root in &batch.exit_roots {
			tx.execute(
				"INSERT INTO exit_root (scope, network_id, block_number, root, deposit_count)
				 VALUES ('network', ?1, ?2, ?3, ?4)",
				params![
					root.network_id,
					root.block_number as i64,
					&root.root[..],
					root.deposit_count as i64
				],
			)
			.map_err(db_err)?;
		}

		for claim in &batch.claims {
			Self::insert_claim_tx(&tx, claim, true)?;
		}

		for ger in &batch.global_exit_roots {
			tx.execute(
				"INSERT INTO exit_root (scope, network_id, block_number, block_hash, root, mainnet_exit_root, rollup_exit_root)
				 VALUES ('global', ?1, ?2, ?3, ?4, ?5, ?6)",
				params![
					ger.network_id,
					ger.block_number as i64,
					&ger.block_hash[..],
					&ger.global_exit_root[..],
					&ger.mainnet_exit_root[..],
					&ger.rollup_exit_root[..],
				],
			)
			.map_err(db_err)?;
		}

		for rollup in &batch.rollup_exit_roots {
			let covered = serde_json::to_string(&rollup.covered)
				.map_err(|e| StorageError::InvalidData(e.to_string()))?;
			tx.execute(
				"INSERT INTO exit_root (scope, network_id, block_number, root, covered)
				 VALUES ('rollup', ?1, ?2, ?3, ?4)",
				params![
					rollup.network_id,
					rollup.block_number as i64,
					&rollup.root[..],
					covered
				],
			)
			.map_err(db_err)?;
		}

		tx.commit().map_err(db_err)
	}

	fn rollback_sync(
		&self,
		network: NetworkId,
		fork_point: Option<u64>,
	) -> StorageResult<RollbackSummary> {
		let mut conn = self.conn()?;
		let tx = conn.transaction().map_err(db_err)?;
		let fork = fork_point.map_or(-1, |f| f as i64);

		// Claims in flight for removed deposits would prove the old leaf
		let monitored_txs = tx
			.execute(
				"DELETE FROM monitored_tx WHERE origin_network = ?1 AND status != 'confirmed'
				 AND deposit_count IN (
					SELECT deposit_count FROM deposit WHERE network_id = ?1 AND block_number > ?2
				 )",
				params![network, fork],
			)
			.map_err(db_err)?;
		let deposits = tx
			.execute(
				"DELETE FROM deposit WHERE network_id = ?1 AND block_number > ?2",
				params![network, fork],
			)
			.map_err(db_err)?;
		let claims = tx
			.execute(
				"DELETE FROM claim WHERE network_id = ?1 AND block_number > ?2",
				params![network, fork],
			)
			.map_err(db_err)?;
		let global_exit_roots = tx
			.execute(
				"DELETE FROM exit_root WHERE scope = 'global' AND network_id = ?1 AND block_number > ?2",
				params![network, fork],
			)
			.map_err(db_err)?;
		tx.execute(
			"DELETE FROM exit_root WHERE network_id = ?1 AND block_number > ?2",
			params![network, fork],
		)
		.map_err(db_err)?;
		let blocks = tx
			.execute(
				"DELETE FROM block WHERE network_id = ?1 AND number > ?2",
				params![network, fork],
			)
			.map_err(db_err)?;

		let fork_hash: Option<Vec<u8>> = tx
			.query_row(
				"SELECT hash FROM block WHERE network_id = ?1 AND number = ?2",
				params![network, fork],
				|row| row.get(0),
			)
			.optional()
			.map_err(db_err)?;
		match fork_hash {
			Some(hash) => {
				tx.execute(
					"INSERT INTO block_cursor (network_id, number, hash) VALUES (?1, ?2, ?3)
					 ON CONFLICT(network_id) DO UPDATE SET number = excluded.number, hash = excluded.hash",
					params![network, fork, hash],
				)
				.map_err(db_err)?;
			}
			None => {
				tx.execute(
					"DELETE FROM block_cursor WHERE network_id = ?1",
					params![network],
				)
				.map_err(db_err)?;
			}
		}

		tx.commit().map_err(db_err)?;
		Ok(RollbackSummary {
			blocks: blocks as u64,
			deposits: deposits as u64,
			claims: claims as u64,
			global_exit_roots: global_exit_roots as u64,
			monitored_txs: monitored_txs as u64,
		})
	}

	fn prune_rollup_sync(&self, floor: &Coverage) -> StorageResult<u64> {
		let mut conn = self.conn()?;
		let tx = conn.transaction().map_err(db_err)?;
		let superseded: Vec<i64> = {
			let mut stmt = tx
				.prepare("SELECT id, covered FROM exit_root WHERE scope = 'rollup'")
				.map_err(db_err)?;
			let rows = stmt
				.query_map([], |row| {
					Ok((row.get::<_, i64>("id")?, row.get::<_, String>("covered")?))
				})
				.map_err(db_err)?;
			let mut ids = Vec::new();
			for row in rows {
				let (id, covered) = row.map_err(db_err)?;
				let covered: Coverage = serde_json::from_str(&covered)
					.map_err(|e| StorageError::InvalidData(format!("covered: {}", e)))?;
				if is_superseded(&covered, floor) {
					ids.push(id);
				}
			}
			ids
		};
		for id in &superseded {
			tx.execute("DELETE FROM exit_root WHERE id = ?1", params![id])
				.map_err(db_err)?;
		}
		tx.commit().map_err(db_err)?;
		Ok(superseded.len() as u64)
	}

	fn monitored_params(tx: &MonitoredTx) -> StorageResult<(String, String)> {
		let attempts = serde_json::to_string(&tx.attempts)
			.map_err(|e| StorageError::InvalidData(e.to_string()))?;
		Ok((attempts, tx.gas_price.to_string()))
	}

	fn update_monitored_in(tx: &Transaction, record: &MonitoredTx) -> StorageResult<()> {
		let (attempts, gas_price) = Self::monitored_params(record)?;
		let updated = tx
			.execute(
				"UPDATE monitored_tx SET status = ?4, global_exit_root = ?5, mainnet_exit_root = ?6,
				 rollup_exit_root = ?7, tree_size = ?8, to_address = ?9, call_data = ?10, gas_price = ?11,
				 gas_limit = ?12, nonce = ?13, attempts = ?14, failed_sends = ?15, updated_at = ?16,
				 last_error = ?17
				 WHERE destination_network = ?1 AND origin_network = ?2 AND deposit_count = ?3",
				params![
					record.key.destination_network,
					record.key.origin_network,
					record.key.deposit_count,
					record.status.to_string(),
					&record.global_exit_root[..],
					&record.mainnet_exit_root[..],
					&record.rollup_exit_root[..],
					record.tree_size as i64,
					&record.to[..],
					&record.call_data,
					gas_price,
					record.gas_limit as i64,
					record.nonce.map(|n| n as i64),
					attempts,
					record.failed_sends,
					record.updated_at,
					record.last_error,
				],
			)
			.map_err(db_err)?;
		if updated == 0 {
			return Err(StorageError::NotFound(record.key.to_string()));
		}
		Ok(())
	}
}

#[async_trait]
impl EventRepository for SqliteStorage {
	async fn get_cursor(&self, network: NetworkId) -> StorageResult<Option<BlockCursor>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT network_id, number, hash FROM block_cursor WHERE network_id = ?1",
			params![network],
			|row| {
				Ok(BlockCursor {
					network_id: row.get("network_id")?,
					number: row.get::<_, i64>("number")? as u64,
					hash: fixed(row, "hash")?,
				})
			},
		)
		.optional()
		.map_err(db_err)
	}

	async fn get_block(&self, network: NetworkId, number: u64) -> StorageResult<Option<BlockRecord>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT * FROM block WHERE network_id = ?1 AND number = ?2",
			params![network, number as i64],
			Self::row_to_block,
		)
		.optional()
		.map_err(db_err)
	}

	async fn persist_block(&self, batch: &BlockBatch) -> StorageResult<()> {
		self.persist_block_sync(batch)
	}

	async fn rollback_to(
		&self,
		network: NetworkId,
		fork_point: Option<u64>,
	) -> StorageResult<RollbackSummary> {
		self.rollback_sync(network, fork_point)
	}

	async fn prune_rollup_exit_roots(&self, floor: &Coverage) -> StorageResult<u64> {
		self.prune_rollup_sync(floor)
	}

	async fn get_deposits(&self, network: NetworkId) -> StorageResult<Vec<Deposit>> {
		let conn = self.conn()?;
		let mut stmt = conn
			.prepare(&format!(
				"SELECT {} FROM deposit WHERE network_id = ?1 ORDER BY deposit_count",
				DEPOSIT_COLUMNS
			))
			.map_err(db_err)?;
		let rows = stmt
			.query_map(params![network], Self::row_to_deposit)
			.map_err(db_err)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
	}

	async fn get_deposit(
		&self,
		network: NetworkId,
		deposit_count: u32,
	) -> StorageResult<Option<Deposit>> {
		let conn = self.conn()?;
		conn.query_row(
			&format!(
				"SELECT {} FROM deposit WHERE network_id = ?1 AND deposit_count = ?2",
				DEPOSIT_COLUMNS
			),
			params![network, deposit_count],
			Self::row_to_deposit,
		)
		.optional()
		.map_err(db_err)
	}

	async fn get_unclaimed_deposits(
		&self,
		origin: NetworkId,
		destination: NetworkId,
		below_count: u64,
	) -> StorageResult<Vec<Deposit>> {
		let conn = self.conn()?;
		let mut stmt = conn
			.prepare(&format!(
				"SELECT {} FROM deposit d
				 WHERE d.network_id = ?1 AND d.destination_network = ?2 AND d.deposit_count < ?3
				 AND NOT EXISTS (
					SELECT 1 FROM monitored_tx m
					WHERE m.destination_network = ?2 AND m.origin_network = ?1
					AND m.deposit_count = d.deposit_count
				 )
				 ORDER BY d.deposit_count",
				DEPOSIT_COLUMNS
			))
			.map_err(db_err)?;
		let rows = stmt
			.query_map(
				params![origin, destination, below_count as i64],
				Self::row_to_deposit,
			)
			.map_err(db_err)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
	}

	async fn get_claim(
		&self,
		network: NetworkId,
		origin: NetworkId,
		deposit_count: u32,
	) -> StorageResult<Option<Claim>> {
		let conn = self.conn()?;
		conn.query_row(
			&format!(
				"SELECT {} FROM claim WHERE network_id = ?1 AND origin_network = ?2 AND deposit_count = ?3",
				CLAIM_COLUMNS
			),
			params![network, origin, deposit_count],
			Self::row_to_claim,
		)
		.optional()
		.map_err(db_err)
	}

	async fn get_rollup_exit_roots(&self) -> StorageResult<Vec<RollupExitRoot>> {
		let conn = self.conn()?;
		let mut stmt = conn
			.prepare(
				"SELECT root, covered, network_id, block_number FROM exit_root
				 WHERE scope = 'rollup' ORDER BY id",
			)
			.map_err(db_err)?;
		let rows = stmt
			.query_map([], Self::row_to_rollup_exit_root)
			.map_err(db_err)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
	}

	async fn latest_global_exit_root(
		&self,
		network: NetworkId,
	) -> StorageResult<Option<GlobalExitRoot>> {
		let conn = self.conn()?;
		conn.query_row(
			"SELECT network_id, block_number, block_hash, root, mainnet_exit_root, rollup_exit_root
			 FROM exit_root WHERE scope = 'global' AND network_id = ?1
			 ORDER BY block_number DESC, id DESC LIMIT 1",
			params![network],
			Self::row_to_global_exit_root,
		)
		.optional()
		.map_err(db_err)
	}
}

#[async_trait]
impl MonitoredTxRepository for SqliteStorage {
	async fn insert_monitored_tx(&self, record: &MonitoredTx) -> StorageResult<()> {
		let conn = self.conn()?;
		let (attempts, gas_price) = Self::monitored_params(record)?;
		conn.execute(
			&format!(
				"INSERT INTO monitored_tx ({}) VALUES
				 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
				MONITORED_TX_COLUMNS
			),
			params![
				record.key.destination_network,
				record.key.origin_network,
				record.key.deposit_count,
				record.status.to_string(),
				&record.global_exit_root[..],
				&record.mainnet_exit_root[..],
				&record.rollup_exit_root[..],
				record.tree_size as i64,
				&record.to[..],
				&record.call_data,
				gas_price,
				record.gas_limit as i64,
				record.nonce.map(|n| n as i64),
				attempts,
				record.failed_sends,
				record.created_at,
				record.updated_at,
				record.last_error,
			],
		)
		.map_err(db_err)?;
		Ok(())
	}

	async fn update_monitored_tx(&self, record: &MonitoredTx) -> StorageResult<()> {
		let mut conn = self.conn()?;
		let tx = conn.transaction().map_err(db_err)?;
		Self::update_monitored_in(&tx, record)?;
		tx.commit().map_err(db_err)
	}

	async fn get_monitored_tx(&self, key: &DepositKey) -> StorageResult<Option<MonitoredTx>> {
		let conn = self.conn()?;
		conn.query_row(
			&format!(
				"SELECT {} FROM monitored_tx
				 WHERE destination_network = ?1 AND origin_network = ?2 AND deposit_count = ?3",
				MONITORED_TX_COLUMNS
			),
			params![key.destination_network, key.origin_network, key.deposit_count],
			Self::row_to_monitored_tx,
		)
		.optional()
		.map_err(db_err)
	}

	async fn get_pending_monitored_txs(
		&self,
		destination: NetworkId,
	) -> StorageResult<Vec<MonitoredTx>> {
		let conn = self.conn()?;
		let mut stmt = conn
			.prepare(&format!(
				"SELECT {} FROM monitored_tx
				 WHERE destination_network = ?1 AND status NOT IN ('confirmed', 'failed')
				 ORDER BY created_at, origin_network, deposit_count",
				MONITORED_TX_COLUMNS
			))
			.map_err(db_err)?;
		let rows = stmt
			.query_map(params![destination], Self::row_to_monitored_tx)
			.map_err(db_err)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
	}

	async fn confirm_monitored_tx(&self, record: &MonitoredTx, claim: &Claim) -> StorageResult<()> {
		let mut conn = self.conn()?;
		let tx = conn.transaction().map_err(db_err)?;
		Self::update_monitored_in(&tx, record)?;
		Self::insert_claim_tx(&tx, claim, false)?;
		tx.commit().map_err(db_err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::{Hash, SentTx};
	use crate::storage::DepositExitRoot;
	use crate::test_utils::{block_record, claim, deposit, global_exit_root};

	fn sample_batch(network: NetworkId, number: u64, first_count: u32) -> BlockBatch {
		let mut batch = BlockBatch::new(block_record(network, number));
		for i in 0..2 {
			let mut d = deposit(network, 1, first_count + i, 1_000 + u128::from(i));
			d.block_number = number;
			d.metadata = vec![0xde, 0xad, i as u8];
			batch.deposits.push(d);
		}
		batch.exit_roots.push(DepositExitRoot {
			network_id: network,
			deposit_count: u64::from(first_count) + 2,
			root: [number as u8; 32],
			block_number: number,
		});
		batch
	}

	#[tokio::test]
	async fn test_persist_block_round_trip() {
		let store = SqliteStorage::in_memory().unwrap();
		let mut batch = sample_batch(0, 7, 0);
		let mut g = global_exit_root(0, 7);
		g.block_number = 7;
		batch.global_exit_roots.push(g.clone());
		batch.rollup_exit_roots.push(RollupExitRoot {
			root: [5; 32],
			covered: Coverage::from([(1, 3), (2, 0)]),
			network_id: 0,
			block_number: 7,
		});
		store.persist_block(&batch).await.unwrap();

		let cursor = store.get_cursor(0).await.unwrap().unwrap();
		assert_eq!(cursor.number, 7);
		assert_eq!(cursor.hash, batch.block.hash);
		assert_eq!(store.get_block(0, 7).await.unwrap(), Some(batch.block.clone()));

		let deposits = store.get_deposits(0).await.unwrap();
		assert_eq!(deposits, batch.deposits);
		assert_eq!(store.latest_global_exit_root(0).await.unwrap(), Some(g));
		assert_eq!(
			store.get_rollup_exit_roots().await.unwrap(),
			batch.rollup_exit_roots
		);
	}

	#[tokio::test]
	async fn test_failed_block_write_is_atomic() {
		let store = SqliteStorage::in_memory().unwrap();
		store.persist_block(&sample_batch(0, 1, 0)).await.unwrap();

		// reuses deposit counts 0 and 1: the whole block must be refused
		let duplicate = sample_batch(0, 2, 0);
		assert!(matches!(
			store.persist_block(&duplicate).await,
			Err(StorageError::Duplicate(_))
		));
		assert_eq!(store.get_cursor(0).await.unwrap().unwrap().number, 1);
		assert!(store.get_block(0, 2).await.unwrap().is_none());
		assert_eq!(store.get_deposits(0).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_rollback_to_fork_point() {
		let store = SqliteStorage::in_memory().unwrap();
		for (i, number) in (1..=4u64).enumerate() {
			store
				.persist_block(&sample_batch(0, number, (i * 2) as u32))
				.await
				.unwrap();
		}

		let summary = store.rollback_to(0, Some(2)).await.unwrap();
		assert_eq!(summary.blocks, 2);
		assert_eq!(summary.deposits, 4);
		assert_eq!(store.get_cursor(0).await.unwrap().unwrap().number, 2);
		assert_eq!(store.get_deposits(0).await.unwrap().len(), 4);

		store.rollback_to(0, None).await.unwrap();
		assert!(store.get_cursor(0).await.unwrap().is_none());
		assert!(store.get_deposits(0).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_rollback_drops_claims_in_flight_for_removed_deposits() {
		let store = SqliteStorage::in_memory().unwrap();
		store.persist_block(&sample_batch(0, 1, 0)).await.unwrap();
		store.persist_block(&sample_batch(0, 2, 2)).await.unwrap();

		let ger = global_exit_root(0, 2);
		let key = |count| DepositKey {
			destination_network: 1,
			origin_network: 0,
			deposit_count: count,
		};
		// 0 survives, 2 is removed while pending, 3 is removed after confirmation
		for count in [0, 2, 3] {
			store
				.insert_monitored_tx(&MonitoredTx::new(key(count), &ger, 4, [3; 20]))
				.await
				.unwrap();
		}
		let mut confirmed = store.get_monitored_tx(&key(3)).await.unwrap().unwrap();
		confirmed.mark_confirmed(Some(21_000));
		store.update_monitored_tx(&confirmed).await.unwrap();

		let summary = store.rollback_to(0, Some(1)).await.unwrap();
		assert_eq!(summary.deposits, 2);
		assert_eq!(summary.monitored_txs, 1);
		assert!(store.get_monitored_tx(&key(0)).await.unwrap().is_some());
		assert!(store.get_monitored_tx(&key(2)).await.unwrap().is_none());
		assert!(store.get_monitored_tx(&key(3)).await.unwrap().is_some());

		// the re-emitted deposit at count 2 is claimable again
		store.persist_block(&sample_batch(0, 2, 2)).await.unwrap();
		let unclaimed = store.get_unclaimed_deposits(0, 1, 4).await.unwrap();
		assert_eq!(
			unclaimed.iter().map(|d| d.deposit_count).collect::<Vec<_>>(),
			vec![1, 2]
		);
	}

	#[tokio::test]
	async fn test_prune_rollup_exit_roots() {
		let store = SqliteStorage::in_memory().unwrap();
		let mut batch = BlockBatch::new(block_record(1, 1));
		for (i, covered) in [[0, 0], [1, 0], [2, 0], [2, 1]].into_iter().enumerate() {
			batch.rollup_exit_roots.push(RollupExitRoot {
				root: [i as u8; 32],
				covered: Coverage::from([(1, covered[0]), (2, covered[1])]),
				network_id: 1,
				block_number: 1,
			});
		}
		store.persist_block(&batch).await.unwrap();

		let pruned = store
			.prune_rollup_exit_roots(&Coverage::from([(1, 2), (2, 0)]))
			.await
			.unwrap();
		assert_eq!(pruned, 1);
		let roots: Vec<Hash> = store
			.get_rollup_exit_roots()
			.await
			.unwrap()
			.into_iter()
			.map(|r| r.root)
			.collect();
		assert_eq!(roots, vec![[0; 32], [2; 32], [3; 32]]);
	}

	#[tokio::test]
	async fn test_refused_broadcasts_are_persisted() {
		let store = SqliteStorage::in_memory().unwrap();
		let key = DepositKey {
			destination_network: 1,
			origin_network: 0,
			deposit_count: 0,
		};
		let mut record = MonitoredTx::new(key, &global_exit_root(0, 1), 1, [3; 20]);
		store.insert_monitored_tx(&record).await.unwrap();
		record.mark_send_failed("underpriced".to_string());
		record.mark_send_failed("underpriced".to_string());
		store.update_monitored_tx(&record).await.unwrap();

		let stored = store.get_monitored_tx(&key).await.unwrap().unwrap();
		assert_eq!(stored.failed_sends, 2);
		assert_eq!(stored.submissions(), 2);
	}

	#[tokio::test]
	async fn test_amount_above_u128_round_trips() {
		let store = SqliteStorage::in_memory().unwrap();
		let mut batch = sample_batch(0, 1, 0);
		let large = U256::from(u128::MAX) * U256::from(1_000u32);
		batch.deposits[0].amount = large;
		store.persist_block(&batch).await.unwrap();
		assert_eq!(store.get_deposit(0, 0).await.unwrap().unwrap().amount, large);
	}

	#[tokio::test]
	async fn test_monitored_tx_lifecycle() {
		let store = SqliteStorage::in_memory().unwrap();
		store.persist_block(&sample_batch(0, 1, 0)).await.unwrap();

		let unclaimed = store.get_unclaimed_deposits(0, 1, 2).await.unwrap();
		assert_eq!(unclaimed.len(), 2);
		assert_eq!(store.get_unclaimed_deposits(0, 1, 1).await.unwrap().len(), 1);

		let ger = global_exit_root(0, 1);
		let key = DepositKey {
			destination_network: 1,
			origin_network: 0,
			deposit_count: 0,
		};
		let mut record = MonitoredTx::new(key, &ger, 2, [3; 20]);
		store.insert_monitored_tx(&record).await.unwrap();
		assert!(matches!(
			store.insert_monitored_tx(&record).await,
			Err(StorageError::Duplicate(_))
		));
		assert_eq!(store.get_unclaimed_deposits(0, 1, 2).await.unwrap().len(), 1);

		record.mark_built(vec![1, 2, 3], 1_000_000_000, 300_000);
		record.mark_submitted(SentTx {
			hash: [4; 32],
			nonce: 11,
		});
		store.update_monitored_tx(&record).await.unwrap();
		assert_eq!(store.get_monitored_tx(&key).await.unwrap(), Some(record.clone()));
		assert_eq!(store.get_pending_monitored_txs(1).await.unwrap().len(), 1);

		record.mark_confirmed(Some(60_000));
		store
			.confirm_monitored_tx(&record, &claim(1, 0, 0, 20))
			.await
			.unwrap();
		assert!(store.get_pending_monitored_txs(1).await.unwrap().is_empty());
		assert_eq!(store.get_claim(1, 0, 0).await.unwrap().unwrap().block_number, 20);
	}

	#[tokio::test]
	async fn test_file_store_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("relayer.db");
		{
			let store = SqliteStorage::new(&path).unwrap();
			store.persist_block(&sample_batch(2, 5, 0)).await.unwrap();
		}
		let reopened = SqliteStorage::new(&path).unwrap();
		assert_eq!(reopened.get_cursor(2).await.unwrap().unwrap().number, 5);
		assert_eq!(reopened.get_deposits(2).await.unwrap().len(), 2);
	}

	#[test]
	fn test_file_store_connections_wait_on_locks() {
		let dir = tempfile::tempdir().unwrap();
		let store = SqliteStorage::new(dir.path().join("relayer.db")).unwrap();
		let conn = store.conn().unwrap();
		let journal_mode: String = conn
			.query_row("PRAGMA journal_mode", [], |row| row.get(0))
			.unwrap();
		let busy_timeout: i64 = conn
			.query_row("PRAGMA busy_timeout", [], |row| row.get(0))
			.unwrap();
		assert_eq!(journal_mode, "wal");
		assert_eq!(busy_timeout, 5_000);
	}
}

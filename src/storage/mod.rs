//! Storage Layer Module
//!
//! Durable record of everything the relayer derives from the chains: processed block cursors,
//! decoded deposit/claim/exit-root events, computed roots and the claim managers' monitored
//! transactions.
//!
//! This module contains:
//! - Repository trait definitions
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{
	BridgeStorage, EventRepository, MonitoredTxRepository, StorageError, StorageResult,
};
pub use types::{
	BlockBatch, BlockCursor, BlockRecord, DepositExitRoot, RollbackSummary, RollupExitRoot,
};

//! Claim transaction manager module
//!
//! One [`ClaimTxManager`] per leaf network claims the deposits destined to it once a global exit
//! root makes them provable.
//!
//! - `types`: monitored transactions, their status machine, errors and configuration.
//! - `manager`: discovery, building, submission and polling of claims.
//! - `gas`: gas price escalation for replacements.

pub mod gas;
pub mod manager;
pub mod types;

pub use manager::ClaimTxManager;
pub use types::{
	ClaimTxConfig, ClaimTxError, ClaimTxResult, DepositKey, MonitoredTx, MonitoredTxStatus,
	TxAttempt,
};

//! Chain access for the root and leaf networks
//!
//! This module provides the [`ChainAccess`] trait every synchronizer and claim manager talks
//! through, the ethers-backed implementation used in production, the shared event and
//! transaction types, the bridge contract ABI and the trusted exit-root source.

/// The chain access trait
mod access;
/// Ethers provider client for bridge networks
mod client;
/// Bridge contract events and calls
pub mod contract;
/// Trusted exit-root feed of a sequencer node
pub mod trusted;
/// Type definitions for blocks, events and transactions
mod types;

pub use access::ChainAccess;
pub use client::{RpcChainClient, SigningKey, classify_error};
pub use ethers::types::U256;
pub use trusted::{TrustedExitRootSource, TrustedStateClient};
pub use types::*;

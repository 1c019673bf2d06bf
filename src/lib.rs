//! Cross-chain bridge relayer.
//!
//! Watches a root network and any number of leaf networks, keeps the deposit trees and exit roots
//! of the bridge in sync with them, and claims provable deposits on their destination network.
//!
//! - [`synchronizer`]: one per network, turns blocks into the durable event log.
//! - [`bridgectrl`]: deposit trees, rollup and global exit roots, proofs.
//! - [`claimtxman`]: one per leaf network, drives claim transactions to confirmation.
//! - [`exit_root_channel`]: notifications from synchronizers to claim managers.
//! - [`storage`]: SQLite and in-memory stores.
//! - [`chain`]: chain access trait, the ethers-based node client, bridge contract codecs and the
//!   sequencer's trusted exit-root feed.

pub mod bridgectrl;
pub mod chain;
pub mod claimtxman;
pub mod config;
pub mod exit_root_channel;
pub mod storage;
pub mod synchronizer;
pub mod utils;

#[cfg(test)]
pub mod test_utils;

//! Bridge controller module
//!
//! Merkle state of the bridge: one append-only deposit tree per network, the rollup exit root
//! aggregated over the leaf networks, and the global exit roots observed on each chain.
//!
//! - `merkle`: fixed-height append-only tree with zero hashes and historical proofs.
//! - `hash`: leaf encoding and global exit root hashing.
//! - `controller`: the shared [`BridgeController`] used by synchronizers and claim managers.

/// Shared owner of the deposit trees
pub mod controller;
/// Leaf and root hashing rules
pub mod hash;
/// Append-only sparse Merkle tree
pub mod merkle;

pub use controller::{BridgeController, BridgeCtrlError, Coverage, is_superseded};
pub use hash::{compute_global_exit_root, deposit_leaf_hash};
pub use merkle::{MerkleError, MerkleTree, verify_proof};

//! Leaf and root hashing rules.
//!
//! Changing any field, width or order below produces different roots than the contracts compute.

use crate::chain::{Deposit, Hash};
use crate::utils::{keccak256, keccak256_concat};

/// Leaf hash of a deposit:
///
/// `keccak256(leaf_type u8 || token_network u32be || token_address [20] ||
/// destination_network u32be || destination_address [20] || amount u256be || keccak256(metadata))`
pub fn deposit_leaf_hash(deposit: &Deposit) -> Hash {
	let mut buf = Vec::with_capacity(1 + 4 + 20 + 4 + 20 + 32 + 32);
	buf.push(deposit.leaf_type);
	buf.extend_from_slice(&deposit.token_network.to_be_bytes());
	buf.extend_from_slice(&deposit.token_address);
	buf.extend_from_slice(&deposit.destination_network.to_be_bytes());
	buf.extend_from_slice(&deposit.destination_address);
	let mut amount = [0u8; 32];
	deposit.amount.to_big_endian(&mut amount);
	buf.extend_from_slice(&amount);
	buf.extend_from_slice(&keccak256(&deposit.metadata));
	keccak256(&buf)
}

/// Global exit root over a mainnet (root network) exit root and a rollup exit root.
pub fn compute_global_exit_root(mainnet_exit_root: &Hash, rollup_exit_root: &Hash) -> Hash {
	keccak256_concat(mainnet_exit_root, rollup_exit_root)
}

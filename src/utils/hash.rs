use sha3::{Digest, Keccak256};

/// Keccak-256 of a single byte string.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
	let mut hasher = Keccak256::new();
	hasher.update(data);
	hasher.finalize().into()
}

/// Keccak-256 of the concatenation of two 32-byte values.
pub fn keccak256_concat(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
	let mut hasher = Keccak256::new();
	hasher.update(left);
	hasher.update(right);
	hasher.finalize().into()
}

//!
//! Utility module for the bridge relayer.
//!
//! Re-exports hashing and hex helpers used throughout the codebase.
/// Keccak hashing helpers
pub mod hash;
/// Hex encoding, decoding and serde adapters for fixed-size byte arrays
pub mod encoding;

pub use hash::{keccak256, keccak256_concat};
pub use encoding::{decode_fixed, short_hash};

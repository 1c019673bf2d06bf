//! Append-only sparse Merkle tree of fixed height.
//!
//! Only complete subtrees are stored: `layers[k][j]` is the node at level `k` covering leaves
//! `j * 2^k .. (j + 1) * 2^k`, present once all of those leaves exist. Partially filled nodes on
//! the right edge are recomputed on demand, which also lets proofs be built against any earlier
//! tree size without keeping old roots around.

use crate::chain::Hash;
use crate::utils::keccak256_concat;

/// Largest supported tree height.
pub const MAX_TREE_HEIGHT: u8 = 32;

/// Error types for Merkle tree operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
	#[error("Invalid tree height {0}, must be between 1 and {MAX_TREE_HEIGHT}")]
	InvalidHeight(u8),

	#[error("Tree is full ({capacity} leaves)")]
	TreeFull { capacity: u64 },

	#[error("Leaf {index} not found in tree of size {size}")]
	NotFound { index: u64, size: u64 },

	#[error("Requested size {requested} exceeds tree size {size}")]
	InvalidSize { requested: u64, size: u64 },
}

/// Zero hashes for every level: `z[0] = 0x00..00`, `z[k + 1] = keccak(z[k] || z[k])`.
pub fn zero_hashes(height: u8) -> Vec<Hash> {
	let mut zeros = Vec::with_capacity(height as usize + 1);
	zeros.push([0u8; 32]);
	for level in 0..height as usize {
		let next = keccak256_concat(&zeros[level], &zeros[level]);
		zeros.push(next);
	}
	zeros
}

/// Check a sibling path for the leaf at `index` against `root`.
pub fn verify_proof(leaf: &Hash, index: u64, proof: &[Hash], root: &Hash) -> bool {
	let mut node = *leaf;
	for (level, sibling) in proof.iter().enumerate() {
		node = if (index >> level) & 1 == 1 {
			keccak256_concat(sibling, &node)
		} else {
			keccak256_concat(&node, sibling)
		};
	}
	node == *root
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
	height: u8,
	zero_hashes: Vec<Hash>,
	layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
	pub fn new(height: u8) -> Result<Self, MerkleError> {
		if height == 0 || height > MAX_TREE_HEIGHT {
			return Err(MerkleError::InvalidHeight(height));
		}
		Ok(Self {
			height,
			zero_hashes: zero_hashes(height),
			layers: vec![Vec::new(); height as usize + 1],
		})
	}

	pub fn height(&self) -> u8 {
		self.height
	}

	/// Number of leaves in the tree.
	pub fn len(&self) -> u64 {
		self.layers[0].len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.layers[0].is_empty()
	}

	pub fn capacity(&self) -> u64 {
		1u64 << self.height
	}

	/// Append a leaf and return its index.
	pub fn append(&mut self, leaf: Hash) -> Result<u64, MerkleError> {
		if self.len() >= self.capacity() {
			return Err(MerkleError::TreeFull {
				capacity: self.capacity(),
			});
		}

		let index = self.len();
		self.layers[0].push(leaf);
		for level in 0..self.height as usize {
			let nodes = &self.layers[level];
			if nodes.len() % 2 != 0 {
				break;
			}
			let parent = keccak256_concat(&nodes[nodes.len() - 2], &nodes[nodes.len() - 1]);
			self.layers[level + 1].push(parent);
		}
		Ok(index)
	}

	/// Remove the last `count` leaves.
	pub fn truncate_last(&mut self, count: u64) -> Result<(), MerkleError> {
		let size = self.len();
		if count > size {
			return Err(MerkleError::InvalidSize {
				requested: count,
				size,
			});
		}
		let new_size = size - count;
		for (level, nodes) in self.layers.iter_mut().enumerate() {
			nodes.truncate((new_size >> level) as usize);
		}
		Ok(())
	}

	pub fn root(&self) -> Hash {
		self.node_at(self.height as usize, 0, self.len())
	}

	/// Root of the tree formed by the first `size` leaves.
	pub fn root_at(&self, size: u64) -> Result<Hash, MerkleError> {
		self.check_size(size)?;
		Ok(self.node_at(self.height as usize, 0, size))
	}

	/// Sibling path for leaf `index` against the current root.
	pub fn proof(&self, index: u64) -> Result<Vec<Hash>, MerkleError> {
		self.proof_at(index, self.len())
	}

	/// Sibling path for leaf `index` against the root of the first `size` leaves.
	pub fn proof_at(&self, index: u64, size: u64) -> Result<Vec<Hash>, MerkleError> {
		self.check_size(size)?;
		if index >= size {
			return Err(MerkleError::NotFound { index, size });
		}
		Ok((0..self.height as usize)
			.map(|level| self.node_at(level, (index >> level) ^ 1, size))
			.collect())
	}

	fn check_size(&self, size: u64) -> Result<(), MerkleError> {
		if size > self.len() {
			return Err(MerkleError::InvalidSize {
				requested: size,
				size: self.len(),
			});
		}
		Ok(())
	}

	/// Node at `level`/`index` as it was when the tree held `size` leaves.
	fn node_at(&self, level: usize, index: u64, size: u64) -> Hash {
		let span = 1u64 << level;
		let start = index * span;
		if start >= size {
			return self.zero_hashes[level];
		}
		if start + span <= size {
			return self.layers[level][index as usize];
		}
		let left = self.node_at(level - 1, index * 2, size);
		let right = self.node_at(level - 1, index * 2 + 1, size);
		keccak256_concat(&left, &right)
	}
}

//! Bridge controller: owner of every deposit tree and of the exit-root aggregate.
//!
//! The controller keeps one [`MerkleTree`] per network behind its own lock, the history of
//! rollup exit roots (root-of-roots over the leaf networks) and the latest global exit root
//! observed on each network. It is a pure function of the persisted event log: [`load`]
//! rebuilds it from storage on startup.
//!
//! [`load`]: BridgeController::load

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use super::hash::{compute_global_exit_root, deposit_leaf_hash};
use super::merkle::{MerkleError, MerkleTree};
use crate::chain::{GlobalExitRoot, Hash, NetworkId};
use crate::storage::{BridgeStorage, EventRepository, RollupExitRoot};
use crate::utils::short_hash;

/// Tree sizes covered by a global exit root, keyed by origin network.
pub type Coverage = BTreeMap<NetworkId, u64>;

/// Whether a rollup snapshot covering `covered` can no longer back a claim: every leaf tree it
/// covers is at or below `floor`, and it is neither the snapshot at `floor` nor the all-empty one.
pub fn is_superseded(covered: &Coverage, floor: &Coverage) -> bool {
	covered != floor
		&& covered.values().any(|size| *size > 0)
		&& covered
			.iter()
			.all(|(network, size)| floor.get(network).is_some_and(|f| size <= f))
}

/// Error types for the bridge controller
#[derive(Debug, thiserror::Error)]
pub enum BridgeCtrlError {
	#[error("Unknown network {0}")]
	UnknownNetwork(NetworkId),

	#[error("Deposit tree of network {network} is full ({capacity} leaves)")]
	TreeFull { network: NetworkId, capacity: u64 },

	#[error("Out of order deposit on network {network}: expected count {expected}, got {got}")]
	OutOfOrder {
		network: NetworkId,
		expected: u64,
		got: u32,
	},

	#[error("Deposit {deposit_count} of network {network} not found (tree size {size})")]
	NotFound {
		network: NetworkId,
		deposit_count: u32,
		size: u64,
	},

	#[error("Cannot remove {requested} deposits from network {network} holding {size}")]
	InvalidRemoval {
		network: NetworkId,
		requested: u64,
		size: u64,
	},

	#[error("Merkle tree error: {0}")]
	Merkle(#[from] MerkleError),

	#[error("Lock poisoned: {0}")]
	LockPoisoned(String),

	#[error("Storage error while loading: {0}")]
	Storage(String),
}

/// A deposit tree with the root it had at every size.
#[derive(Debug)]
struct NetworkTree {
	tree: MerkleTree,
	/// `roots[s]` is the root with `s` leaves
	roots: Vec<Hash>,
	sizes_by_root: HashMap<Hash, u64>,
}

impl NetworkTree {
	fn new(height: u8) -> Result<Self, MerkleError> {
		let tree = MerkleTree::new(height)?;
		let empty_root = tree.root();
		Ok(Self {
			tree,
			roots: vec![empty_root],
			sizes_by_root: HashMap::from([(empty_root, 0)]),
		})
	}

	fn push(&mut self, leaf: Hash) -> Result<(u64, Hash), MerkleError> {
		let index = self.tree.append(leaf)?;
		let root = self.tree.root();
		self.roots.push(root);
		self.sizes_by_root.insert(root, index + 1);
		Ok((index, root))
	}

	fn truncate(&mut self, count: u64) -> Result<(), MerkleError> {
		self.tree.truncate_last(count)?;
		for _ in 0..count {
			let size = (self.roots.len() - 1) as u64;
			if let Some(root) = self.roots.pop() {
				if self.sizes_by_root.get(&root) == Some(&size) {
					self.sizes_by_root.remove(&root);
				}
			}
		}
		Ok(())
	}

	fn root(&self) -> Hash {
		self.roots[self.roots.len() - 1]
	}
}

/// Owns the deposit trees of the root network and every leaf network.
pub struct BridgeController {
	height: u8,
	root_network: NetworkId,
	/// Leaf networks in ascending id order; the position is the slot in the rollup tree
	leaf_networks: Vec<NetworkId>,
	trees: HashMap<NetworkId, RwLock<NetworkTree>>,
	/// Every rollup exit root computed so far and the leaf tree sizes it covers
	rollup_history: RwLock<HashMap<Hash, Coverage>>,
	/// Latest global exit root observed on each network
	global_exit_roots: RwLock<HashMap<NetworkId, GlobalExitRoot>>,
}

impl BridgeController {
	/// Create a controller with empty trees for the root network and the given leaf networks.
	pub fn new(
		height: u8,
		root_network: NetworkId,
		leaf_networks: &[NetworkId],
	) -> Result<Self, BridgeCtrlError> {
		let mut leaves = leaf_networks.to_vec();
		leaves.sort_unstable();
		leaves.dedup();

		let mut trees = HashMap::new();
		trees.insert(root_network, RwLock::new(NetworkTree::new(height)?));
		for network in &leaves {
			trees.insert(*network, RwLock::new(NetworkTree::new(height)?));
		}

		let controller = Self {
			height,
			root_network,
			leaf_networks: leaves,
			trees,
			rollup_history: RwLock::new(HashMap::new()),
			global_exit_roots: RwLock::new(HashMap::new()),
		};

		// The all-empty rollup root must resolve before any deposit exists
		let (root, covered) = controller.compute_rollup()?;
		controller.write_rollup_history()?.insert(root, covered);

		Ok(controller)
	}

	pub fn height(&self) -> u8 {
		self.height
	}

	pub fn root_network(&self) -> NetworkId {
		self.root_network
	}

	pub fn leaf_networks(&self) -> &[NetworkId] {
		&self.leaf_networks
	}

	pub fn is_leaf_network(&self, network: NetworkId) -> bool {
		self.leaf_networks.binary_search(&network).is_ok()
	}

	fn read_tree(&self, network: NetworkId) -> Result<RwLockReadGuard<'_, NetworkTree>, BridgeCtrlError> {
		self.trees
			.get(&network)
			.ok_or(BridgeCtrlError::UnknownNetwork(network))?
			.read()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))
	}

	fn write_tree(
		&self,
		network: NetworkId,
	) -> Result<RwLockWriteGuard<'_, NetworkTree>, BridgeCtrlError> {
		self.trees
			.get(&network)
			.ok_or(BridgeCtrlError::UnknownNetwork(network))?
			.write()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))
	}

	fn write_rollup_history(
		&self,
	) -> Result<RwLockWriteGuard<'_, HashMap<Hash, Coverage>>, BridgeCtrlError> {
		self.rollup_history
			.write()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))
	}

	/// Append a deposit leaf to `network`'s tree.
	///
	/// `expected_count` is the deposit count carried by the event; it must equal the current
	/// tree size. Returns the assigned deposit count and the new root. The tree is left untouched
	/// on error.
	pub fn add_deposit(
		&self,
		network: NetworkId,
		leaf_hash: Hash,
		expected_count: u32,
	) -> Result<(u32, Hash), BridgeCtrlError> {
		let mut tree = self.write_tree(network)?;
		let size = tree.tree.len();
		if size >= tree.tree.capacity() {
			return Err(BridgeCtrlError::TreeFull {
				network,
				capacity: tree.tree.capacity(),
			});
		}
		if u64::from(expected_count) != size {
			return Err(BridgeCtrlError::OutOfOrder {
				network,
				expected: size,
				got: expected_count,
			});
		}

		let (index, root) = tree.push(leaf_hash)?;
		debug!(
			"Network {}: appended deposit {} -> root {}",
			network,
			index,
			short_hash(&root)
		);
		Ok((index as u32, root))
	}

	/// Remove the last `count` deposits of `network` (LIFO), pruning rollup exit roots that
	/// covered any removed leaf.
	pub fn remove_last_deposits(&self, network: NetworkId, count: u64) -> Result<(), BridgeCtrlError> {
		let new_size = {
			let mut tree = self.write_tree(network)?;
			let size = tree.tree.len();
			if count > size {
				return Err(BridgeCtrlError::InvalidRemoval {
					network,
					requested: count,
					size,
				});
			}
			tree.truncate(count)?;
			size - count
		};

		if self.is_leaf_network(network) {
			self.write_rollup_history()?.retain(|_, covered| {
				covered.get(&network).is_none_or(|size| *size <= new_size)
			});
		}

		info!(
			"Network {}: removed {} deposits, tree size now {}",
			network, count, new_size
		);
		Ok(())
	}

	/// Sibling path of deposit `deposit_count` against the current root.
	pub fn get_proof(
		&self,
		network: NetworkId,
		deposit_count: u32,
	) -> Result<Vec<Hash>, BridgeCtrlError> {
		let tree = self.read_tree(network)?;
		let size = tree.tree.len();
		self.proof_from(&tree, network, deposit_count, size)
	}

	/// Sibling path of deposit `deposit_count` against the root the tree had at `tree_size`.
	pub fn get_proof_at(
		&self,
		network: NetworkId,
		deposit_count: u32,
		tree_size: u64,
	) -> Result<Vec<Hash>, BridgeCtrlError> {
		let tree = self.read_tree(network)?;
		self.proof_from(&tree, network, deposit_count, tree_size)
	}

	fn proof_from(
		&self,
		tree: &NetworkTree,
		network: NetworkId,
		deposit_count: u32,
		size: u64,
	) -> Result<Vec<Hash>, BridgeCtrlError> {
		if u64::from(deposit_count) >= size || size > tree.tree.len() {
			return Err(BridgeCtrlError::NotFound {
				network,
				deposit_count,
				size: tree.tree.len().min(size),
			});
		}
		Ok(tree.tree.proof_at(u64::from(deposit_count), size)?)
	}

	pub fn current_root(&self, network: NetworkId) -> Result<Hash, BridgeCtrlError> {
		Ok(self.read_tree(network)?.root())
	}

	/// Number of deposits in `network`'s tree.
	pub fn deposit_count(&self, network: NetworkId) -> Result<u64, BridgeCtrlError> {
		Ok(self.read_tree(network)?.tree.len())
	}

	/// Root and size of `network`'s tree read under one lock.
	pub fn tree_state(&self, network: NetworkId) -> Result<(Hash, u64), BridgeCtrlError> {
		let tree = self.read_tree(network)?;
		Ok((tree.root(), tree.tree.len()))
	}

	fn compute_rollup(&self) -> Result<(Hash, Coverage), BridgeCtrlError> {
		let mut rollup = MerkleTree::new(self.height)?;
		let mut covered = Coverage::new();
		for network in &self.leaf_networks {
			let (root, size) = self.tree_state(*network)?;
			rollup.append(root)?;
			covered.insert(*network, size);
		}
		Ok((rollup.root(), covered))
	}

	/// Current rollup exit root over every leaf network's exit root.
	pub fn rollup_exit_root(&self) -> Result<Hash, BridgeCtrlError> {
		Ok(self.compute_rollup()?.0)
	}

	/// Compute the current rollup exit root and remember which leaf tree sizes it covers.
	pub fn snapshot_rollup(
		&self,
		network_id: NetworkId,
		block_number: u64,
	) -> Result<RollupExitRoot, BridgeCtrlError> {
		let (root, covered) = self.compute_rollup()?;
		self.write_rollup_history()?.insert(root, covered.clone());
		Ok(RollupExitRoot {
			root,
			covered,
			network_id,
			block_number,
		})
	}

	/// Current global exit root: `keccak256(current_root(root) || rollup_exit_root())`.
	pub fn global_exit_root(&self) -> Result<Hash, BridgeCtrlError> {
		let mainnet = self.current_root(self.root_network)?;
		let rollup = self.rollup_exit_root()?;
		Ok(compute_global_exit_root(&mainnet, &rollup))
	}

	/// Latest global exit root observed on the root network.
	pub fn observed_global_exit_root(&self) -> Result<Option<GlobalExitRoot>, BridgeCtrlError> {
		self.observed_global_exit_root_on(self.root_network)
	}

	/// Latest global exit root observed on `network`.
	pub fn observed_global_exit_root_on(
		&self,
		network: NetworkId,
	) -> Result<Option<GlobalExitRoot>, BridgeCtrlError> {
		let latest = self
			.global_exit_roots
			.read()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))?;
		Ok(latest.get(&network).cloned())
	}

	/// Whether `update` differs from the latest global exit root observed on its network.
	pub fn is_new_global_exit_root(&self, update: &GlobalExitRoot) -> Result<bool, BridgeCtrlError> {
		Ok(self
			.observed_global_exit_root_on(update.network_id)?
			.is_none_or(|current| current.global_exit_root != update.global_exit_root))
	}

	/// Make `update` the latest global exit root for its network.
	pub fn commit_global_exit_root(&self, update: GlobalExitRoot) -> Result<(), BridgeCtrlError> {
		let mut latest = self
			.global_exit_roots
			.write()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))?;
		latest.insert(update.network_id, update);
		Ok(())
	}

	/// Replace (or clear) the latest global exit root of `network`, used after a rollback.
	pub fn reset_global_exit_root(
		&self,
		network: NetworkId,
		update: Option<GlobalExitRoot>,
	) -> Result<(), BridgeCtrlError> {
		let mut latest = self
			.global_exit_roots
			.write()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))?;
		match update {
			Some(update) => latest.insert(network, update),
			None => latest.remove(&network),
		};
		Ok(())
	}

	/// Tree sizes a global exit root covers.
	///
	/// The mainnet exit root is matched against the root network's root history and the rollup
	/// exit root against the recorded rollup snapshots. Components not yet known locally are
	/// left out, so their deposits are not claimable under this root.
	pub fn resolve_coverage(&self, update: &GlobalExitRoot) -> Result<Coverage, BridgeCtrlError> {
		let mut coverage = Coverage::new();

		if let Some(size) = self
			.read_tree(self.root_network)?
			.sizes_by_root
			.get(&update.mainnet_exit_root)
		{
			coverage.insert(self.root_network, *size);
		}

		let history = self
			.rollup_history
			.read()
			.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))?;
		if let Some(covered) = history.get(&update.rollup_exit_root) {
			coverage.extend(covered.iter().map(|(n, s)| (*n, *s)));
		}

		Ok(coverage)
	}

	/// Drop rollup snapshots no observed global exit root can still reference.
	///
	/// The floor is the component-wise minimum of the rollup coverage of the latest global exit
	/// root observed on every network. Snapshots entirely below it are superseded. Returns the
	/// floor, or `None` when some network has no resolvable global exit root yet.
	pub fn prune_rollup_history(&self) -> Result<Option<Coverage>, BridgeCtrlError> {
		let observed: Vec<GlobalExitRoot> = {
			let latest = self
				.global_exit_roots
				.read()
				.map_err(|e| BridgeCtrlError::LockPoisoned(e.to_string()))?;
			let mut networks = vec![self.root_network];
			networks.extend(self.leaf_networks.iter().copied());
			let mut observed = Vec::with_capacity(networks.len());
			for network in networks {
				match latest.get(&network) {
					Some(update) => observed.push(update.clone()),
					None => return Ok(None),
				}
			}
			observed
		};

		let mut history = self.write_rollup_history()?;
		let mut floor: Option<Coverage> = None;
		for update in &observed {
			let Some(covered) = history.get(&update.rollup_exit_root) else {
				return Ok(None);
			};
			floor = Some(match floor {
				None => covered.clone(),
				Some(floor) => floor
					.into_iter()
					.map(|(network, size)| {
						(network, size.min(covered.get(&network).copied().unwrap_or(0)))
					})
					.collect(),
			});
		}
		let Some(floor) = floor else {
			return Ok(None);
		};

		let before = history.len();
		history.retain(|_, covered| !is_superseded(covered, &floor));
		let pruned = before - history.len();
		if pruned > 0 {
			debug!("Pruned {} rollup exit roots below {:?}", pruned, floor);
		}
		Ok(Some(floor))
	}

	/// Rebuild every tree, the rollup history and the latest global exit roots from storage.
	pub async fn load(&self, storage: &dyn BridgeStorage) -> Result<(), BridgeCtrlError> {
		let mut networks = vec![self.root_network];
		networks.extend(self.leaf_networks.iter().copied());

		for network in networks {
			let deposits = storage
				.get_deposits(network)
				.await
				.map_err(|e| BridgeCtrlError::Storage(e.to_string()))?;

			let mut tree = self.write_tree(network)?;
			let existing = tree.tree.len();
			tree.truncate(existing)?;
			for deposit in &deposits {
				let expected = tree.tree.len();
				if u64::from(deposit.deposit_count) != expected {
					return Err(BridgeCtrlError::OutOfOrder {
						network,
						expected,
						got: deposit.deposit_count,
					});
				}
				tree.push(deposit_leaf_hash(deposit))?;
			}
			drop(tree);

			let latest = storage
				.latest_global_exit_root(network)
				.await
				.map_err(|e| BridgeCtrlError::Storage(e.to_string()))?;
			self.reset_global_exit_root(network, latest)?;

			info!(
				"Loaded {} deposits for network {}",
				deposits.len(),
				network
			);
		}

		let snapshots = storage
			.get_rollup_exit_roots()
			.await
			.map_err(|e| BridgeCtrlError::Storage(e.to_string()))?;
		let (root, covered) = self.compute_rollup()?;
		let mut history = self.write_rollup_history()?;
		history.insert(root, covered);
		for snapshot in snapshots {
			history.insert(snapshot.root, snapshot.covered);
		}
		drop(history);

		self.prune_rollup_history()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bridgectrl::merkle::verify_proof;
	use crate::storage::{BlockBatch, MemoryStorage};
	use crate::test_utils::{block_record, deposit};
	use crate::utils::keccak256;

	fn leaf(i: u32) -> Hash {
		keccak256(&i.to_be_bytes())
	}

	fn ger(network: NetworkId, mainnet: Hash, rollup: Hash) -> GlobalExitRoot {
		GlobalExitRoot {
			network_id: network,
			mainnet_exit_root: mainnet,
			rollup_exit_root: rollup,
			global_exit_root: compute_global_exit_root(&mainnet, &rollup),
			block_number: 1,
			block_hash: [1; 32],
		}
	}

	#[test]
	fn test_add_deposit_assigns_sequential_counts() {
		let ctrl = BridgeController::new(32, 0, &[1, 2]).unwrap();
		for i in 0..5 {
			let (count, root) = ctrl.add_deposit(1, leaf(i), i).unwrap();
			assert_eq!(count, i);
			assert_eq!(ctrl.current_root(1).unwrap(), root);
		}
		assert_eq!(ctrl.deposit_count(1).unwrap(), 5);
		assert_eq!(ctrl.deposit_count(2).unwrap(), 0);
	}

	#[test]
	fn test_out_of_order_leaves_tree_untouched() {
		let ctrl = BridgeController::new(32, 0, &[1]).unwrap();
		for i in 0..5 {
			ctrl.add_deposit(0, leaf(i), i).unwrap();
		}
		let root = ctrl.current_root(0).unwrap();

		let err = ctrl.add_deposit(0, leaf(7), 7).unwrap_err();
		assert!(matches!(
			err,
			BridgeCtrlError::OutOfOrder {
				network: 0,
				expected: 5,
				got: 7
			}
		));
		let err = ctrl.add_deposit(0, leaf(3), 3).unwrap_err();
		assert!(matches!(err, BridgeCtrlError::OutOfOrder { .. }));

		assert_eq!(ctrl.current_root(0).unwrap(), root);
		assert_eq!(ctrl.deposit_count(0).unwrap(), 5);
	}

	#[test]
	fn test_tree_full() {
		let ctrl = BridgeController::new(2, 0, &[1]).unwrap();
		for i in 0..4 {
			ctrl.add_deposit(0, leaf(i), i).unwrap();
		}
		assert!(matches!(
			ctrl.add_deposit(0, leaf(4), 4),
			Err(BridgeCtrlError::TreeFull { capacity: 4, .. })
		));
	}

	#[test]
	fn test_unknown_network() {
		let ctrl = BridgeController::new(32, 0, &[1]).unwrap();
		assert!(matches!(
			ctrl.add_deposit(9, leaf(0), 0),
			Err(BridgeCtrlError::UnknownNetwork(9))
		));
	}

	#[test]
	fn test_proofs_verify_against_current_root() {
		let ctrl = BridgeController::new(32, 0, &[1]).unwrap();
		for i in 0..9 {
			ctrl.add_deposit(1, leaf(i), i).unwrap();
		}
		let root = ctrl.current_root(1).unwrap();
		for i in 0..9 {
			let proof = ctrl.get_proof(1, i).unwrap();
			assert!(verify_proof(&leaf(i), u64::from(i), &proof, &root));
		}
		assert!(matches!(
			ctrl.get_proof(1, 9),
			Err(BridgeCtrlError::NotFound { deposit_count: 9, .. })
		));
	}

	#[test]
	fn test_rollback_then_reappend_matches_direct_build() {
		let ctrl = BridgeController::new(32, 0, &[1]).unwrap();
		for i in 0..6 {
			ctrl.add_deposit(0, leaf(i), i).unwrap();
		}
		ctrl.remove_last_deposits(0, 2).unwrap();
		ctrl.add_deposit(0, leaf(104), 4).unwrap();
		ctrl.add_deposit(0, leaf(105), 5).unwrap();

		let direct = BridgeController::new(32, 0, &[1]).unwrap();
		for (i, l) in [leaf(0), leaf(1), leaf(2), leaf(3), leaf(104), leaf(105)]
			.into_iter()
			.enumerate()
		{
			direct.add_deposit(0, l, i as u32).unwrap();
		}
		assert_eq!(ctrl.current_root(0).unwrap(), direct.current_root(0).unwrap());
		assert!(matches!(
			ctrl.remove_last_deposits(0, 7),
			Err(BridgeCtrlError::InvalidRemoval { requested: 7, size: 6, .. })
		));
	}

	#[test]
	fn test_coverage_resolution() {
		let ctrl = BridgeController::new(32, 0, &[1, 2]).unwrap();
		ctrl.add_deposit(0, leaf(0), 0).unwrap();
		let (mainnet_one, _) = ctrl.tree_state(0).unwrap();
		ctrl.add_deposit(0, leaf(1), 1).unwrap();

		ctrl.add_deposit(2, leaf(0), 0).unwrap();
		let snapshot = ctrl.snapshot_rollup(2, 10).unwrap();
		assert_eq!(snapshot.covered, Coverage::from([(1, 0), (2, 1)]));

		let coverage = ctrl
			.resolve_coverage(&ger(0, mainnet_one, snapshot.root))
			.unwrap();
		assert_eq!(coverage, Coverage::from([(0, 1), (1, 0), (2, 1)]));

		// unknown rollup root: only the mainnet side is covered
		let coverage = ctrl.resolve_coverage(&ger(0, mainnet_one, [7; 32])).unwrap();
		assert_eq!(coverage, Coverage::from([(0, 1)]));
	}

	#[test]
	fn test_rollback_prunes_rollup_history() {
		let ctrl = BridgeController::new(32, 0, &[1]).unwrap();
		ctrl.add_deposit(1, leaf(0), 0).unwrap();
		ctrl.add_deposit(1, leaf(1), 1).unwrap();
		let snapshot = ctrl.snapshot_rollup(1, 5).unwrap();
		let (mainnet, _) = ctrl.tree_state(0).unwrap();

		ctrl.remove_last_deposits(1, 1).unwrap();
		let coverage = ctrl.resolve_coverage(&ger(0, mainnet, snapshot.root)).unwrap();
		assert_eq!(coverage, Coverage::from([(0, 0)]));
	}

	#[test]
	fn test_global_exit_root_change_detection() {
		let ctrl = BridgeController::new(32, 0, &[1]).unwrap();
		let first = ger(0, [1; 32], [2; 32]);
		assert!(ctrl.is_new_global_exit_root(&first).unwrap());
		ctrl.commit_global_exit_root(first.clone()).unwrap();
		assert!(!ctrl.is_new_global_exit_root(&first).unwrap());
		assert_eq!(ctrl.observed_global_exit_root().unwrap(), Some(first.clone()));

		let on_leaf = GlobalExitRoot {
			network_id: 1,
			..first.clone()
		};
		assert!(ctrl.is_new_global_exit_root(&on_leaf).unwrap());

		ctrl.reset_global_exit_root(0, None).unwrap();
		assert_eq!(ctrl.observed_global_exit_root().unwrap(), None);
	}

	#[test]
	fn test_global_exit_root_combines_current_roots() {
		let ctrl = BridgeController::new(32, 0, &[1, 2]).unwrap();
		ctrl.add_deposit(0, leaf(0), 0).unwrap();
		ctrl.add_deposit(2, leaf(1), 0).unwrap();

		let mut preimage = ctrl.current_root(0).unwrap().to_vec();
		preimage.extend_from_slice(&ctrl.rollup_exit_root().unwrap());
		assert_eq!(ctrl.global_exit_root().unwrap(), keccak256(&preimage));

		// observing an update elsewhere does not change the computed value
		let before = ctrl.global_exit_root().unwrap();
		ctrl.commit_global_exit_root(ger(0, [9; 32], [9; 32])).unwrap();
		assert_eq!(ctrl.global_exit_root().unwrap(), before);

		ctrl.add_deposit(1, leaf(2), 0).unwrap();
		assert_ne!(ctrl.global_exit_root().unwrap(), before);
	}

	#[test]
	fn test_superseded_coverage() {
		let floor = Coverage::from([(1, 3), (2, 5)]);
		assert!(is_superseded(&Coverage::from([(1, 2), (2, 5)]), &floor));
		assert!(!is_superseded(&floor, &floor));
		assert!(!is_superseded(&Coverage::from([(1, 4), (2, 1)]), &floor));
		assert!(!is_superseded(&Coverage::from([(1, 0), (2, 0)]), &floor));
	}

	#[test]
	fn test_prune_keeps_snapshots_still_referenced() {
		let ctrl = BridgeController::new(32, 0, &[1, 2]).unwrap();
		let mainnet = ctrl.current_root(0).unwrap();
		let empty = ctrl.rollup_exit_root().unwrap();

		ctrl.add_deposit(1, leaf(0), 0).unwrap();
		let first = ctrl.snapshot_rollup(1, 1).unwrap();
		ctrl.add_deposit(1, leaf(1), 1).unwrap();
		let second = ctrl.snapshot_rollup(1, 2).unwrap();
		ctrl.add_deposit(2, leaf(2), 0).unwrap();
		let third = ctrl.snapshot_rollup(2, 3).unwrap();

		// a network without an observed root blocks pruning
		ctrl.commit_global_exit_root(ger(0, mainnet, third.root)).unwrap();
		ctrl.commit_global_exit_root(ger(1, mainnet, second.root)).unwrap();
		assert_eq!(ctrl.prune_rollup_history().unwrap(), None);

		ctrl.commit_global_exit_root(ger(2, mainnet, second.root)).unwrap();
		let floor = ctrl.prune_rollup_history().unwrap().unwrap();
		assert_eq!(floor, second.covered);

		let resolved = |root| ctrl.resolve_coverage(&ger(0, mainnet, root)).unwrap();
		assert_eq!(resolved(first.root), Coverage::from([(0, 0)]));
		assert_eq!(resolved(second.root), Coverage::from([(0, 0), (1, 2), (2, 0)]));
		assert_eq!(resolved(third.root), Coverage::from([(0, 0), (1, 2), (2, 1)]));
		assert_eq!(resolved(empty), Coverage::from([(0, 0), (1, 0), (2, 0)]));
	}

	#[tokio::test]
	async fn test_load_rebuilds_from_storage() {
		let storage = MemoryStorage::new();
		let source = BridgeController::new(32, 0, &[1]).unwrap();

		let mut batch = BlockBatch::new(block_record(1, 1));
		for i in 0..3 {
			let d = deposit(1, 0, i, 10 + u128::from(i));
			source.add_deposit(1, deposit_leaf_hash(&d), i).unwrap();
			batch.deposits.push(d);
		}
		batch.rollup_exit_roots.push(source.snapshot_rollup(1, 1).unwrap());
		storage.persist_block(&batch).await.unwrap();

		let loaded = BridgeController::new(32, 0, &[1]).unwrap();
		loaded.load(&storage).await.unwrap();
		assert_eq!(loaded.deposit_count(1).unwrap(), 3);
		assert_eq!(loaded.current_root(1).unwrap(), source.current_root(1).unwrap());
		assert_eq!(
			loaded.rollup_exit_root().unwrap(),
			source.rollup_exit_root().unwrap()
		);
	}
}

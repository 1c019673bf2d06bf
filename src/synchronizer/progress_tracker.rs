//! Progress tracking for a network synchronizer.
//!
//! `SyncProgressTracker` records which block heights a synchronizer has processed and how many
//! bridge events they carried. It logs progress at regular intervals and reports gaps in the
//! processed heights, which would indicate blocks skipped by a faulty node response.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::chain::NetworkId;

/// Blocks between two periodic progress lines.
const LOG_INTERVAL: u64 = 1000;

/// Service for tracking synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	network_id: NetworkId,
	/// The highest block height we've processed
	highest_processed: Option<u64>,
	/// Heights processed since the last rollback
	processed_heights: BTreeSet<u64>,
	/// Starting height for this sync session
	start_height: u64,
	deposits_processed: usize,
	claims_processed: usize,
	exit_roots_processed: usize,
	rollbacks: usize,
	/// Height at which we last logged progress
	last_logged: u64,
}

impl SyncProgressTracker {
	/// Create a new progress tracker starting from the given height.
	pub fn new(network_id: NetworkId, start_height: u64) -> Self {
		Self {
			network_id,
			highest_processed: None,
			processed_heights: BTreeSet::new(),
			start_height,
			deposits_processed: 0,
			claims_processed: 0,
			exit_roots_processed: 0,
			rollbacks: 0,
			last_logged: start_height,
		}
	}

	/// Record a persisted block and the events it carried
	pub fn record_block(&mut self, height: u64, deposits: usize, claims: usize, exit_roots: usize) {
		self.highest_processed = Some(self.highest_processed.map_or(height, |h| h.max(height)));
		self.processed_heights.insert(height);
		self.deposits_processed += deposits;
		self.claims_processed += claims;
		self.exit_roots_processed += exit_roots;
	}

	/// Forget every height above `fork_point` after a reorg rollback
	pub fn record_rollback(&mut self, fork_point: Option<u64>) {
		self.rollbacks += 1;
		match fork_point {
			Some(fork) => {
				self.processed_heights.split_off(&(fork + 1));
				self.highest_processed = self.processed_heights.last().copied();
			}
			None => {
				self.processed_heights.clear();
				self.highest_processed = None;
			}
		}
		self.last_logged = self
			.last_logged
			.min(self.highest_processed.unwrap_or(self.start_height));
	}

	pub fn highest_processed(&self) -> Option<u64> {
		self.highest_processed
	}

	/// Check for gaps in processed heights
	///
	/// Returns a list of (before, after) pairs around each missing range.
	pub fn check_for_gaps(&self) -> Vec<(u64, u64)> {
		let heights: Vec<u64> = self.processed_heights.iter().copied().collect();
		heights
			.windows(2)
			.filter(|w| w[1] - w[0] > 1)
			.map(|w| (w[0], w[1]))
			.collect()
	}

	/// Log progress every 1000 blocks or when forced
	pub fn log_progress(&mut self, force: bool) {
		let Some(highest) = self.highest_processed else {
			return;
		};
		if !force && highest.saturating_sub(self.last_logged) < LOG_INTERVAL {
			return;
		}

		info!(
			network = self.network_id,
			"Sync progress: {} deposits, {} claims, {} exit roots processed up to block {}",
			self.deposits_processed,
			self.claims_processed,
			self.exit_roots_processed,
			highest
		);
		for (before, after) in self.check_for_gaps() {
			warn!(
				network = self.network_id,
				"Gap detected: missing blocks between {} and {}", before, after
			);
		}
		self.last_logged = highest;
	}

	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			network_id: self.network_id,
			start_height: self.start_height,
			highest_processed: self.highest_processed,
			blocks_processed: self.processed_heights.len(),
			deposits_processed: self.deposits_processed,
			claims_processed: self.claims_processed,
			exit_roots_processed: self.exit_roots_processed,
			rollbacks: self.rollbacks,
			gaps: self.check_for_gaps(),
		}
	}
}

/// Statistics about the sync progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
	pub network_id: NetworkId,
	pub start_height: u64,
	pub highest_processed: Option<u64>,
	pub blocks_processed: usize,
	pub deposits_processed: usize,
	pub claims_processed: usize,
	pub exit_roots_processed: usize,
	pub rollbacks: usize,
	pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
	/// Get a human-readable summary of the sync statistics
	pub fn summary(&self) -> String {
		format!(
			"Network {} from {} to {}: {} blocks, {} deposits, {} claims, {} exit roots, {} rollbacks{}",
			self.network_id,
			self.start_height,
			self.highest_processed
				.map_or_else(|| "-".to_string(), |h| h.to_string()),
			self.blocks_processed,
			self.deposits_processed,
			self.claims_processed,
			self.exit_roots_processed,
			self.rollbacks,
			if self.gaps.is_empty() {
				String::new()
			} else {
				format!(" ({} gaps)", self.gaps.len())
			}
		)
	}
}

//! Exit-root event channel between the synchronizers and the claim managers.
//!
//! Synchronizers publish a notification each time the global exit root observed on their
//! network changes; every claim manager subscribes for its own network. Delivery is best effort:
//! publishing never blocks, and a subscriber that falls behind is told how many notifications it
//! missed so it can re-scan storage instead.

use tokio::sync::broadcast;
use tracing::debug;

use crate::bridgectrl::Coverage;
use crate::chain::{GlobalExitRoot, Hash, NetworkId};
use crate::utils::short_hash;

/// A new global exit root observed on some network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRootNotification {
	pub update: GlobalExitRoot,
	/// Origin tree sizes the root covers, as resolved when it was observed
	pub covered: Coverage,
}

impl ExitRootNotification {
	/// Network on which the update was observed.
	pub fn origin_network(&self) -> NetworkId {
		self.update.network_id
	}

	pub fn global_exit_root(&self) -> Hash {
		self.update.global_exit_root
	}

	pub fn observed_at_block(&self) -> u64 {
		self.update.block_number
	}
}

/// Outcome of waiting on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
	Notification(ExitRootNotification),
	/// The subscriber missed this many notifications
	Lagged(u64),
	/// Every publisher is gone
	Closed,
}

/// Multi-producer, multi-consumer channel for exit-root notifications.
#[derive(Clone)]
pub struct ExitRootChannel {
	sender: broadcast::Sender<ExitRootNotification>,
	root_network: NetworkId,
}

impl ExitRootChannel {
	/// Create a channel buffering up to `capacity` notifications per subscriber.
	pub fn new(capacity: usize, root_network: NetworkId) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self {
			sender,
			root_network,
		}
	}

	/// Publish without waiting. Returns how many subscribers the notification reached.
	pub fn publish(&self, notification: ExitRootNotification) -> usize {
		let root = short_hash(&notification.global_exit_root());
		let origin = notification.origin_network();
		match self.sender.send(notification) {
			Ok(receivers) => {
				debug!(
					"Published global exit root {} from network {} to {} subscribers",
					root, origin, receivers
				);
				receivers
			}
			Err(_) => {
				debug!(
					"No subscribers for global exit root {} from network {}",
					root, origin
				);
				0
			}
		}
	}

	/// Subscribe to notifications relevant to `network`: those observed on it and those
	/// observed on the root network.
	pub fn subscribe(&self, network: NetworkId) -> ExitRootSubscription {
		ExitRootSubscription {
			network,
			root_network: self.root_network,
			receiver: self.sender.subscribe(),
		}
	}
}

/// A claim manager's view of the channel.
pub struct ExitRootSubscription {
	network: NetworkId,
	root_network: NetworkId,
	receiver: broadcast::Receiver<ExitRootNotification>,
}

impl ExitRootSubscription {
	fn is_relevant(&self, notification: &ExitRootNotification) -> bool {
		let origin = notification.origin_network();
		origin == self.network || origin == self.root_network
	}

	/// Wait for the next relevant notification.
	pub async fn recv(&mut self) -> Received {
		loop {
			match self.receiver.recv().await {
				Ok(notification) if self.is_relevant(&notification) => {
					return Received::Notification(notification);
				}
				Ok(_) => continue,
				Err(broadcast::error::RecvError::Lagged(missed)) => return Received::Lagged(missed),
				Err(broadcast::error::RecvError::Closed) => return Received::Closed,
			}
		}
	}
}

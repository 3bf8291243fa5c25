//! The live-peer registry (§2 C10).
//!
//! Tracks every peer a [`crate::server::Server`] has promoted from an
//! upgrade, so the server can fan a shutdown out to all of them and so a
//! future reconfiguration only affects connections made after it.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use crate::peer::{CloseOptions, Peer};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Registry {
	next_id: AtomicU64,
	peers: Mutex<HashMap<u64, Peer>>,
}

impl Registry {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Registers a newly-promoted peer and returns the id to
	/// [`unregister`](Self::unregister) it with later.
	pub(crate) fn register(&self, peer: Peer) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.peers.lock().expect("registry mutex poisoned").insert(id, peer);

		id
	}

	pub(crate) fn unregister(&self, id: u64) {
		self.peers.lock().expect("registry mutex poisoned").remove(&id);
	}

	/// A point-in-time snapshot of every currently-registered peer.
	pub(crate) fn peers(&self) -> Vec<Peer> {
		self.peers.lock().expect("registry mutex poisoned").values().cloned().collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.peers.lock().expect("registry mutex poisoned").len()
	}

	/// Closes every currently-registered peer with the same options and
	/// waits for them all to finish. Peers that connect after this call
	/// started are unaffected.
	pub(crate) async fn close_all(&self, options: CloseOptions) {
		let handles: Vec<_> = self
			.peers()
			.into_iter()
			.map(|peer| {
				let options = options.clone();

				tokio::spawn(async move {
					peer.close(options).await;
				})
			})
			.collect();

		for handle in handles {
			let _ = handle.await;
		}
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn new_registry_starts_empty() {
		let registry = Registry::default();
		assert_eq!(registry.len(), 0);
		assert!(registry.peers().is_empty());
	}

	#[tokio::test]
	async fn close_all_on_an_empty_registry_returns_immediately() {
		let registry = Registry::default();
		registry.close_all(CloseOptions::default()).await;
	}
}

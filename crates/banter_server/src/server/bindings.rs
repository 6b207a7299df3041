#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

/// Username to connection binding, updated on every inbound chat message.
///
/// The most recent sender of a username owns it (last-writer-wins); when a
/// connection goes away, every username still pointing at it is resolved so
/// the session layer can emit the implicit leaves.
#[derive(Debug, Clone, Default)]
pub struct SessionBindings {
	inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl SessionBindings {
	pub fn new() -> Self {
		Self::default()
	}

	/// Bind `username` to `conn_id`, displacing any previous binding.
	pub async fn bind(&self, username: &str, conn_id: u64) {
		let mut map = self.inner.lock().await;
		if let Some(prev) = map.insert(username.to_string(), conn_id)
			&& prev != conn_id
		{
			debug!(username, prev_conn = prev, conn_id, "username rebound to a new connection");
		}
	}

	/// Drop every binding owned by `conn_id` and return the usernames that
	/// were released, sorted for deterministic teardown order.
	pub async fn release_conn(&self, conn_id: u64) -> Vec<String> {
		let mut map = self.inner.lock().await;
		let mut released: Vec<String> = map
			.iter()
			.filter(|(_, owner)| **owner == conn_id)
			.map(|(name, _)| name.clone())
			.collect();
		for name in &released {
			map.remove(name);
		}
		released.sort();
		released
	}

	/// All currently bound usernames (used for the shutdown farewell).
	pub async fn all_usernames(&self) -> Vec<String> {
		let map = self.inner.lock().await;
		let mut out: Vec<String> = map.keys().cloned().collect();
		out.sort();
		out
	}

	pub async fn owner_of(&self, username: &str) -> Option<u64> {
		let map = self.inner.lock().await;
		map.get(username).copied()
	}
}

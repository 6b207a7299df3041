#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

/// The set of usernames currently considered present.
///
/// Membership changes are reported back to the caller so the session layer
/// can decide whether a presence broadcast is due; the tracker itself never
/// notifies anyone.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
	users: Arc<Mutex<HashSet<String>>>,
}

impl PresenceTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark `username` present. Returns false when the user was already
	/// present (a duplicate join).
	pub async fn mark_joined(&self, username: &str) -> bool {
		let mut users = self.users.lock().await;
		users.insert(username.to_string())
	}

	/// Mark `username` absent. Idempotent; returns false when the user was
	/// not present.
	pub async fn mark_left(&self, username: &str) -> bool {
		let mut users = self.users.lock().await;
		users.remove(username)
	}

	pub async fn contains(&self, username: &str) -> bool {
		let users = self.users.lock().await;
		users.contains(username)
	}

	/// Materialized copy of the current membership, sorted for stable
	/// full-list broadcasts.
	pub async fn snapshot(&self) -> Vec<String> {
		let users = self.users.lock().await;
		let mut out: Vec<String> = users.iter().cloned().collect();
		out.sort();
		out
	}

	pub async fn len(&self) -> usize {
		let users = self.users.lock().await;
		users.len()
	}
}

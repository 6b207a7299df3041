#![forbid(unsafe_code)]

use std::collections::HashSet;

use proptest::prelude::*;

use crate::server::presence::PresenceTracker;

#[tokio::test]
async fn join_is_reported_once() {
	let presence = PresenceTracker::new();

	assert!(presence.mark_joined("alice").await);
	assert!(!presence.mark_joined("alice").await, "duplicate join must report not-new");
	assert!(presence.contains("alice").await);
	assert_eq!(presence.len().await, 1);
}

#[tokio::test]
async fn leave_is_idempotent() {
	let presence = PresenceTracker::new();

	presence.mark_joined("bob").await;
	assert!(presence.mark_left("bob").await);
	assert!(!presence.mark_left("bob").await);
	assert!(!presence.contains("bob").await);
}

#[tokio::test]
async fn snapshot_is_sorted() {
	let presence = PresenceTracker::new();

	for name in ["mallory", "alice", "bob"] {
		presence.mark_joined(name).await;
	}

	assert_eq!(presence.snapshot().await, vec!["alice", "bob", "mallory"]);
}

#[derive(Debug, Clone)]
enum Op {
	Join(u8),
	Leave(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
	prop_oneof![(0u8..8).prop_map(Op::Join), (0u8..8).prop_map(Op::Leave)]
}

proptest! {
	#[test]
	fn tracker_matches_set_model(ops in proptest::collection::vec(op_strategy(), 0..64)) {
		let rt = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
		rt.block_on(async {
			let presence = PresenceTracker::new();
			let mut model: HashSet<String> = HashSet::new();

			for op in ops {
				match op {
					Op::Join(n) => {
						let name = format!("user-{n}");
						let was_new = presence.mark_joined(&name).await;
						prop_assert_eq!(was_new, model.insert(name));
					}
					Op::Leave(n) => {
						let name = format!("user-{n}");
						let was_present = presence.mark_left(&name).await;
						prop_assert_eq!(was_present, model.remove(&name));
					}
				}
			}

			let mut expected: Vec<String> = model.into_iter().collect();
			expected.sort();
			prop_assert_eq!(presence.snapshot().await, expected);
			Ok(())
		})?;
	}
}

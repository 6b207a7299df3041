#![forbid(unsafe_code)]

use tokio::sync::mpsc;

use crate::server::registry::SinkRegistry;

#[tokio::test]
async fn register_and_unregister_track_len() {
	let registry: SinkRegistry<u32> = SinkRegistry::new();
	assert_eq!(registry.len().await, 0);

	let (tx_a, _rx_a) = mpsc::channel(4);
	let (tx_b, _rx_b) = mpsc::channel(4);
	let a = registry.register(tx_a).await;
	let b = registry.register(tx_b).await;
	assert_ne!(a, b, "sink ids must be unique");
	assert_eq!(registry.len().await, 2);

	registry.unregister(a).await;
	assert_eq!(registry.len().await, 1);

	// Idempotent: a second unregister of the same id is a no-op.
	registry.unregister(a).await;
	assert_eq!(registry.len().await, 1);

	registry.unregister(b).await;
	assert_eq!(registry.len().await, 0);
}

#[tokio::test]
async fn snapshot_prunes_closed_sinks() {
	let registry: SinkRegistry<u32> = SinkRegistry::new();

	let (tx_live, mut rx_live) = mpsc::channel(4);
	let (tx_dead, rx_dead) = mpsc::channel(4);
	let _live = registry.register(tx_live).await;
	let _dead = registry.register(tx_dead).await;

	drop(rx_dead);

	let snapshot = registry.snapshot().await;
	assert_eq!(snapshot.len(), 1);
	assert_eq!(registry.len().await, 1);

	snapshot[0].1.send(7).await.expect("send to live sink");
	assert_eq!(rx_live.recv().await, Some(7));
}

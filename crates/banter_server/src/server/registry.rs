#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Opaque handle for a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Registry of live delivery sinks for one kind of broadcast payload.
///
/// Each subscriber registers the sending half of its queue and gets back a
/// [`SinkId`] it must unregister on teardown. Delivery iterates over a
/// snapshot copy so a slow or closing subscriber never holds up the lock.
#[derive(Debug, Clone)]
pub struct SinkRegistry<T> {
	inner: Arc<Mutex<Inner<T>>>,
}

#[derive(Debug)]
struct Inner<T> {
	next_id: u64,
	sinks: HashMap<u64, mpsc::Sender<T>>,
}

impl<T> Default for SinkRegistry<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> SinkRegistry<T> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner {
				next_id: 1,
				sinks: HashMap::new(),
			})),
		}
	}

	/// Register a sink; ids are unique for the lifetime of the registry.
	pub async fn register(&self, tx: mpsc::Sender<T>) -> SinkId {
		let mut inner = self.inner.lock().await;
		let id = inner.next_id;
		inner.next_id += 1;
		inner.sinks.insert(id, tx);
		debug!(sink_id = id, sinks = inner.sinks.len(), "sink registered");
		SinkId(id)
	}

	/// Remove a sink. Unknown ids are ignored, so teardown paths can call
	/// this unconditionally.
	pub async fn unregister(&self, id: SinkId) {
		let mut inner = self.inner.lock().await;
		if inner.sinks.remove(&id.0).is_some() {
			debug!(sink_id = id.0, sinks = inner.sinks.len(), "sink unregistered");
		}
	}

	/// Snapshot of every live sink, with already-closed ones pruned out.
	pub async fn snapshot(&self) -> Vec<(SinkId, mpsc::Sender<T>)> {
		let mut inner = self.inner.lock().await;
		inner.sinks.retain(|_, tx| !tx.is_closed());
		inner.sinks.iter().map(|(id, tx)| (SinkId(*id), tx.clone())).collect()
	}

	pub async fn len(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.sinks.len()
	}
}

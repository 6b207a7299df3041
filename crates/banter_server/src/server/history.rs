#![forbid(unsafe_code)]

use std::collections::VecDeque;

use banter_protocol::pb;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
	/// Number of recent messages retained; older ones are evicted in FIFO
	/// order.
	pub capacity: usize,
}

impl Default for HistoryConfig {
	fn default() -> Self {
		Self { capacity: 100 }
	}
}

/// Sink for every well-formed inbound chat message, markers included.
///
/// The session layer appends without caring where the messages end up; the
/// in-memory cache is the only backend today.
#[async_trait::async_trait]
pub trait HistorySink: Send + Sync {
	async fn append(&self, msg: pb::ChatMessage);
}

/// Bounded in-memory cache of the most recent chat messages.
pub struct MessageCache {
	cfg: HistoryConfig,
	inner: Mutex<VecDeque<pb::ChatMessage>>,
}

impl MessageCache {
	pub fn new(cfg: HistoryConfig) -> Self {
		let capacity = cfg.capacity;
		Self {
			cfg,
			inner: Mutex::new(VecDeque::with_capacity(capacity)),
		}
	}

	/// Oldest-first copy of the cached messages.
	pub async fn recent(&self) -> Vec<pb::ChatMessage> {
		let inner = self.inner.lock().await;
		inner.iter().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.len()
	}
}

impl Default for MessageCache {
	fn default() -> Self {
		Self::new(HistoryConfig::default())
	}
}

#[async_trait::async_trait]
impl HistorySink for MessageCache {
	async fn append(&self, msg: pb::ChatMessage) {
		let mut inner = self.inner.lock().await;
		inner.push_back(msg);
		while inner.len() > self.cfg.capacity {
			inner.pop_front();
		}
	}
}

#![forbid(unsafe_code)]

use banter_protocol::pb;
use banter_protocol::version::PROTOCOL_MAJOR;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::server::registry::SinkRegistry;

/// Fan-out of chat envelopes and presence updates to every registered sink.
///
/// Delivery is per-recipient FIFO and never blocks: a full queue drops the
/// item for that recipient only, a closed queue is skipped and pruned on the
/// next snapshot.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
	chat_sinks: SinkRegistry<pb::Envelope>,
	presence_sinks: SinkRegistry<pb::PresenceUpdate>,
}

impl Broadcaster {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn chat_sinks(&self) -> &SinkRegistry<pb::Envelope> {
		&self.chat_sinks
	}

	pub fn presence_sinks(&self) -> &SinkRegistry<pb::PresenceUpdate> {
		&self.presence_sinks
	}

	/// Deliver a chat message to every registered chat stream, sender
	/// included.
	pub async fn broadcast_chat(&self, msg: pb::ChatMessage) {
		let env = pb::Envelope {
			version: PROTOCOL_MAJOR,
			request_id: String::new(),
			msg: Some(pb::envelope::Msg::Chat(msg)),
		};

		let mut dropped: u64 = 0;
		for (sink_id, tx) in self.chat_sinks.snapshot().await {
			match tx.try_send(env.clone()) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped += 1;
					metrics::counter!("banter_server_chat_dropped_total").increment(1);
					warn!(?sink_id, "chat sink queue full, dropping message for this recipient");
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {
					debug!(?sink_id, "chat sink closed, skipping");
				}
			}
		}

		metrics::counter!("banter_server_chat_broadcast_total").increment(1);
		if dropped > 0 {
			debug!(dropped, "chat broadcast dropped items on full queues");
		}
	}

	/// Deliver a presence update to every registered presence stream.
	pub async fn broadcast_presence(&self, update: pb::PresenceUpdate) {
		let mut dropped: u64 = 0;
		for (sink_id, tx) in self.presence_sinks.snapshot().await {
			match tx.try_send(update.clone()) {
				Ok(()) => {}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped += 1;
					metrics::counter!("banter_server_presence_dropped_total").increment(1);
					warn!(?sink_id, "presence sink queue full, dropping update for this recipient");
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {
					debug!(?sink_id, "presence sink closed, skipping");
				}
			}
		}

		metrics::counter!("banter_server_presence_broadcast_total").increment(1);
		if dropped > 0 {
			debug!(dropped, "presence broadcast dropped items on full queues");
		}
	}

	/// Broadcast a join delta followed by a fresh full list.
	pub async fn broadcast_join(&self, username: &str, users: Vec<String>) {
		self.broadcast_presence(presence_join(username)).await;
		self.broadcast_presence(presence_full_list(users)).await;
	}

	/// Broadcast a leave delta followed by a fresh full list.
	pub async fn broadcast_leave(&self, username: &str, users: Vec<String>) {
		self.broadcast_presence(presence_leave(username)).await;
		self.broadcast_presence(presence_full_list(users)).await;
	}
}

pub fn presence_full_list(users: Vec<String>) -> pb::PresenceUpdate {
	pb::PresenceUpdate {
		kind: pb::PresenceKind::FullList as i32,
		users,
		username: String::new(),
	}
}

pub fn presence_join(username: &str) -> pb::PresenceUpdate {
	pb::PresenceUpdate {
		kind: pb::PresenceKind::Join as i32,
		users: Vec::new(),
		username: username.to_string(),
	}
}

pub fn presence_leave(username: &str) -> pb::PresenceUpdate {
	pb::PresenceUpdate {
		kind: pb::PresenceKind::Leave as i32,
		users: Vec::new(),
		username: username.to_string(),
	}
}

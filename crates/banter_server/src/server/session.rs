#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use banter_protocol::framing::{DEFAULT_MAX_FRAME_BYTES, encode_frame};
use banter_protocol::version::PROTOCOL_MAJOR;
use banter_protocol::{BodyKind, classify_body, markers, pb};
use banter_util::time::unix_ms_now;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::bindings::SessionBindings;
use crate::server::broadcaster::{Broadcaster, presence_full_list, presence_leave};
use crate::server::history::HistorySink;
use crate::server::presence::PresenceTracker;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: u32,

	/// Queued outbound envelopes per chat stream before drops.
	pub outbound_queue_capacity: usize,

	/// Queued updates per presence stream before drops.
	pub presence_queue_capacity: usize,

	pub server_name: String,
	pub server_instance_id: String,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_BYTES as u32,
			outbound_queue_capacity: 1024,
			presence_queue_capacity: 64,
			server_name: format!("banter_server/{}", env!("CARGO_PKG_VERSION")),
			server_instance_id: "dev-instance".to_string(),
		}
	}
}

/// Shared collaborators every session works against.
#[derive(Clone)]
pub struct SessionContext {
	pub broadcaster: Broadcaster,
	pub presence: PresenceTracker,
	pub bindings: SessionBindings,
	pub history: Arc<dyn HistorySink>,
}

/// Serve one QUIC connection until the client goes away.
///
/// The first bidirectional stream the client opens is the chat stream
/// (Hello/Welcome, then Login/Chat envelopes). Every further bidirectional
/// stream must start with a PresenceSubscribe and becomes a presence stream.
pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	ctx: SessionContext,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("banter_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("banter_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let max_frame_bytes = settings.max_frame_bytes as usize;

	let (mut chat_send, mut chat_recv) = connection.accept_bi().await.context("accept chat bidirectional stream")?;

	let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<pb::Envelope>();
	let reader_task = tokio::spawn(async move {
		let mut buf = Vec::<u8>::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match chat_recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("chat stream read failed")),
			};

			metrics::counter!("banter_server_chat_bytes_in_total").increment(n as u64);

			buf.extend_from_slice(&tmp[..n]);

			loop {
				match banter_protocol::decode_frame::<pb::Envelope>(&buf, max_frame_bytes) {
					Ok((msg, used)) => {
						buf.drain(0..used);
						metrics::counter!("banter_server_envelopes_in_total").increment(1);

						if inbound_tx.send(msg).is_err() {
							return Ok(());
						}
					}
					Err(banter_protocol::FramingError::InsufficientData { .. }) => break,
					Err(e) => {
						metrics::counter!("banter_server_chat_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode chat frame"));
					}
				}
			}
		}
	});

	let hello = wait_for_hello(&mut inbound_rx).await?;
	let client_instance_id = if hello.client_instance_id.trim().is_empty() {
		format!("conn-{conn_id}")
	} else {
		hello.client_instance_id.clone()
	};

	info!(
		conn_id,
		client_name = %hello.client_name,
		client_instance_id = %client_instance_id,
		"received Hello"
	);
	metrics::counter!("banter_server_hello_total").increment(1);

	send_envelope(
		&mut chat_send,
		envelope(pb::envelope::Msg::Welcome(pb::Welcome {
			server_name: settings.server_name.clone(),
			server_instance_id: settings.server_instance_id.clone(),
			server_time_unix_ms: unix_ms_now(),
			max_frame_bytes: settings.max_frame_bytes,
		})),
		max_frame_bytes,
	)
	.await?;

	// From here on all outbound traffic funnels through one bounded queue so
	// broadcasts and direct replies stay FIFO per recipient.
	let (out_tx, mut out_rx) = mpsc::channel::<pb::Envelope>(settings.outbound_queue_capacity);
	let sink_id = ctx.broadcaster.chat_sinks().register(out_tx.clone()).await;

	let writer_task = tokio::spawn(async move {
		while let Some(env) = out_rx.recv().await {
			if let Err(e) = send_envelope(&mut chat_send, env, max_frame_bytes).await {
				debug!(conn_id, error = %e, "chat stream write failed, stopping writer");
				break;
			}
		}
	});

	let presence_conn = connection.clone();
	let presence_ctx = ctx.clone();
	let presence_settings = settings.clone();
	let presence_acceptor = tokio::spawn(async move {
		loop {
			let (send, recv) = match presence_conn.accept_bi().await {
				Ok(streams) => streams,
				Err(_) => return,
			};
			metrics::counter!("banter_server_presence_streams_total").increment(1);

			let ctx = presence_ctx.clone();
			let settings = presence_settings.clone();
			tokio::spawn(async move {
				if let Err(e) = handle_presence_stream(conn_id, send, recv, ctx, settings).await {
					debug!(conn_id, error = %e, "presence stream ended with error");
				}
			});
		}
	});

	let loop_result = async {
		while let Some(env) = inbound_rx.recv().await {
			let Some(msg) = env.msg else { continue };

			match msg {
				pb::envelope::Msg::Login(req) => {
					let username = req.username.trim().to_string();
					// Auth is a stub: every login is accepted.
					info!(conn_id, username = %username, "login");
					metrics::counter!("banter_server_logins_total").increment(1);

					ctx.bindings.bind(&username, conn_id).await;

					let result = pb::LoginResponse {
						accepted: true,
						detail: format!("welcome, {username}"),
					};
					let reply = pb::Envelope {
						version: PROTOCOL_MAJOR,
						request_id: env.request_id,
						msg: Some(pb::envelope::Msg::LoginResult(result)),
					};
					if out_tx.send(reply).await.is_err() {
						break;
					}
				}

				pb::envelope::Msg::Chat(msg) => {
					handle_inbound_chat(conn_id, &ctx, msg).await;
				}

				pb::envelope::Msg::Hello(_) => {
					debug!(conn_id, "ignoring duplicate Hello");
				}

				other => {
					warn!(conn_id, "unhandled chat stream message: {:?}", other);
				}
			}
		}
		Ok::<(), anyhow::Error>(())
	}
	.await;

	presence_acceptor.abort();
	ctx.broadcaster.chat_sinks().unregister(sink_id).await;
	drop(out_tx);

	// Implicit leave for every username this connection still owns.
	let released = ctx.bindings.release_conn(conn_id).await;
	for username in released {
		if ctx.presence.mark_left(&username).await {
			info!(conn_id, username = %username, "implicit leave on disconnect");
			let users = ctx.presence.snapshot().await;
			ctx.broadcaster.broadcast_leave(&username, users).await;
		} else {
			debug!(conn_id, username = %username, "released binding for user already absent");
		}
	}

	let _ = reader_task.await;
	let _ = writer_task.await;

	loop_result
}

/// Route one inbound chat message: track presence, record history, fan out.
/// A message without a sender is dropped silently; an empty body is still an
/// ordinary chat message.
pub(crate) async fn handle_inbound_chat(conn_id: u64, ctx: &SessionContext, mut msg: pb::ChatMessage) {
	let sender = msg.sender.trim().to_string();
	if sender.is_empty() {
		metrics::counter!("banter_server_senderless_chat_dropped_total").increment(1);
		debug!(conn_id, "dropping chat message with empty sender");
		return;
	}
	msg.sender = sender.clone();

	ctx.bindings.bind(&sender, conn_id).await;
	ctx.history.append(msg.clone()).await;

	match classify_body(&msg.body) {
		BodyKind::Join => {
			if ctx.presence.mark_joined(&sender).await {
				info!(conn_id, username = %sender, "user joined");
				let users = ctx.presence.snapshot().await;
				ctx.broadcaster.broadcast_join(&sender, users).await;
			} else {
				debug!(conn_id, username = %sender, "duplicate join ignored");
			}
		}
		BodyKind::Leave => {
			let was_present = ctx.presence.mark_left(&sender).await;
			if !was_present {
				debug!(conn_id, username = %sender, "leave for user not marked present");
			}
			info!(conn_id, username = %sender, "user left");
			let users = ctx.presence.snapshot().await;
			ctx.broadcaster.broadcast_leave(&sender, users).await;
		}
		BodyKind::Chat => {
			metrics::counter!("banter_server_chat_messages_total").increment(1);
			ctx.broadcaster.broadcast_chat(msg).await;
		}
	}
}

/// Serve one presence stream: subscribe handshake, initial full list, then
/// forward queued updates until either side closes.
async fn handle_presence_stream(
	conn_id: u64,
	mut send: quinn::SendStream,
	mut recv: quinn::RecvStream,
	ctx: SessionContext,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	let max_frame_bytes = settings.max_frame_bytes as usize;

	let first = read_one_envelope(&mut recv, max_frame_bytes)
		.await
		.context("read presence subscribe")?;

	let username = match first.msg {
		Some(pb::envelope::Msg::PresenceSubscribe(s)) => s.username,
		other => {
			warn!(conn_id, "expected PresenceSubscribe on presence stream, got {:?}", other);
			send_envelope(
				&mut send,
				envelope(pb::envelope::Msg::Error(pb::Error {
					code: "EXPECTED_PRESENCE_SUBSCRIBE".to_string(),
					message: "first message on a presence stream must be PresenceSubscribe".to_string(),
				})),
				max_frame_bytes,
			)
			.await
			.ok();
			return Ok(());
		}
	};

	debug!(conn_id, username = %username, "presence stream subscribed");

	// Register before the snapshot so a concurrent delta queues behind the
	// full list instead of being lost.
	let (tx, mut rx) = mpsc::channel::<pb::PresenceUpdate>(settings.presence_queue_capacity);
	let sink_id = ctx.broadcaster.presence_sinks().register(tx).await;

	let initial = presence_full_list(ctx.presence.snapshot().await);
	if let Err(e) = send_envelope(&mut send, envelope(pb::envelope::Msg::Presence(initial)), max_frame_bytes).await {
		ctx.broadcaster.presence_sinks().unregister(sink_id).await;
		return Err(e.context("send initial presence full list"));
	}

	let mut tmp = [0u8; 256];
	let result = loop {
		tokio::select! {
			maybe_update = rx.recv() => {
				let Some(update) = maybe_update else { break Ok(()) };
				if let Err(e) = send_envelope(&mut send, envelope(pb::envelope::Msg::Presence(update)), max_frame_bytes).await {
					break Err(e.context("write presence update"));
				}
			}
			read = recv.read(&mut tmp) => {
				match read {
					// Clients have nothing to say after subscribing.
					Ok(Some(_)) => debug!(conn_id, "ignoring data on presence stream"),
					Ok(None) => break Ok(()),
					Err(_) => break Ok(()),
				}
			}
		}
	};

	ctx.broadcaster.presence_sinks().unregister(sink_id).await;
	debug!(conn_id, username = %username, "presence stream closed");
	result
}

/// Announce the shutdown on behalf of every user still bound, then clear
/// presence with one final full list.
pub async fn shutdown_farewell(ctx: &SessionContext) {
	let usernames = ctx.bindings.all_usernames().await;
	if usernames.is_empty() {
		return;
	}

	info!(users = usernames.len(), "broadcasting shutdown farewell");

	for username in usernames {
		ctx.broadcaster
			.broadcast_chat(pb::ChatMessage {
				sender: username.clone(),
				body: markers::SERVER_SHUTDOWN.to_string(),
				timestamp: unix_ms_now(),
			})
			.await;

		if ctx.presence.mark_left(&username).await {
			ctx.broadcaster.broadcast_presence(presence_leave(&username)).await;
		}
	}

	let remaining = ctx.presence.snapshot().await;
	ctx.broadcaster.broadcast_presence(presence_full_list(remaining)).await;
}

async fn wait_for_hello(inbound_rx: &mut mpsc::UnboundedReceiver<pb::Envelope>) -> anyhow::Result<pb::Hello> {
	while let Some(env) = inbound_rx.recv().await {
		let Some(msg) = env.msg else { continue };
		if let pb::envelope::Msg::Hello(h) = msg {
			return Ok(h);
		}
	}
	Err(anyhow!("connection closed before Hello"))
}

fn envelope(msg: pb::envelope::Msg) -> pb::Envelope {
	pb::Envelope {
		version: PROTOCOL_MAJOR,
		request_id: String::new(),
		msg: Some(msg),
	}
}

async fn send_envelope(send: &mut quinn::SendStream, env: pb::Envelope, max_frame_bytes: usize) -> anyhow::Result<()> {
	let frame = encode_frame(&env, max_frame_bytes).map_err(|e| anyhow!(e))?;
	metrics::counter!("banter_server_envelopes_out_total").increment(1);
	metrics::counter!("banter_server_chat_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}

async fn read_one_envelope(recv: &mut quinn::RecvStream, max_frame_bytes: usize) -> anyhow::Result<pb::Envelope> {
	let mut buf = Vec::<u8>::with_capacity(4 * 1024);
	let mut tmp = [0u8; 4096];

	loop {
		match banter_protocol::decode_frame::<pb::Envelope>(&buf, max_frame_bytes) {
			Ok((msg, _used)) => return Ok(msg),
			Err(banter_protocol::FramingError::InsufficientData { .. }) => {}
			Err(e) => return Err(anyhow!(e).context("failed to decode frame")),
		}

		let n = match recv.read(&mut tmp).await {
			Ok(Some(n)) => n,
			Ok(None) => return Err(anyhow!("stream closed before a full frame arrived")),
			Err(e) => return Err(anyhow!(e).context("stream read failed")),
		};

		buf.extend_from_slice(&tmp[..n]);
	}
}

#![forbid(unsafe_code)]

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use banter_protocol::framing::{DEFAULT_MAX_FRAME_BYTES, FramingError, encode_frame, try_decode_frame_from_buffer};
use banter_protocol::{markers, pb};
use banter_util::endpoint::ServerEndpoint;
use banter_util::time::unix_ms_now;
use quinn::{ClientConfig, Endpoint, TransportConfig, VarInt};
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, info, warn};

/// Current protocol version used in `pb::Envelope.version`.
pub const PROTOCOL_VERSION: u32 = banter_protocol::version::PROTOCOL_MAJOR;

/// Client session configuration (v1).
#[derive(Debug, Clone)]
pub struct ClientConfigV1 {
	/// Remote server host (DNS name or IP literal).
	pub server_host: String,

	/// Remote server UDP port.
	pub server_port: u16,

	/// Resolved remote server address override.
	pub server_addr: Option<SocketAddr>,

	/// Client identifier.
	pub client_name: String,

	/// Client instance id.
	pub client_instance_id: String,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,

	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,
}

impl ClientConfigV1 {
	/// Convenience: create a config from `quic://host:port`.
	pub fn from_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let e = ServerEndpoint::parse(endpoint).map_err(ClientCoreError::Protocol)?;
		Ok(Self {
			server_host: e.host,
			server_port: e.port,
			server_addr: None,
			..Self::default()
		})
	}
}

impl Default for ClientConfigV1 {
	fn default() -> Self {
		// Local dev default.
		Self {
			server_host: "localhost".to_string(),
			server_port: 18530,
			server_addr: Some("127.0.0.1:18530".parse().expect("valid default addr")),
			client_name: format!("banter-client-core/{}", env!("CARGO_PKG_VERSION")),
			client_instance_id: "dev-instance".to_string(),
			max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
			connect_timeout: Duration::from_secs(15),
		}
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// QUIC endpoint setup failed.
	#[error("failed to create QUIC endpoint: {0}")]
	Endpoint(String),

	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// Protocol error (unexpected message ordering/types).
	#[error("protocol error: {0}")]
	Protocol(String),

	/// IO error.
	#[error("io error: {0}")]
	Io(String),
}

/// A connected chat session: the chat stream plus the underlying connection.
pub struct ChatSession {
	conn: quinn::Connection,
	chat_send: quinn::SendStream,
	chat_recv: quinn::RecvStream,
	recv_buf: bytes::BytesMut,
	max_frame_bytes: usize,
	username: Option<String>,
}

/// Reader half of a presence stream.
pub struct PresenceFeed {
	recv: quinn::RecvStream,
	// Keep the send half alive so the peer doesn't see an immediate FIN.
	_send_keepalive: quinn::SendStream,
	recv_buf: bytes::BytesMut,
	max_frame_bytes: usize,
}

impl ChatSession {
	/// Connect and perform the v1 handshake (Hello/Welcome on a fresh bidi stream).
	pub async fn connect(cfg: ClientConfigV1) -> Result<(Self, pb::Welcome), ClientCoreError> {
		let endpoint = make_client_endpoint().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;

		let quinn_cfg = make_insecure_client_config().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;

		let connect_timeout = cfg.connect_timeout;
		let server_name = cfg.server_host.clone();

		let candidates: Vec<SocketAddr> = match cfg.server_addr {
			Some(addr) => vec![addr],
			None => {
				let hostport = format!("{}:{}", cfg.server_host, cfg.server_port);
				let addrs = hostport
					.to_socket_addrs()
					.map_err(|e| ClientCoreError::Connect(format!("failed to resolve {hostport}: {e}")))?;

				let addrs: Vec<SocketAddr> = addrs.collect();
				if addrs.is_empty() {
					return Err(ClientCoreError::Connect(format!(
						"DNS resolution returned no addresses for {hostport}"
					)));
				}
				addrs
			}
		};

		let mut last_err: Option<String> = None;
		let mut conn: Option<quinn::Connection> = None;

		for server_addr in candidates {
			let connecting = endpoint
				.connect_with(quinn_cfg.clone(), server_addr, &server_name)
				.map_err(|e| ClientCoreError::Connect(format!("connect_with({server_addr}, sni={server_name}): {e}")))?;

			match tokio::time::timeout(connect_timeout, connecting).await {
				Ok(Ok(c)) => {
					conn = Some(c);
					break;
				}
				Ok(Err(e)) => {
					last_err = Some(format!("connect failed (addr={server_addr}, sni={server_name}): {e}"));
				}
				Err(_) => {
					last_err = Some(format!(
						"connect timeout after {connect_timeout:?} (addr={server_addr}, sni={server_name})"
					));
				}
			}
		}

		let conn = conn.ok_or_else(|| {
			ClientCoreError::Connect(
				last_err.unwrap_or_else(|| format!("connect failed (no addresses attempted) (sni={server_name})")),
			)
		})?;

		info!(remote = %conn.remote_address(), "connected");

		let (mut chat_send, mut chat_recv) = tokio::time::timeout(connect_timeout, conn.open_bi())
			.await
			.map_err(|_| ClientCoreError::Io(format!("timeout opening chat stream after {connect_timeout:?}")))?
			.map_err(|e| ClientCoreError::Io(format!("open_bi(chat) failed: {e}")))?;

		let hello = pb::Hello {
			client_name: cfg.client_name,
			client_instance_id: cfg.client_instance_id,
		};
		let env = pb::Envelope {
			version: PROTOCOL_VERSION,
			request_id: String::new(),
			msg: Some(pb::envelope::Msg::Hello(hello)),
		};
		write_envelope(&mut chat_send, &env, cfg.max_frame_bytes)
			.await
			.map_err(|e| ClientCoreError::Io(format!("send Hello failed: {e}")))?;

		let welcome_env = tokio::time::timeout(connect_timeout, read_one_envelope(&mut chat_recv, cfg.max_frame_bytes))
			.await
			.map_err(|_| ClientCoreError::Protocol(format!("timeout waiting for Welcome after {connect_timeout:?}")))??;

		let welcome = match welcome_env.msg {
			Some(pb::envelope::Msg::Welcome(w)) => w,
			other => {
				return Err(ClientCoreError::Protocol(format!("expected Welcome, got {other:?}")));
			}
		};

		debug!(
			server_name = %welcome.server_name,
			server_instance_id = %welcome.server_instance_id,
			max_frame_bytes = welcome.max_frame_bytes,
			"received Welcome"
		);

		let session = Self {
			conn,
			chat_send,
			chat_recv,
			recv_buf: bytes::BytesMut::with_capacity(16 * 1024),
			max_frame_bytes: (welcome.max_frame_bytes as usize).min(cfg.max_frame_bytes),
			username: None,
		};

		Ok((session, welcome))
	}

	/// Log in under `username` and await the result.
	///
	/// Broadcast chat may already be interleaved on the stream, so this reads
	/// past any other envelopes until the `LoginResult` arrives.
	pub async fn login(&mut self, username: &str) -> Result<pb::LoginResponse, ClientCoreError> {
		let env = pb::Envelope {
			version: PROTOCOL_VERSION,
			request_id: String::new(),
			msg: Some(pb::envelope::Msg::Login(pb::LoginRequest {
				username: username.to_string(),
			})),
		};
		write_envelope(&mut self.chat_send, &env, self.max_frame_bytes).await?;

		loop {
			let resp = read_buffered_envelope(&mut self.chat_recv, &mut self.recv_buf, self.max_frame_bytes).await?;
			match resp.msg {
				Some(pb::envelope::Msg::LoginResult(r)) => {
					if r.accepted {
						self.username = Some(username.to_string());
					}
					debug!(accepted = r.accepted, detail = %r.detail, "login result");
					return Ok(r);
				}
				Some(other) => debug!("skipping envelope while awaiting login result: {other:?}"),
				None => {}
			}
		}
	}

	/// Send an ordinary chat message.
	pub async fn send_chat(&mut self, body: &str) -> Result<(), ClientCoreError> {
		let sender = self
			.username
			.clone()
			.ok_or_else(|| ClientCoreError::Protocol("send_chat before login".to_string()))?;
		self.send_chat_as(&sender, body).await
	}

	/// Send a chat message with an explicit sender name.
	pub async fn send_chat_as(&mut self, sender: &str, body: &str) -> Result<(), ClientCoreError> {
		let env = pb::Envelope {
			version: PROTOCOL_VERSION,
			request_id: String::new(),
			msg: Some(pb::envelope::Msg::Chat(pb::ChatMessage {
				sender: sender.to_string(),
				body: body.to_string(),
				timestamp: unix_ms_now(),
			})),
		};
		write_envelope(&mut self.chat_send, &env, self.max_frame_bytes).await
	}

	/// Announce this user as present (the reserved join marker).
	pub async fn announce_join(&mut self) -> Result<(), ClientCoreError> {
		let sender = self
			.username
			.clone()
			.ok_or_else(|| ClientCoreError::Protocol("announce_join before login".to_string()))?;
		self.send_chat_as(&sender, markers::JOIN).await
	}

	/// Announce a deliberate exit (the reserved leave marker).
	pub async fn announce_leave(&mut self) -> Result<(), ClientCoreError> {
		let sender = self
			.username
			.clone()
			.ok_or_else(|| ClientCoreError::Protocol("announce_leave before login".to_string()))?;
		self.send_chat_as(&sender, markers::LEAVE).await
	}

	/// Announce a client shutdown (ctrl-c, window close).
	pub async fn announce_shutdown(&mut self) -> Result<(), ClientCoreError> {
		let sender = self
			.username
			.clone()
			.ok_or_else(|| ClientCoreError::Protocol("announce_shutdown before login".to_string()))?;
		self.send_chat_as(&sender, markers::LEAVE_SHUTDOWN).await
	}

	/// Await the next broadcast chat message. Returns `None` on clean EOF.
	///
	/// Non-chat envelopes (late login results, server errors) are logged and
	/// skipped.
	pub async fn next_message(&mut self) -> Result<Option<pb::ChatMessage>, ClientCoreError> {
		loop {
			match read_buffered_envelope_opt(&mut self.chat_recv, &mut self.recv_buf, self.max_frame_bytes).await? {
				None => return Ok(None),
				Some(env) => match env.msg {
					Some(pb::envelope::Msg::Chat(m)) => return Ok(Some(m)),
					Some(pb::envelope::Msg::Error(e)) => {
						warn!(code = %e.code, message = %e.message, "server error on chat stream");
					}
					Some(other) => debug!("skipping non-chat envelope: {other:?}"),
					None => {}
				},
			}
		}
	}

	/// Open a presence stream for `username` and read the updates off it.
	pub async fn open_presence(&self, username: &str) -> Result<PresenceFeed, ClientCoreError> {
		debug!("opening presence stream (client open_bi)");
		let (mut send, recv) = self
			.conn
			.open_bi()
			.await
			.map_err(|e| ClientCoreError::Io(format!("open_bi(presence) failed: {e}")))?;

		let env = pb::Envelope {
			version: PROTOCOL_VERSION,
			request_id: String::new(),
			msg: Some(pb::envelope::Msg::PresenceSubscribe(pb::PresenceSubscribe {
				username: username.to_string(),
			})),
		};
		write_envelope(&mut send, &env, self.max_frame_bytes).await?;

		Ok(PresenceFeed {
			recv,
			_send_keepalive: send,
			recv_buf: bytes::BytesMut::with_capacity(8 * 1024),
			max_frame_bytes: self.max_frame_bytes,
		})
	}

	pub fn close(&self, code: u32, reason: &str) {
		self.conn.close(VarInt::from_u32(code), reason.as_bytes());
	}
}

/// Write half of a split session.
pub struct ChatWriter {
	conn: quinn::Connection,
	chat_send: quinn::SendStream,
	max_frame_bytes: usize,
	username: Option<String>,
}

/// Read half of a split session.
pub struct ChatReader {
	chat_recv: quinn::RecvStream,
	recv_buf: bytes::BytesMut,
	max_frame_bytes: usize,
}

impl ChatSession {
	/// Split into independent read/write halves so sending and receiving can
	/// run concurrently (e.g. a stdin loop plus a printer task).
	pub fn into_parts(self) -> (ChatWriter, ChatReader) {
		(
			ChatWriter {
				conn: self.conn,
				chat_send: self.chat_send,
				max_frame_bytes: self.max_frame_bytes,
				username: self.username,
			},
			ChatReader {
				chat_recv: self.chat_recv,
				recv_buf: self.recv_buf,
				max_frame_bytes: self.max_frame_bytes,
			},
		)
	}
}

impl ChatWriter {
	pub async fn send_chat(&mut self, body: &str) -> Result<(), ClientCoreError> {
		let sender = self
			.username
			.clone()
			.ok_or_else(|| ClientCoreError::Protocol("send_chat before login".to_string()))?;
		self.send_chat_as(&sender, body).await
	}

	pub async fn send_chat_as(&mut self, sender: &str, body: &str) -> Result<(), ClientCoreError> {
		let env = pb::Envelope {
			version: PROTOCOL_VERSION,
			request_id: String::new(),
			msg: Some(pb::envelope::Msg::Chat(pb::ChatMessage {
				sender: sender.to_string(),
				body: body.to_string(),
				timestamp: unix_ms_now(),
			})),
		};
		write_envelope(&mut self.chat_send, &env, self.max_frame_bytes).await
	}

	pub async fn announce_shutdown(&mut self) -> Result<(), ClientCoreError> {
		let sender = self
			.username
			.clone()
			.ok_or_else(|| ClientCoreError::Protocol("announce_shutdown before login".to_string()))?;
		self.send_chat_as(&sender, markers::LEAVE_SHUTDOWN).await
	}

	pub fn close(&self, code: u32, reason: &str) {
		self.conn.close(VarInt::from_u32(code), reason.as_bytes());
	}
}

impl ChatReader {
	/// Await the next broadcast chat message. Returns `None` on clean EOF.
	pub async fn next_message(&mut self) -> Result<Option<pb::ChatMessage>, ClientCoreError> {
		loop {
			match read_buffered_envelope_opt(&mut self.chat_recv, &mut self.recv_buf, self.max_frame_bytes).await? {
				None => return Ok(None),
				Some(env) => match env.msg {
					Some(pb::envelope::Msg::Chat(m)) => return Ok(Some(m)),
					Some(pb::envelope::Msg::Error(e)) => {
						warn!(code = %e.code, message = %e.message, "server error on chat stream");
					}
					Some(other) => debug!("skipping non-chat envelope: {other:?}"),
					None => {}
				},
			}
		}
	}
}

impl PresenceFeed {
	/// Await the next presence update. Returns `None` on clean EOF.
	pub async fn next_update(&mut self) -> Result<Option<pb::PresenceUpdate>, ClientCoreError> {
		loop {
			match read_buffered_envelope_opt(&mut self.recv, &mut self.recv_buf, self.max_frame_bytes).await? {
				None => return Ok(None),
				Some(env) => match env.msg {
					Some(pb::envelope::Msg::Presence(u)) => return Ok(Some(u)),
					Some(pb::envelope::Msg::Error(e)) => {
						return Err(ClientCoreError::Protocol(format!(
							"server rejected presence stream: {} ({})",
							e.message, e.code
						)));
					}
					Some(other) => warn!("unexpected message on presence stream: {other:?}"),
					None => {}
				},
			}
		}
	}
}

async fn write_envelope(
	send: &mut quinn::SendStream,
	env: &pb::Envelope,
	max_frame_bytes: usize,
) -> Result<(), ClientCoreError> {
	let frame = encode_frame(env, max_frame_bytes).map_err(ClientCoreError::Framing)?;
	send.write_all(&frame).await.map_err(|e| ClientCoreError::Io(e.to_string()))?;
	send.flush().await.map_err(|e| ClientCoreError::Io(e.to_string()))?;
	Ok(())
}

/// Read one envelope, treating EOF as a protocol error (handshake phase).
async fn read_one_envelope(recv: &mut quinn::RecvStream, max_frame_bytes: usize) -> Result<pb::Envelope, ClientCoreError> {
	let mut buf = bytes::BytesMut::with_capacity(8 * 1024);
	match read_buffered_envelope_opt(recv, &mut buf, max_frame_bytes).await? {
		Some(env) => Ok(env),
		None => Err(ClientCoreError::Protocol(
			"stream closed before receiving full message".to_string(),
		)),
	}
}

async fn read_buffered_envelope(
	recv: &mut quinn::RecvStream,
	buf: &mut bytes::BytesMut,
	max_frame_bytes: usize,
) -> Result<pb::Envelope, ClientCoreError> {
	match read_buffered_envelope_opt(recv, buf, max_frame_bytes).await? {
		Some(env) => Ok(env),
		None => Err(ClientCoreError::Protocol(
			"stream closed before receiving full message".to_string(),
		)),
	}
}

/// Read the next envelope off a stream, `None` on clean EOF between frames.
async fn read_buffered_envelope_opt(
	recv: &mut quinn::RecvStream,
	buf: &mut bytes::BytesMut,
	max_frame_bytes: usize,
) -> Result<Option<pb::Envelope>, ClientCoreError> {
	let mut tmp = [0u8; 8192];

	loop {
		// Try decoding first in case buffer already has a full frame.
		match try_decode_frame_from_buffer::<pb::Envelope>(buf, max_frame_bytes) {
			Ok(Some(env)) => return Ok(Some(env)),
			Ok(None) => {}
			Err(e) => return Err(ClientCoreError::Framing(e)),
		}

		let n = match recv.read(&mut tmp).await {
			Ok(Some(n)) => n,
			Ok(None) => {
				if buf.is_empty() {
					return Ok(None);
				}
				return Err(ClientCoreError::Protocol(
					"stream closed mid-frame".to_string(),
				));
			}
			Err(e) => return Err(ClientCoreError::Io(e.to_string())),
		};

		buf.extend_from_slice(&tmp[..n]);
	}
}

fn make_client_endpoint() -> anyhow::Result<Endpoint> {
	let addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
	let endpoint = Endpoint::client(addr).context("create client endpoint")?;
	Ok(endpoint)
}

/// Dev-only TLS config that skips server cert validation.
fn make_insecure_client_config() -> anyhow::Result<ClientConfig> {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

	#[derive(Debug)]
	struct NoVerifier;

	impl rustls::client::danger::ServerCertVerifier for NoVerifier {
		fn verify_server_cert(
			&self,
			_end_entity: &rustls::pki_types::CertificateDer<'_>,
			_intermediates: &[rustls::pki_types::CertificateDer<'_>],
			_server_name: &rustls::pki_types::ServerName<'_>,
			_ocsp_response: &[u8],
			_now: rustls::pki_types::UnixTime,
		) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
			Ok(rustls::client::danger::ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Err(rustls::Error::General("TLS1.2 not supported".into()))
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
			vec![
				rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
				rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA256,
				rustls::SignatureScheme::RSA_PSS_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA512,
				rustls::SignatureScheme::ED25519,
			]
		}
	}

	let mut tls = rustls::ClientConfig::builder()
		.with_root_certificates(rustls::RootCertStore::empty())
		.with_no_client_auth();

	tls.dangerous().set_certificate_verifier(Arc::new(NoVerifier));
	tls.alpn_protocols = vec![b"banter-v1".to_vec()];

	let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)?;

	let mut cfg = ClientConfig::new(Arc::new(quic_tls));

	// Allow multiple streams (chat + presence at minimum).
	let mut transport = TransportConfig::default();
	transport.max_concurrent_bidi_streams(VarInt::from_u32(16));
	transport.max_concurrent_uni_streams(VarInt::from_u32(16));
	cfg.transport_config(Arc::new(transport));

	Ok(cfg)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_is_sane() {
		let cfg = ClientConfigV1::default();
		assert_eq!(cfg.server_host, "localhost");
		assert_eq!(cfg.server_port, 18530);
		assert!(cfg.max_frame_bytes > 0);
	}

	#[test]
	fn from_endpoint_overrides_host_port() {
		let cfg = ClientConfigV1::from_endpoint("quic://10.0.0.5:4242").unwrap();
		assert_eq!(cfg.server_host, "10.0.0.5");
		assert_eq!(cfg.server_port, 4242);
		assert!(cfg.server_addr.is_none());
	}
}

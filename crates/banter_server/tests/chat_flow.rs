#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use banter_client_core::{ChatSession, ClientConfigV1, PresenceFeed};
use banter_protocol::pb;
use banter_server::quic::config::QuicServerConfig;
use banter_server::server::bindings::SessionBindings;
use banter_server::server::broadcaster::Broadcaster;
use banter_server::server::history::{HistoryConfig, MessageCache};
use banter_server::server::presence::PresenceTracker;
use banter_server::server::session::{ConnectionSettings, SessionContext, handle_connection};
use tokio::sync::oneshot;
use tokio::time::timeout;

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("BANTER_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

fn test_context() -> (SessionContext, Arc<MessageCache>) {
	let cache = Arc::new(MessageCache::new(HistoryConfig { capacity: 100 }));
	let ctx = SessionContext {
		broadcaster: Broadcaster::new(),
		presence: PresenceTracker::new(),
		bindings: SessionBindings::new(),
		history: cache.clone(),
	};
	(ctx, cache)
}

async fn run_test_server(ctx: SessionContext, ready_tx: oneshot::Sender<SocketAddr>) -> anyhow::Result<()> {
	let bind_addr: SocketAddr = "127.0.0.1:0".parse().context("parse bind addr")?;
	let quic_cfg = QuicServerConfig::dev(bind_addr);
	let (endpoint, _cert_der) = quic_cfg.bind_dev_endpoint().context("bind dev endpoint")?;

	let local_addr = endpoint.local_addr().context("server local_addr")?;
	let _ = ready_tx.send(local_addr);

	let mut next_conn_id: u64 = 1;
	loop {
		let Some(connecting) = endpoint.accept().await else {
			return Ok(());
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;

		let ctx = ctx.clone();
		tokio::spawn(async move {
			if let Ok(connection) = connecting.await
				&& let Err(e) = handle_connection(conn_id, connection, ctx, ConnectionSettings::default()).await
			{
				tracing::debug!(conn_id, error = %e, "test server connection handler exited");
			}
		});
	}
}

fn client_config(server_addr: SocketAddr, name: &str) -> ClientConfigV1 {
	ClientConfigV1 {
		server_host: "localhost".to_string(),
		server_port: server_addr.port(),
		server_addr: Some(server_addr),
		client_name: format!("banter-test-{name}"),
		client_instance_id: format!("test-{name}"),
		..ClientConfigV1::default()
	}
}

async fn next_presence(feed: &mut PresenceFeed) -> anyhow::Result<pb::PresenceUpdate> {
	timeout(Duration::from_secs(5), feed.next_update())
		.await
		.context("timeout waiting for presence update")?
		.context("presence stream error")?
		.ok_or_else(|| anyhow!("presence stream closed"))
}

async fn expect_join(feed: &mut PresenceFeed, username: &str) -> anyhow::Result<()> {
	let delta = next_presence(feed).await?;
	assert_eq!(delta.kind, pb::PresenceKind::Join as i32, "expected Join delta");
	assert_eq!(delta.username, username);

	let full = next_presence(feed).await?;
	assert_eq!(full.kind, pb::PresenceKind::FullList as i32, "expected FullList after delta");
	assert!(
		full.users.iter().any(|u| u == username),
		"full list {:?} must contain {username}",
		full.users
	);
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_chat_and_observe_presence() -> anyhow::Result<()> {
	init_test_logging();
	let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider());

	let (ctx, _cache) = test_context();
	let (ready_tx, ready_rx) = oneshot::channel::<SocketAddr>();
	let server_ctx = ctx.clone();
	let server_task = tokio::spawn(async move { run_test_server(server_ctx, ready_tx).await });

	let server_addr = timeout(Duration::from_secs(5), ready_rx)
		.await
		.context("timeout waiting for server")?
		.context("server ready channel closed")?;

	// Alice connects, logs in, watches presence, then announces herself.
	let (mut alice, welcome) = ChatSession::connect(client_config(server_addr, "alice"))
		.await
		.context("alice connect")?;
	assert!(welcome.max_frame_bytes > 0);

	let login = alice.login("alice").await.context("alice login")?;
	assert!(login.accepted, "stub auth must accept: {}", login.detail);

	let mut alice_presence = alice.open_presence("alice").await.context("alice presence")?;
	let initial = next_presence(&mut alice_presence).await?;
	assert_eq!(initial.kind, pb::PresenceKind::FullList as i32);
	assert!(initial.users.is_empty(), "room should start empty, got {:?}", initial.users);

	alice.announce_join().await.context("alice join")?;
	expect_join(&mut alice_presence, "alice").await?;

	// Bob arrives once Alice is visible.
	let (mut bob, _welcome) = ChatSession::connect(client_config(server_addr, "bob"))
		.await
		.context("bob connect")?;
	let login = bob.login("bob").await.context("bob login")?;
	assert!(login.accepted);

	let mut bob_presence = bob.open_presence("bob").await.context("bob presence")?;
	let initial = next_presence(&mut bob_presence).await?;
	assert_eq!(initial.kind, pb::PresenceKind::FullList as i32);
	assert_eq!(initial.users, vec!["alice"]);

	bob.announce_join().await.context("bob join")?;
	expect_join(&mut bob_presence, "bob").await?;
	expect_join(&mut alice_presence, "bob").await?;

	// A chat message reaches both participants, the sender included.
	alice.send_chat("hi there").await.context("alice chat")?;

	let got = timeout(Duration::from_secs(5), bob.next_message())
		.await
		.context("timeout waiting for bob's copy")?
		.context("bob chat stream error")?
		.ok_or_else(|| anyhow!("bob chat stream closed"))?;
	assert_eq!(got.sender, "alice");
	assert_eq!(got.body, "hi there");

	let own_copy = timeout(Duration::from_secs(5), alice.next_message())
		.await
		.context("timeout waiting for alice's own copy")?
		.context("alice chat stream error")?
		.ok_or_else(|| anyhow!("alice chat stream closed"))?;
	assert_eq!(own_copy.body, "hi there");

	// Exactly once: no duplicate delivery for bob.
	let duplicate = timeout(Duration::from_millis(200), bob.next_message()).await;
	assert!(duplicate.is_err(), "bob must receive the message exactly once");

	// Alice drops without a leave marker; the server owes bob an implicit
	// leave followed by a fresh full list.
	alice.close(0, "gone");

	let delta = next_presence(&mut bob_presence).await?;
	assert_eq!(delta.kind, pb::PresenceKind::Leave as i32);
	assert_eq!(delta.username, "alice");

	let full = next_presence(&mut bob_presence).await?;
	assert_eq!(full.kind, pb::PresenceKind::FullList as i32);
	assert_eq!(full.users, vec!["bob"]);

	// Server-side state agrees with what bob observed.
	assert!(!ctx.presence.contains("alice").await);
	assert!(ctx.presence.contains("bob").await);
	assert_eq!(ctx.bindings.owner_of("alice").await, None);

	bob.close(0, "done");
	server_task.abort();
	let _ = server_task.await;

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn explicit_leave_marker_updates_presence_without_chat_fanout() -> anyhow::Result<()> {
	init_test_logging();
	let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider());

	let (ctx, cache) = test_context();
	let (ready_tx, ready_rx) = oneshot::channel::<SocketAddr>();
	let server_ctx = ctx.clone();
	let server_task = tokio::spawn(async move { run_test_server(server_ctx, ready_tx).await });

	let server_addr = timeout(Duration::from_secs(5), ready_rx)
		.await
		.context("timeout waiting for server")?
		.context("server ready channel closed")?;

	let (mut alice, _welcome) = ChatSession::connect(client_config(server_addr, "alice"))
		.await
		.context("alice connect")?;
	alice.login("alice").await.context("alice login")?;

	let (mut bob, _welcome) = ChatSession::connect(client_config(server_addr, "bob"))
		.await
		.context("bob connect")?;
	bob.login("bob").await.context("bob login")?;
	let mut bob_presence = bob.open_presence("bob").await.context("bob presence")?;
	let _initial = next_presence(&mut bob_presence).await?;

	alice.announce_join().await.context("alice join")?;
	expect_join(&mut bob_presence, "alice").await?;

	// Markers drive presence; they are not rebroadcast as chat.
	alice.announce_leave().await.context("alice leave")?;

	let delta = next_presence(&mut bob_presence).await?;
	assert_eq!(delta.kind, pb::PresenceKind::Leave as i32);
	assert_eq!(delta.username, "alice");
	let full = next_presence(&mut bob_presence).await?;
	assert_eq!(full.kind, pb::PresenceKind::FullList as i32);
	assert!(!full.users.iter().any(|u| u == "alice"));

	let as_chat = timeout(Duration::from_millis(200), bob.next_message()).await;
	assert!(as_chat.is_err(), "leave marker must not arrive as chat content");

	// The markers still land in the recent-message cache.
	let recent = cache.recent().await;
	assert!(recent.iter().any(|m| m.body == banter_protocol::markers::JOIN));
	assert!(recent.iter().any(|m| m.body == banter_protocol::markers::LEAVE));

	alice.close(0, "done");
	bob.close(0, "done");
	server_task.abort();
	let _ = server_task.await;

	Ok(())
}

#![forbid(unsafe_code)]

use std::net::SocketAddr;

use banter_client_core::{ChatSession, ClientConfigV1};
use banter_util::time::clock_hms_utc;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: banter_client --user name [--connect quic://host:port] [--addr ip:port] [--sni name]\n\
\n\
Options:\n\
	--user      Username to log in as (required)\n\
	--connect   Server endpoint (default: quic://127.0.0.1:18530)\n\
	            Format: quic://host:port\n\
	--addr      Server SocketAddr (overrides DNS resolution from --connect)\n\
	--sni       TLS server name/SNI (overrides the host from --connect)\n\
	--help      Show this help\n\
\n\
Notes:\n\
	Lines typed on stdin are sent as chat; presence updates arrive on a\n\
	second bidirectional QUIC stream. Ctrl-C announces the exit first.\n\
\n\
Examples:\n\
	banter_client --user alice\n\
	banter_client --user bob --connect quic://banter.example.com:443\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,banter_client_core=info".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_args() -> (String, String, Option<SocketAddr>, Option<String>) {
	let mut username: Option<String> = None;
	let mut endpoint: String = "quic://127.0.0.1:18530".to_string();
	let mut addr_override: Option<SocketAddr> = None;
	let mut sni_override: Option<String> = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--user" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--user must be non-empty");
					usage_and_exit();
				}
				username = Some(v.trim().to_string());
			}
			"--connect" | "--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--connect must be non-empty (expected quic://host:port)");
					usage_and_exit();
				}
				endpoint = v;
			}
			"--addr" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let parsed: SocketAddr = v.parse().unwrap_or_else(|_| {
					eprintln!("Invalid --addr value: {v}");
					usage_and_exit()
				});
				addr_override = Some(parsed);
			}
			"--sni" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--sni must be non-empty");
					usage_and_exit();
				}
				sni_override = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let username = username.unwrap_or_else(|| {
		eprintln!("--user is required");
		usage_and_exit()
	});

	(username, endpoint, addr_override, sni_override)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let (username, endpoint, addr_override, sni_override) = parse_args();

	let mut cfg = ClientConfigV1::from_endpoint(&endpoint).unwrap_or_else(|e| {
		eprintln!("Invalid --connect value: {endpoint}\n{e}");
		usage_and_exit()
	});
	cfg.server_addr = addr_override;
	cfg.client_name = format!("banter-client-cli/{}", env!("CARGO_PKG_VERSION"));
	cfg.client_instance_id = format!("cli-{}", std::process::id());
	if let Some(sni) = sni_override {
		cfg.server_host = sni;
	}

	info!(server = %endpoint, user = %username, "connecting");

	let (mut session, welcome) = ChatSession::connect(cfg).await?;
	info!(server_name = %welcome.server_name, "connected");

	let login = session.login(&username).await?;
	if !login.accepted {
		anyhow::bail!("login rejected: {}", login.detail);
	}
	session.announce_join().await?;

	// Presence on its own stream, printed as it arrives.
	let mut presence = session.open_presence(&username).await?;
	let presence_task = tokio::spawn(async move {
		loop {
			match presence.next_update().await {
				Ok(Some(u)) => match banter_protocol::pb::PresenceKind::try_from(u.kind) {
					Ok(banter_protocol::pb::PresenceKind::FullList) => {
						println!("* online: {}", u.users.join(", "));
					}
					Ok(banter_protocol::pb::PresenceKind::Join) => println!("* {} joined", u.username),
					Ok(banter_protocol::pb::PresenceKind::Leave) => println!("* {} left", u.username),
					_ => {}
				},
				Ok(None) => break,
				Err(e) => {
					warn!("presence stream error: {e}");
					break;
				}
			}
		}
	});

	// Split so the printer task and the stdin loop run concurrently.
	let (mut writer, mut reader) = session.into_parts();
	let mut chat_task = tokio::spawn(async move {
		loop {
			match reader.next_message().await {
				Ok(Some(m)) => println!("[{}] {}: {}", clock_hms_utc(m.timestamp), m.sender, m.body),
				Ok(None) => break,
				Err(e) => {
					warn!("chat stream error: {e}");
					break;
				}
			}
		}
	});

	let mut stdin = BufReader::new(tokio::io::stdin()).lines();

	loop {
		tokio::select! {
			_ = &mut chat_task => {
				info!("server closed the chat stream");
				break;
			}
			line = stdin.next_line() => match line? {
				Some(line) if !line.trim().is_empty() => writer.send_chat(line.trim()).await?,
				Some(_) => {}
				None => break,
			},
			_ = tokio::signal::ctrl_c() => {
				info!("shutting down");
				writer.announce_shutdown().await?;
				break;
			}
		}
	}

	chat_task.abort();
	presence_task.abort();
	writer.close(0, "bye");
	Ok(())
}

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.banter/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".banter").join("config.toml"))
}

/// Load the server config from a TOML file plus env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub chat: ChatSettings,
}

/// Transport and observability settings.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

/// Chat room behavior knobs.
#[derive(Debug, Clone)]
pub struct ChatSettings {
	/// Number of recent messages retained in the in-memory cache.
	pub history_capacity: usize,
	/// Queued outbound envelopes per chat stream before drops.
	pub outbound_queue_capacity: usize,
	/// Queued updates per presence stream before drops.
	pub presence_queue_capacity: usize,
	/// Grace period after the farewell broadcast on shutdown.
	pub shutdown_grace_ms: u64,
}

impl Default for ChatSettings {
	fn default() -> Self {
		Self {
			history_capacity: 100,
			outbound_queue_capacity: 1024,
			presence_queue_capacity: 64,
			shutdown_grace_ms: 250,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	chat: FileChatSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	history_capacity: Option<usize>,
	outbound_queue_capacity: Option<usize>,
	presence_queue_capacity: Option<usize>,
	shutdown_grace_ms: Option<u64>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ChatSettings::default();

		Self {
			server: ServerSettings {
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
			chat: ChatSettings {
				history_capacity: file.chat.history_capacity.unwrap_or(defaults.history_capacity),
				outbound_queue_capacity: file
					.chat
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbound_queue_capacity),
				presence_queue_capacity: file
					.chat
					.presence_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.presence_queue_capacity),
				shutdown_grace_ms: file.chat.shutdown_grace_ms.unwrap_or(defaults.shutdown_grace_ms),
			},
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("BANTER_SERVER_TLS_CERT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_cert_path = Some(PathBuf::from(v));
			info!("server config: tls_cert_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BANTER_SERVER_TLS_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_key_path = Some(PathBuf::from(v));
			info!("server config: tls_key_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BANTER_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BANTER_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BANTER_HISTORY_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
	{
		cfg.chat.history_capacity = capacity;
		info!(capacity, "chat config: history_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.chat.outbound_queue_capacity = capacity;
		info!(capacity, "chat config: outbound_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_PRESENCE_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.chat.presence_queue_capacity = capacity;
		info!(capacity, "chat config: presence_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_SHUTDOWN_GRACE_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.chat.shutdown_grace_ms = ms;
		info!(ms, "chat config: shutdown_grace_ms overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_file_yields_defaults() {
		let cfg = load_server_config_from_path(Path::new("/nonexistent/banter-config.toml")).expect("load");
		assert_eq!(cfg.chat.history_capacity, 100);
		assert_eq!(cfg.chat.outbound_queue_capacity, 1024);
		assert_eq!(cfg.chat.presence_queue_capacity, 64);
		assert_eq!(cfg.chat.shutdown_grace_ms, 250);
		assert!(cfg.server.tls_cert_path.is_none());
	}

	#[test]
	fn file_values_override_defaults() {
		let file: FileConfig = toml::from_str(
			r#"
			[server]
			metrics_bind = "127.0.0.1:9321"

			[chat]
			history_capacity = 10
			shutdown_grace_ms = 50
			"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert_eq!(cfg.server.metrics_bind.as_deref(), Some("127.0.0.1:9321"));
		assert_eq!(cfg.chat.history_capacity, 10);
		assert_eq!(cfg.chat.shutdown_grace_ms, 50);
		assert_eq!(cfg.chat.outbound_queue_capacity, 1024);
	}

	#[test]
	fn blank_strings_are_treated_as_unset() {
		let file: FileConfig = toml::from_str(
			r#"
			[server]
			tls_cert_path = "  "
			health_bind = ""
			"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert!(cfg.server.tls_cert_path.is_none());
		assert!(cfg.server.health_bind.is_none());
	}

	#[test]
	fn zero_queue_capacities_fall_back_to_defaults() {
		let file: FileConfig = toml::from_str(
			r#"
			[chat]
			outbound_queue_capacity = 0
			presence_queue_capacity = 0
			"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert_eq!(cfg.chat.outbound_queue_capacity, 1024);
		assert_eq!(cfg.chat.presence_queue_capacity, 64);
	}
}

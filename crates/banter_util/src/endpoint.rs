#![forbid(unsafe_code)]

use std::net::SocketAddr;

/// Parsed `quic://host:port` server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
	pub host: String,
	pub port: u16,
}

impl ServerEndpoint {
	/// Parse an endpoint string of the form `quic://host:port`.
	pub fn parse(s: &str) -> Result<Self, String> {
		let s = s.trim();
		if s.is_empty() {
			return Err("endpoint must be non-empty (expected quic://host:port)".to_string());
		}

		let rest = s
			.strip_prefix("quic://")
			.ok_or_else(|| format!("invalid endpoint (expected quic://host:port): {s}"))?;

		if rest.contains('/') || rest.contains('?') || rest.contains('#') {
			return Err(format!("invalid endpoint (path/query/fragment not allowed): {s}"));
		}

		let (host, port_str) = rest
			.rsplit_once(':')
			.ok_or_else(|| format!("invalid endpoint (missing :port): {s}"))?;

		let host = host.trim();
		if host.is_empty() {
			return Err(format!("invalid endpoint host: {s}"));
		}

		// Bare IPv6 would be ambiguous against the port separator.
		if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
			return Err(format!("invalid endpoint host (IPv6 must be bracketed like quic://[::1]:18530): {s}"));
		}

		let port: u16 = port_str
			.trim()
			.parse()
			.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;
		if port == 0 {
			return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
		}

		Ok(Self {
			host: host.to_string(),
			port,
		})
	}

	/// Returns `host:port` with IPv6 hosts left bracketed.
	pub fn authority(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	/// Convert to a `SocketAddr`; fails if the host is a DNS name.
	pub fn to_socket_addr(&self) -> Result<SocketAddr, String> {
		self.authority()
			.parse()
			.map_err(|_| format!("host must be an IP literal (DNS names are resolved by the client): {}", self.host))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_ipv4_endpoint() {
		let e = ServerEndpoint::parse("quic://127.0.0.1:18530").unwrap();
		assert_eq!(e.host, "127.0.0.1");
		assert_eq!(e.port, 18530);
		assert_eq!(e.authority(), "127.0.0.1:18530");
		assert_eq!(e.to_socket_addr().unwrap().to_string(), "127.0.0.1:18530");
	}

	#[test]
	fn parses_dns_hostname_but_rejects_socket_addr() {
		let e = ServerEndpoint::parse("quic://chat.example.net:443").unwrap();
		assert_eq!(e.host, "chat.example.net");
		assert!(e.to_socket_addr().is_err());
	}

	#[test]
	fn parses_bracketed_ipv6() {
		let e = ServerEndpoint::parse("quic://[::1]:18530").unwrap();
		assert_eq!(e.authority(), "[::1]:18530");
	}

	#[test]
	fn rejects_unbracketed_ipv6() {
		let err = ServerEndpoint::parse("quic://::1:18530").unwrap_err();
		assert!(err.to_lowercase().contains("ipv6"));
	}

	#[test]
	fn rejects_missing_scheme_port_zero_and_junk() {
		assert!(ServerEndpoint::parse("127.0.0.1:18530").is_err());
		assert!(ServerEndpoint::parse("quic://127.0.0.1:0").is_err());
		assert!(ServerEndpoint::parse("quic://127.0.0.1").is_err());
		assert!(ServerEndpoint::parse("quic://127.0.0.1:18530/chat").is_err());
	}
}

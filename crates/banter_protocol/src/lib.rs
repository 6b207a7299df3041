#![forbid(unsafe_code)]

pub mod framing;
pub mod pb;

pub use framing::{
	DEFAULT_MAX_FRAME_BYTES, FramingError, decode_frame, encode_frame, encode_frame_default, encode_frame_into,
	try_decode_frame_from_buffer,
};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version (v1).
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;

	/// Compact representation useful for logs/metrics.
	pub const PROTOCOL_VERSION_U32: u32 = (PROTOCOL_MAJOR << 16) | PROTOCOL_MINOR;
}

/// Reserved chat bodies that act as presence control messages.
///
/// A chat message whose body equals one of these markers is interpreted as a
/// join/leave signal and is not rebroadcast as ordinary chat content. The
/// exact strings are part of the wire contract.
pub mod markers {
	/// Sent by a client right after a successful login.
	pub const JOIN: &str = "joined the chat";
	/// Sent by a client on a deliberate exit.
	pub const LEAVE: &str = "left the chat";
	/// Sent by a client when it is shutting down (ctrl-c, window close).
	pub const LEAVE_SHUTDOWN: &str = "left the chat (client shutdown)";
	/// Broadcast by the server on behalf of every user when the server itself
	/// shuts down.
	pub const SERVER_SHUTDOWN: &str = "left the chat (shutdown)";
}

/// Interpretation of an inbound chat body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
	Join,
	Leave,
	Chat,
}

/// Classify a chat body against the reserved markers.
///
/// Matching is exact: the body must equal the marker byte-for-byte, with no
/// trimming. Both leave variants classify as [`BodyKind::Leave`].
pub fn classify_body(body: &str) -> BodyKind {
	match body {
		markers::JOIN => BodyKind::Join,
		markers::LEAVE | markers::LEAVE_SHUTDOWN => BodyKind::Leave,
		_ => BodyKind::Chat,
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn markers_classify_as_control() {
		assert_eq!(classify_body(markers::JOIN), BodyKind::Join);
		assert_eq!(classify_body(markers::LEAVE), BodyKind::Leave);
		assert_eq!(classify_body(markers::LEAVE_SHUTDOWN), BodyKind::Leave);
	}

	#[test]
	fn server_shutdown_marker_is_not_an_inbound_control() {
		// Only ever emitted by the server, so inbound it reads as chat.
		assert_eq!(classify_body(markers::SERVER_SHUTDOWN), BodyKind::Chat);
	}

	#[test]
	fn matching_is_exact() {
		assert_eq!(classify_body(" joined the chat"), BodyKind::Chat);
		assert_eq!(classify_body("joined the chat "), BodyKind::Chat);
		assert_eq!(classify_body("Joined the chat"), BodyKind::Chat);
		assert_eq!(classify_body(""), BodyKind::Chat);
	}

	proptest! {
		#[test]
		fn non_marker_bodies_are_chat(body in ".*") {
			prop_assume!(body != markers::JOIN && body != markers::LEAVE && body != markers::LEAVE_SHUTDOWN);
			prop_assert_eq!(classify_body(&body), BodyKind::Chat);
		}
	}
}

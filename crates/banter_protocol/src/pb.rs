#![forbid(unsafe_code)]

//! Wire types for `banter.v1`.
//!
//! Hand-maintained prost derives; the schema is small enough that keeping it
//! here beats a codegen step. Tag numbers are frozen: never reuse a tag for a
//! different field.

/// Top-level frame payload. Every frame on every stream carries exactly one
/// `Envelope`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
	/// Protocol version, see [`crate::version`].
	#[prost(uint32, tag = "1")]
	pub version: u32,
	/// Client-chosen correlation id, echoed on direct replies. May be empty.
	#[prost(string, tag = "2")]
	pub request_id: String,
	#[prost(oneof = "envelope::Msg", tags = "10, 11, 12, 13, 14, 15, 16, 17")]
	pub msg: Option<envelope::Msg>,
}

pub mod envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Msg {
		#[prost(message, tag = "10")]
		Hello(super::Hello),
		#[prost(message, tag = "11")]
		Welcome(super::Welcome),
		#[prost(message, tag = "12")]
		Login(super::LoginRequest),
		#[prost(message, tag = "13")]
		LoginResult(super::LoginResponse),
		#[prost(message, tag = "14")]
		Chat(super::ChatMessage),
		#[prost(message, tag = "15")]
		Presence(super::PresenceUpdate),
		#[prost(message, tag = "16")]
		PresenceSubscribe(super::PresenceSubscribe),
		#[prost(message, tag = "17")]
		Error(super::Error),
	}
}

/// First frame the client sends on its chat stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
	#[prost(string, tag = "1")]
	pub client_name: String,
	#[prost(string, tag = "2")]
	pub client_instance_id: String,
}

/// Server reply to `Hello`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Welcome {
	#[prost(string, tag = "1")]
	pub server_name: String,
	#[prost(string, tag = "2")]
	pub server_instance_id: String,
	#[prost(uint64, tag = "3")]
	pub server_time_unix_ms: u64,
	#[prost(uint32, tag = "4")]
	pub max_frame_bytes: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginRequest {
	#[prost(string, tag = "1")]
	pub username: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginResponse {
	#[prost(bool, tag = "1")]
	pub accepted: bool,
	#[prost(string, tag = "2")]
	pub detail: String,
}

/// A chat message as sent by a client and as fanned out to every chat stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
	#[prost(string, tag = "1")]
	pub sender: String,
	#[prost(string, tag = "2")]
	pub body: String,
	/// Unix milliseconds, assigned by the sender.
	#[prost(uint64, tag = "3")]
	pub timestamp: u64,
}

/// Presence notification fanned out to every presence stream.
///
/// `users` is populated only for `FULL_LIST`; `username` only for the
/// `JOIN`/`LEAVE` deltas.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PresenceUpdate {
	#[prost(enumeration = "PresenceKind", tag = "1")]
	pub kind: i32,
	#[prost(string, repeated, tag = "2")]
	pub users: Vec<String>,
	#[prost(string, tag = "3")]
	pub username: String,
}

/// First frame the client sends on a presence stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PresenceSubscribe {
	#[prost(string, tag = "1")]
	pub username: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
	#[prost(string, tag = "1")]
	pub code: String,
	#[prost(string, tag = "2")]
	pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PresenceKind {
	Unspecified = 0,
	FullList = 1,
	Join = 2,
	Leave = 3,
}

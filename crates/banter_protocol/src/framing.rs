#![forbid(unsafe_code)]

use bytes::{BufMut, BytesMut};
use prost::Message;
use thiserror::Error;

/// Default maximum frame payload size for v1.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 2 * 1024 * 1024; // 2 MiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

/// Encode a protobuf message into a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M, max_frame_bytes: usize) -> Result<Vec<u8>, FramingError> {
	let payload_len = msg.encoded_len();
	if payload_len > max_frame_bytes {
		return Err(FramingError::FrameTooLarge {
			len: payload_len,
			max: max_frame_bytes,
		});
	}

	let mut out = Vec::with_capacity(4 + payload_len);
	out.extend_from_slice(&(payload_len as u32).to_be_bytes());
	msg.encode(&mut out)?;
	Ok(out)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_BYTES`.
pub fn encode_frame_default<M: Message>(msg: &M) -> Result<Vec<u8>, FramingError> {
	encode_frame(msg, DEFAULT_MAX_FRAME_BYTES)
}

/// Append an encoded frame into the provided buffer.
pub fn encode_frame_into<M: Message>(buf: &mut BytesMut, msg: &M, max_frame_bytes: usize) -> Result<(), FramingError> {
	let payload_len = msg.encoded_len();
	if payload_len > max_frame_bytes {
		return Err(FramingError::FrameTooLarge {
			len: payload_len,
			max: max_frame_bytes,
		});
	}

	buf.reserve(4 + payload_len);
	buf.put_u32(payload_len as u32);
	msg.encode(buf)?;
	Ok(())
}

/// Decode a single frame from the start of `src`, returning the bytes consumed.
pub fn decode_frame<M: Message + Default>(src: &[u8], max_frame_bytes: usize) -> Result<(M, usize), FramingError> {
	if src.len() < 4 {
		return Err(FramingError::InsufficientData {
			need: 4,
			have: src.len(),
		});
	}

	let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
	if len > max_frame_bytes {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_bytes,
		});
	}

	let need = 4 + len;
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	let msg = M::decode(&src[4..need])?;
	Ok((msg, need))
}

/// Try to decode a single frame from a growable buffer.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame; the
/// consumed bytes are split off the front of `buf` only on success.
pub fn try_decode_frame_from_buffer<M: Message + Default>(
	buf: &mut BytesMut,
	max_frame_bytes: usize,
) -> Result<Option<M>, FramingError> {
	if buf.len() < 4 {
		return Ok(None);
	}

	let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
	if len > max_frame_bytes {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_bytes,
		});
	}

	let need = 4 + len;
	if buf.len() < need {
		return Ok(None);
	}

	let frame = buf.split_to(need);
	let msg = M::decode(&frame[4..])?;
	Ok(Some(msg))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Clone, PartialEq, ::prost::Message)]
	struct Probe {
		#[prost(string, tag = "1")]
		body: String,
		#[prost(uint64, tag = "2")]
		seq: u64,
	}

	#[test]
	fn roundtrip_slice() {
		let msg = Probe {
			body: "hello room".to_string(),
			seq: 7,
		};

		let frame = encode_frame_default(&msg).expect("encode");
		let (decoded, consumed) = decode_frame::<Probe>(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode");
		assert_eq!(consumed, frame.len());
		assert_eq!(decoded, msg);
	}

	#[test]
	fn decode_needs_whole_frame() {
		let msg = Probe {
			body: "x".repeat(24),
			seq: 1,
		};
		let frame = encode_frame_default(&msg).expect("encode");

		let err = decode_frame::<Probe>(&frame[..6], DEFAULT_MAX_FRAME_BYTES).unwrap_err();
		match err {
			FramingError::InsufficientData { need, have } => assert!(need > have),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn buffer_decode_is_incremental() {
		let msg = Probe {
			body: "incremental".to_string(),
			seq: 42,
		};
		let frame = encode_frame_default(&msg).expect("encode");

		let mut buf = BytesMut::new();
		for chunk in frame.chunks(3) {
			let before = buf.len();
			buf.extend_from_slice(chunk);
			let got = try_decode_frame_from_buffer::<Probe>(&mut buf, DEFAULT_MAX_FRAME_BYTES).expect("ok");
			if before + chunk.len() < frame.len() {
				assert!(got.is_none());
			} else {
				assert_eq!(got.expect("some"), msg);
			}
		}
		assert!(buf.is_empty());
	}

	#[test]
	fn buffer_decode_leaves_trailing_bytes() {
		let first = Probe {
			body: "one".to_string(),
			seq: 1,
		};
		let second = Probe {
			body: "two".to_string(),
			seq: 2,
		};

		let mut buf = BytesMut::new();
		encode_frame_into(&mut buf, &first, DEFAULT_MAX_FRAME_BYTES).expect("encode");
		encode_frame_into(&mut buf, &second, DEFAULT_MAX_FRAME_BYTES).expect("encode");

		let a = try_decode_frame_from_buffer::<Probe>(&mut buf, DEFAULT_MAX_FRAME_BYTES)
			.expect("ok")
			.expect("some");
		let b = try_decode_frame_from_buffer::<Probe>(&mut buf, DEFAULT_MAX_FRAME_BYTES)
			.expect("ok")
			.expect("some");
		assert_eq!(a, first);
		assert_eq!(b, second);
		assert!(buf.is_empty());
	}

	#[test]
	fn encode_enforces_limit() {
		let msg = Probe {
			body: "a".repeat(4_096),
			seq: 0,
		};

		let err = encode_frame(&msg, 64).unwrap_err();
		match err {
			FramingError::FrameTooLarge { len, max } => assert!(len > max),
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn oversize_prefix_is_rejected_before_payload_arrives() {
		let mut buf = BytesMut::new();
		buf.extend_from_slice(&(DEFAULT_MAX_FRAME_BYTES as u32 + 1).to_be_bytes());

		let err = try_decode_frame_from_buffer::<Probe>(&mut buf, DEFAULT_MAX_FRAME_BYTES).unwrap_err();
		assert!(matches!(err, FramingError::FrameTooLarge { .. }));
	}
}

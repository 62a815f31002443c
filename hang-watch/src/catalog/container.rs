use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use moq_model::Timestamp;
use moq_model::coding::{Decode, DecodeError, Encode};

/// Container format for frame timestamp encoding and frame payload structure.
///
/// - "varint": QUIC VarInt timestamp header (1-8 bytes), raw codec payloads.
/// - "raw-u64": fixed 8-byte big-endian timestamp header, raw codec payloads.
/// - "fragmented-container": no header; each payload is an opaque CMAF byte
///   range (an init segment or a complete moof+mdat fragment).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
	#[serde(rename = "varint")]
	#[default]
	Varint,
	#[serde(rename = "raw-u64")]
	RawU64,
	#[serde(rename = "fragmented-container")]
	Cmaf,
}

impl Container {
	/// Prefix a frame payload with this container's timestamp header.
	pub fn encode_frame(&self, timestamp: Timestamp, payload: &[u8]) -> Bytes {
		let mut buf = bytes::BytesMut::with_capacity(8 + payload.len());
		self.write_header(timestamp, &mut buf);
		buf.put_slice(payload);
		buf.freeze()
	}

	/// Split a raw frame body into its timestamp and codec payload.
	///
	/// CMAF frames carry no timestamp on the wire; they decode as [Timestamp::ZERO]
	/// and the payload passes through untouched.
	pub fn decode_frame(&self, mut body: Bytes) -> Result<(Timestamp, Bytes), DecodeError> {
		let timestamp = self.read_header(&mut body)?;
		Ok((timestamp, body))
	}

	pub fn write_header<W: BufMut>(&self, timestamp: Timestamp, w: &mut W) {
		match self {
			Self::Varint => timestamp.encode(w),
			Self::RawU64 => timestamp.as_micros().encode(w),
			Self::Cmaf => {}
		}
	}

	pub fn read_header<B: Buf>(&self, buf: &mut B) -> Result<Timestamp, DecodeError> {
		match self {
			Self::Varint => Timestamp::decode(buf),
			Self::RawU64 => {
				let micros = u64::decode(buf)?;
				Timestamp::from_micros(micros).map_err(|_| DecodeError::BoundsExceeded)
			}
			Self::Cmaf => Ok(Timestamp::ZERO),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn header(container: Container, micros: u64) -> Vec<u8> {
		let mut buf = Vec::new();
		container.write_header(Timestamp::from_micros(micros).unwrap(), &mut buf);
		buf
	}

	#[test]
	fn varint_sizes() {
		assert_eq!(header(Container::Varint, 63), vec![0x3f]);
		assert_eq!(header(Container::Varint, 64), vec![0x40, 0x40]);
		assert_eq!(header(Container::Varint, 16_384), vec![0x80, 0x00, 0x40, 0x00]);
		assert_eq!(
			header(Container::Varint, 1 << 30),
			vec![0xc0, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00]
		);
	}

	#[test]
	fn raw_u64() {
		assert_eq!(header(Container::RawU64, 0), vec![0; 8]);
		assert_eq!(
			header(Container::RawU64, (1 << 53) - 1),
			vec![0x00, 0x1f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
		);
	}

	#[test]
	fn roundtrip() {
		for container in [Container::Varint, Container::RawU64] {
			for micros in [0u64, 1, 63, 64, 16_383, 16_384, 1 << 30, (1 << 53) - 1] {
				let timestamp = Timestamp::from_micros(micros).unwrap();
				let body = container.encode_frame(timestamp, b"payload");
				let (decoded, payload) = container.decode_frame(body).unwrap();
				assert_eq!(decoded, timestamp);
				assert_eq!(payload.as_ref(), b"payload");
			}
		}
	}

	#[test]
	fn cmaf_passthrough() {
		let body = Bytes::from_static(b"moof+mdat bytes");
		let (timestamp, payload) = Container::Cmaf.decode_frame(body.clone()).unwrap();
		assert_eq!(timestamp, Timestamp::ZERO);
		assert_eq!(payload, body);
	}

	#[test]
	fn truncated_header() {
		let short = Bytes::from_static(&[0x80, 0x00]);
		assert!(Container::Varint.decode_frame(short.clone()).is_err());
		assert!(Container::RawU64.decode_frame(short).is_err());
	}

	#[test]
	fn json_names() {
		assert_eq!(serde_json::to_string(&Container::Varint).unwrap(), "\"varint\"");
		assert_eq!(serde_json::to_string(&Container::RawU64).unwrap(), "\"raw-u64\"");
		assert_eq!(serde_json::to_string(&Container::Cmaf).unwrap(), "\"fragmented-container\"");

		let default: Container = serde_json::from_str("\"varint\"").unwrap();
		assert_eq!(default, Container::default());
	}
}

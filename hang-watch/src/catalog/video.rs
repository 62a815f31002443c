use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, base64::Base64, hex::Hex};

use crate::catalog::{Container, VideoCodec};

/// Information about a video track in the catalog.
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Video {
	/// A map of track name to rendition configuration.
	/// This is not an array so it will work with JSON Merge Patch.
	/// We use a BTreeMap so keys are sorted alphabetically for *some* deterministic behavior.
	pub renditions: BTreeMap<String, VideoConfig>,

	/// The priority of the video track, relative to other tracks in the broadcast.
	pub priority: u8,

	/// The intended display size, which may differ from the coded size.
	#[serde(default)]
	pub display: Option<Dimensions>,

	/// Mirror the picture horizontally, ex. for self-view.
	#[serde(default)]
	pub flip: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
	pub width: u32,
	pub height: u32,
}

/// Video decoder configuration based on WebCodecs VideoDecoderConfig.
///
/// Reference: <https://www.w3.org/TR/webcodecs/#video-decoder-config>
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
	// The codec, see the registry for details:
	// https://w3c.github.io/webcodecs/codec_registry.html
	#[serde_as(as = "DisplayFromStr")]
	pub codec: VideoCodec,

	// Some codecs include a description so the decoder can be initialized without extra data.
	// If not provided, there may be in-band metadata (marginally higher overhead).
	#[serde(default)]
	#[serde_as(as = "Option<Hex>")]
	pub description: Option<Bytes>,

	#[serde(default)]
	pub coded_width: Option<u32>,

	#[serde(default)]
	pub coded_height: Option<u32>,

	// The bitrate of the video track in bits per second
	#[serde(default)]
	pub bitrate: Option<u64>,

	#[serde(default)]
	pub framerate: Option<f64>,

	/// Hint that the decoder should be tuned for latency over throughput.
	#[serde(default)]
	pub optimize_for_latency: Option<bool>,

	/// Container format for frame encoding.
	#[serde(default)]
	pub container: Container,

	/// Init segment (ftyp+moov) for fragmented containers.
	///
	/// Required when `container` is fragmented; it is appended to the media
	/// pipeline before any fragment. Stored as base64 and embedded in the
	/// catalog rather than sent over a data track.
	#[serde(default)]
	#[serde_as(as = "Option<Base64>")]
	pub init_segment: Option<Bytes>,
}

impl VideoConfig {
	/// The coded pixel count, used for rendition selection.
	pub fn pixels(&self) -> Option<u64> {
		Some(self.coded_width? as u64 * self.coded_height? as u64)
	}

	/// The MIME type used when attaching this rendition to a media pipeline.
	pub fn mime_type(&self) -> String {
		format!("video/mp4; codecs=\"{}\"", self.codec)
	}
}

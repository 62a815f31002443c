use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, base64::Base64, hex::Hex};

use crate::catalog::{AudioCodec, Container};

/// Information about an audio track in the catalog.
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Audio {
	/// A map of track name to rendition configuration.
	pub renditions: BTreeMap<String, AudioConfig>,

	/// The priority of the audio track, relative to other tracks in the broadcast.
	pub priority: u8,
}

/// Audio decoder configuration based on WebCodecs AudioDecoderConfig.
///
/// Reference: <https://www.w3.org/TR/webcodecs/#audio-decoder-config>
#[serde_with::serde_as]
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
	#[serde_as(as = "DisplayFromStr")]
	pub codec: AudioCodec,

	// The sample rate of the audio in Hz
	pub sample_rate: u32,

	// The number of channels in the audio
	#[serde(rename = "numberOfChannels")]
	pub channel_count: u32,

	// The bitrate of the audio track in bits per second
	#[serde(default)]
	pub bitrate: Option<u64>,

	#[serde(default)]
	#[serde_as(as = "Option<Hex>")]
	pub description: Option<Bytes>,

	/// Container format for frame encoding.
	#[serde(default)]
	pub container: Container,

	/// Init segment (ftyp+moov) for fragmented containers.
	#[serde(default)]
	#[serde_as(as = "Option<Base64>")]
	pub init_segment: Option<Bytes>,
}

impl AudioConfig {
	/// The MIME type used when attaching this rendition to a media pipeline.
	pub fn mime_type(&self) -> String {
		format!("audio/mp4; codecs=\"{}\"", self.codec)
	}
}

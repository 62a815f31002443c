use std::fmt;
use std::str::FromStr;

/// A codec string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid codec: {0}")]
pub struct InvalidCodec(pub String);

/// A video codec, parsed from and printed as a WebCodecs registry string.
///
/// Strings we don't have a typed representation for are kept verbatim in
/// [VideoCodec::Unknown] so any catalog survives a parse/print round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCodec {
	H264(H264),
	H265(H265),
	VP8,
	VP9(VP9),
	AV1(AV1),
	Unknown(String),
}

/// H.264, ex. `avc1.64001f`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H264 {
	pub profile: u8,
	pub constraints: u8,
	pub level: u8,
}

/// H.265, ex. `hvc1.1.6.L93.B0`
///
/// See ISO/IEC 14496-15 annex E for the string syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H265 {
	/// true for `hev1` (parameter sets in-band), false for `hvc1`.
	pub in_band: bool,
	pub profile_space: u8,
	pub profile_idc: u8,
	pub profile_compatibility: u32,
	pub tier: bool,
	pub level_idc: u8,
	/// Up to six constraint bytes; trailing zeros are not printed.
	pub constraints: [u8; 6],
}

/// VP9, ex. `vp09.00.10.08` (profile, level, bit depth)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VP9 {
	pub profile: u8,
	pub level: u8,
	pub bit_depth: u8,
}

/// AV1, ex. `av01.0.04M.08` (profile, level+tier, bit depth)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AV1 {
	pub profile: u8,
	pub level: u8,
	pub tier: char,
	pub bit_depth: u8,
}

impl Default for AV1 {
	fn default() -> Self {
		Self {
			profile: 0,
			level: 0,
			tier: 'M',
			bit_depth: 8,
		}
	}
}

impl From<H264> for VideoCodec {
	fn from(codec: H264) -> Self {
		Self::H264(codec)
	}
}

impl From<H265> for VideoCodec {
	fn from(codec: H265) -> Self {
		Self::H265(codec)
	}
}

impl From<VP9> for VideoCodec {
	fn from(codec: VP9) -> Self {
		Self::VP9(codec)
	}
}

impl From<AV1> for VideoCodec {
	fn from(codec: AV1) -> Self {
		Self::AV1(codec)
	}
}

impl fmt::Display for VideoCodec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::H264(codec) => write!(
				f,
				"avc1.{:02x}{:02x}{:02x}",
				codec.profile, codec.constraints, codec.level
			),
			Self::H265(codec) => codec.fmt(f),
			Self::VP8 => write!(f, "vp8"),
			Self::VP9(codec) => write!(f, "vp09.{:02}.{:02}.{:02}", codec.profile, codec.level, codec.bit_depth),
			Self::AV1(codec) => write!(
				f,
				"av01.{}.{:02}{}.{:02}",
				codec.profile, codec.level, codec.tier, codec.bit_depth
			),
			Self::Unknown(codec) => codec.fmt(f),
		}
	}
}

impl fmt::Display for H265 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.in_band {
			true => write!(f, "hev1.")?,
			false => write!(f, "hvc1.")?,
		}

		match self.profile_space {
			0 => {}
			1 => write!(f, "A")?,
			2 => write!(f, "B")?,
			3 => write!(f, "C")?,
			_ => return Err(fmt::Error),
		}

		// The compatibility flags are printed in reverse bit order.
		write!(
			f,
			"{}.{:X}.",
			self.profile_idc,
			self.profile_compatibility.reverse_bits()
		)?;

		match self.tier {
			false => write!(f, "L{}", self.level_idc)?,
			true => write!(f, "H{}", self.level_idc)?,
		}

		// Constraint bytes, dropping trailing zeros.
		let last = self.constraints.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
		for byte in &self.constraints[..last] {
			write!(f, ".{byte:X}")?;
		}

		Ok(())
	}
}

impl FromStr for VideoCodec {
	type Err = InvalidCodec;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || InvalidCodec(s.to_string());

		if let Some(hex) = s.strip_prefix("avc1.") {
			if hex.len() != 6 {
				return Ok(Self::Unknown(s.to_string()));
			}
			let profile = u8::from_str_radix(&hex[0..2], 16).map_err(|_| invalid())?;
			let constraints = u8::from_str_radix(&hex[2..4], 16).map_err(|_| invalid())?;
			let level = u8::from_str_radix(&hex[4..6], 16).map_err(|_| invalid())?;
			return Ok(H264 {
				profile,
				constraints,
				level,
			}
			.into());
		}

		if s.starts_with("hev1.") || s.starts_with("hvc1.") {
			return match H265::parse(s) {
				Some(codec) => Ok(codec.into()),
				None => Ok(Self::Unknown(s.to_string())),
			};
		}

		if s == "vp8" {
			return Ok(Self::VP8);
		}

		if let Some(rest) = s.strip_prefix("vp09.") {
			let parts: Vec<&str> = rest.split('.').collect();
			// Longer forms carry color information we don't model; keep them verbatim.
			if parts.len() != 3 {
				return Ok(Self::Unknown(s.to_string()));
			}
			let profile = parts[0].parse().map_err(|_| invalid())?;
			let level = parts[1].parse().map_err(|_| invalid())?;
			let bit_depth = parts[2].parse().map_err(|_| invalid())?;
			return Ok(VP9 {
				profile,
				level,
				bit_depth,
			}
			.into());
		}

		if let Some(rest) = s.strip_prefix("av01.") {
			let parts: Vec<&str> = rest.split('.').collect();
			if parts.len() != 3 || parts[1].len() != 3 {
				return Ok(Self::Unknown(s.to_string()));
			}
			let profile = parts[0].parse().map_err(|_| invalid())?;
			let level = parts[1][..2].parse().map_err(|_| invalid())?;
			let tier = parts[1].chars().nth(2).ok_or_else(invalid)?;
			let bit_depth = parts[2].parse().map_err(|_| invalid())?;
			return Ok(AV1 {
				profile,
				level,
				tier,
				bit_depth,
			}
			.into());
		}

		Ok(Self::Unknown(s.to_string()))
	}
}

impl H265 {
	fn parse(s: &str) -> Option<Self> {
		let (prefix, rest) = s.split_at(5);
		let in_band = match prefix {
			"hev1." => true,
			"hvc1." => false,
			_ => return None,
		};

		let mut parts = rest.split('.');

		let profile = parts.next()?;
		let (profile_space, profile_idc) = match profile.chars().next()? {
			'A' => (1, &profile[1..]),
			'B' => (2, &profile[1..]),
			'C' => (3, &profile[1..]),
			_ => (0, profile),
		};
		let profile_idc = profile_idc.parse().ok()?;

		let profile_compatibility = u32::from_str_radix(parts.next()?, 16).ok()?.reverse_bits();

		let tier_level = parts.next()?;
		let tier = match tier_level.chars().next()? {
			'L' => false,
			'H' => true,
			_ => return None,
		};
		let level_idc = tier_level[1..].parse().ok()?;

		let mut constraints = [0u8; 6];
		for (i, part) in parts.enumerate() {
			if i >= constraints.len() {
				return None;
			}
			constraints[i] = u8::from_str_radix(part, 16).ok()?;
		}

		Some(Self {
			in_band,
			profile_space,
			profile_idc,
			profile_compatibility,
			tier,
			level_idc,
			constraints,
		})
	}
}

/// An audio codec, parsed from and printed as a WebCodecs registry string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCodec {
	Opus,
	AAC(AAC),
	Unknown(String),
}

/// AAC, ex. `mp4a.40.2` (AAC-LC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AAC {
	pub profile: u8,
}

impl From<AAC> for AudioCodec {
	fn from(codec: AAC) -> Self {
		Self::AAC(codec)
	}
}

impl fmt::Display for AudioCodec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Opus => write!(f, "opus"),
			Self::AAC(codec) => write!(f, "mp4a.40.{}", codec.profile),
			Self::Unknown(codec) => codec.fmt(f),
		}
	}
}

impl FromStr for AudioCodec {
	type Err = InvalidCodec;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == "opus" {
			return Ok(Self::Opus);
		}

		if let Some(profile) = s.strip_prefix("mp4a.40.") {
			if let Ok(profile) = profile.parse() {
				return Ok(AAC { profile }.into());
			}
		}

		Ok(Self::Unknown(s.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn video_roundtrip(s: &str) -> VideoCodec {
		let codec: VideoCodec = s.parse().unwrap();
		assert_eq!(codec.to_string(), s, "lossy round-trip");
		codec
	}

	#[test]
	fn h264() {
		let codec = video_roundtrip("avc1.64001f");
		assert_eq!(
			codec,
			H264 {
				profile: 0x64,
				constraints: 0x00,
				level: 0x1f
			}
			.into()
		);
	}

	#[test]
	fn h265() {
		let codec = video_roundtrip("hvc1.1.6.L93.B0");
		match codec {
			VideoCodec::H265(h265) => {
				assert!(!h265.in_band);
				assert_eq!(h265.profile_space, 0);
				assert_eq!(h265.profile_idc, 1);
				assert_eq!(h265.profile_compatibility.reverse_bits(), 6);
				assert!(!h265.tier);
				assert_eq!(h265.level_idc, 93);
				assert_eq!(h265.constraints[0], 0xb0);
			}
			other => panic!("wrong codec: {other:?}"),
		}

		video_roundtrip("hev1.2.4.L120.B0.23");
	}

	#[test]
	fn vp9_av1() {
		assert_eq!(
			video_roundtrip("vp09.00.10.08"),
			VP9 {
				profile: 0,
				level: 10,
				bit_depth: 8
			}
			.into()
		);

		assert_eq!(
			video_roundtrip("av01.0.04M.10"),
			AV1 {
				profile: 0,
				level: 4,
				tier: 'M',
				bit_depth: 10
			}
			.into()
		);
	}

	#[test]
	fn unknown_passthrough() {
		// A full-form VP9 string keeps its color information verbatim.
		let codec = video_roundtrip("vp09.02.10.10.01.09.16.09.01");
		assert!(matches!(codec, VideoCodec::Unknown(_)));

		let codec = video_roundtrip("dvh1.05.06");
		assert!(matches!(codec, VideoCodec::Unknown(_)));
	}

	#[test]
	fn audio() {
		let codec: AudioCodec = "opus".parse().unwrap();
		assert_eq!(codec, AudioCodec::Opus);
		assert_eq!(codec.to_string(), "opus");

		let codec: AudioCodec = "mp4a.40.2".parse().unwrap();
		assert_eq!(codec, AAC { profile: 2 }.into());
		assert_eq!(codec.to_string(), "mp4a.40.2");

		let codec: AudioCodec = "flac".parse().unwrap();
		assert!(matches!(codec, AudioCodec::Unknown(_)));
		assert_eq!(codec.to_string(), "flac");
	}
}

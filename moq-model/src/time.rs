use crate::coding::{Decode, DecodeError, Encode, VarInt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("time overflow")]
pub struct TimeOverflow;

/// A presentation timestamp in microseconds.
///
/// Timestamps within a track are relative, so zero for one track is not zero for another.
/// They are NOT wall clock times; the watch pipeline maintains its own wall clock mapping.
/// Values are constrained to fit within a QUIC VarInt (2^62) so they can be encoded easily.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
	/// The maximum representable timestamp.
	pub const MAX: Self = Self(VarInt::MAX.into_inner());

	pub const ZERO: Self = Self(0);

	pub const fn from_micros(micros: u64) -> Result<Self, TimeOverflow> {
		if micros <= Self::MAX.0 {
			Ok(Self(micros))
		} else {
			Err(TimeOverflow)
		}
	}

	pub const fn from_millis(millis: u64) -> Result<Self, TimeOverflow> {
		match millis.checked_mul(1_000) {
			Some(micros) => Self::from_micros(micros),
			None => Err(TimeOverflow),
		}
	}

	pub const fn from_secs(seconds: u64) -> Result<Self, TimeOverflow> {
		match seconds.checked_mul(1_000_000) {
			Some(micros) => Self::from_micros(micros),
			None => Err(TimeOverflow),
		}
	}

	pub const fn as_micros(self) -> u64 {
		self.0
	}

	pub const fn as_millis(self) -> u64 {
		self.0 / 1_000
	}

	pub const fn as_secs(self) -> u64 {
		self.0 / 1_000_000
	}

	pub const fn is_zero(self) -> bool {
		self.0 == 0
	}

	/// Get the maximum of two timestamps.
	pub const fn max(self, other: Self) -> Self {
		if self.0 > other.0 {
			self
		} else {
			other
		}
	}

	pub const fn checked_add(self, rhs: Self) -> Result<Self, TimeOverflow> {
		match self.0.checked_add(rhs.0) {
			Some(micros) => Self::from_micros(micros),
			None => Err(TimeOverflow),
		}
	}

	pub const fn checked_sub(self, rhs: Self) -> Result<Self, TimeOverflow> {
		match self.0.checked_sub(rhs.0) {
			Some(micros) => Ok(Self(micros)),
			None => Err(TimeOverflow),
		}
	}

	pub const fn saturating_sub(self, rhs: Self) -> Self {
		Self(self.0.saturating_sub(rhs.0))
	}
}

impl TryFrom<std::time::Duration> for Timestamp {
	type Error = TimeOverflow;

	fn try_from(duration: std::time::Duration) -> Result<Self, Self::Error> {
		match u64::try_from(duration.as_micros()) {
			Ok(micros) => Self::from_micros(micros),
			Err(_) => Err(TimeOverflow),
		}
	}
}

impl From<Timestamp> for std::time::Duration {
	fn from(timestamp: Timestamp) -> Self {
		std::time::Duration::from_micros(timestamp.0)
	}
}

impl std::fmt::Debug for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// Choose the largest unit without decimal places.
		if self.0 % 1_000_000 == 0 {
			write!(f, "{}s", self.0 / 1_000_000)
		} else if self.0 % 1_000 == 0 {
			write!(f, "{}ms", self.0 / 1_000)
		} else {
			write!(f, "{}µs", self.0)
		}
	}
}

impl std::ops::Add for Timestamp {
	type Output = Self;

	fn add(self, rhs: Self) -> Self {
		self.checked_add(rhs).expect("time overflow")
	}
}

impl std::ops::AddAssign for Timestamp {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

impl std::ops::Sub for Timestamp {
	type Output = Self;

	fn sub(self, rhs: Self) -> Self {
		self.checked_sub(rhs).expect("time overflow")
	}
}

impl std::ops::SubAssign for Timestamp {
	fn sub_assign(&mut self, rhs: Self) {
		*self = *self - rhs;
	}
}

impl Encode for Timestamp {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		VarInt::from_u64(self.0).expect("Timestamp is always within VarInt range").encode(w)
	}
}

impl Decode for Timestamp {
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError> {
		let v = VarInt::decode(buf)?;
		Ok(Self(v.into_inner()))
	}
}

// A varint is always within range, so this conversion is infallible.
impl From<VarInt> for Timestamp {
	fn from(varint: VarInt) -> Self {
		Self(varint.into_inner())
	}
}

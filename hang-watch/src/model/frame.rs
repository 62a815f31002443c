use bytes::Bytes;
use derive_more::Debug;

use crate::Timestamp;

/// A media frame produced by the frame consumer.
///
/// Frames are the fundamental unit of media data. Each frame contains:
/// - A timestamp when it should be rendered.
/// - A keyframe flag indicating whether this frame can be decoded independently.
/// - The group that delivered it.
/// - A codec-specific payload.
#[derive(Clone, Debug)]
pub struct Frame {
	/// The presentation timestamp for this frame.
	///
	/// This is relative to the start of the stream or some other reference point.
	/// It is NOT a wall clock time.
	pub timestamp: Timestamp,

	/// Whether this frame is a keyframe (can be decoded independently).
	///
	/// Not encoded on the wire: the first frame of every group is a keyframe
	/// and the flag is reconstructed on delivery.
	pub keyframe: bool,

	/// The sequence number of the group that delivered this frame.
	pub group: u64,

	/// The encoded media data for this frame.
	///
	/// The format depends on the codec being used (H.264, AV1, Opus, etc.).
	/// The debug implementation shows only the payload length for brevity.
	#[debug("{} bytes", payload.len())]
	pub payload: Bytes,
}

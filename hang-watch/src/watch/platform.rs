//! Platform seams: decoders, audio output, and the media element.
//!
//! The pipeline is platform-agnostic; implement these traits against whatever
//! the target provides (WebCodecs, FFmpeg, VideoToolbox, ...). Decoders convert
//! encoded [Frame]s into raw pictures or PCM; the media backend stands in for a
//! hidden video element fed by a media source.

use bytes::Bytes;
use derive_more::Debug;
use tokio::sync::{mpsc, watch};

use crate::Frame;
use crate::Timestamp;
use crate::catalog::{AudioConfig, VideoConfig};

/// A decoded video picture.
///
/// `data` is a reference to platform pixel storage; dropping the frame releases it.
#[derive(Clone, Debug)]
pub struct VideoFrame {
	pub timestamp: Timestamp,
	pub width: u32,
	pub height: u32,
	#[debug("{} bytes", data.len())]
	pub data: Bytes,
}

/// Decoded PCM audio.
#[derive(Clone, Debug)]
pub struct AudioFrame {
	pub timestamp: Timestamp,
	pub sample_rate: u32,
	pub channel_count: u32,
	#[debug("{} bytes", samples.len())]
	pub samples: Bytes,
}

/// Decodes encoded video frames into pictures.
///
/// Implementations may buffer internally (B-frames); each call returns the
/// pictures that became available, in decode order. The source reorders them
/// into presentation order.
pub trait VideoDecoder: Send + Sync {
	fn decode(&mut self, frame: &Frame) -> anyhow::Result<Vec<VideoFrame>>;

	/// Flush any buffered pictures, ex. before closing.
	fn flush(&mut self) -> anyhow::Result<Vec<VideoFrame>>;
}

/// Decodes encoded audio frames into PCM.
pub trait AudioDecoder: Send {
	fn decode(&mut self, frame: &Frame) -> anyhow::Result<Vec<AudioFrame>>;

	fn flush(&mut self) -> anyhow::Result<Vec<AudioFrame>>;
}

/// The audio rendering graph: accepts PCM at a single sample rate and schedules
/// playback cooperatively under the latency budget.
pub trait AudioSink: Send {
	/// Queue PCM for playback. Must not block.
	fn write(&mut self, frame: AudioFrame) -> anyhow::Result<()>;
}

/// The readiness of a media backend, mirroring a media source's readyState.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
	Closed,
	Open,
	Ended,
}

/// One append buffer within a media backend, bound to a MIME type at creation.
///
/// An append is asynchronous: `updating` must flip to true before [append](Self::append)
/// returns and back to false once the bytes are ingested. Callers never issue an
/// append while `updating` is true.
pub trait AppendBuffer: Send {
	fn append(&mut self, data: Bytes) -> anyhow::Result<()>;

	fn updating(&self) -> watch::Receiver<bool>;
}

/// The hidden video element plus its media source.
pub trait MediaBackend: Send {
	fn ready(&self) -> watch::Receiver<ReadyState>;

	/// Add an append buffer for the given MIME type. At most two (video, audio).
	/// A quota failure is reported as an error; the pipeline continues without it.
	fn add_buffer(&mut self, mime: &str) -> anyhow::Result<Box<dyn AppendBuffer>>;

	/// Attempt to start playback. Returns false when there isn't enough data yet.
	fn play(&mut self) -> anyhow::Result<bool>;

	/// The captured frame stream: one entry per presented video frame
	/// (the platform's per-frame hook, or animation frames as a fallback).
	/// May only be taken once.
	fn take_frames(&mut self) -> mpsc::UnboundedReceiver<VideoFrame>;
}

/// The set of platform capabilities the watch pipeline needs.
pub trait Platform: Send + Sync + 'static {
	/// Whether this configuration is decodable here. Renditions that aren't are
	/// excluded from selection.
	fn supports_video(&self, config: &VideoConfig) -> bool;

	fn video_decoder(&self, config: &VideoConfig) -> anyhow::Result<Box<dyn VideoDecoder>>;

	fn supports_audio(&self, config: &AudioConfig) -> bool;

	fn audio_decoder(&self, config: &AudioConfig) -> anyhow::Result<Box<dyn AudioDecoder>>;

	fn audio_sink(&self, config: &AudioConfig) -> anyhow::Result<Box<dyn AudioSink>>;

	/// Create a media backend for container-assembly playback.
	fn media_backend(&self) -> anyhow::Result<Box<dyn MediaBackend>>;
}

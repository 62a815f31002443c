//! Test doubles for the platform seams.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::Frame;
use crate::catalog::{AudioConfig, VideoConfig};
use crate::watch::{
	AppendBuffer, AudioDecoder, AudioFrame, AudioSink, MediaBackend, Platform, ReadyState, VideoDecoder, VideoFrame,
};

/// Every append across all buffers, in order: (mime, bytes).
pub type AppendLog = Arc<Mutex<Vec<(String, Bytes)>>>;

pub struct MockBuffer {
	mime: String,
	log: AppendLog,
	updating: Arc<watch::Sender<bool>>,
}

impl AppendBuffer for MockBuffer {
	fn append(&mut self, data: Bytes) -> anyhow::Result<()> {
		// No overlapping appends per buffer, ever.
		assert!(!*self.updating.borrow(), "append while updating on {}", self.mime);

		self.log.lock().unwrap().push((self.mime.clone(), data));
		self.updating.send_replace(true);

		let updating = self.updating.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(1)).await;
			updating.send_replace(false);
		});
		Ok(())
	}

	fn updating(&self) -> watch::Receiver<bool> {
		self.updating.subscribe()
	}
}

pub struct MockBackend {
	ready: Arc<watch::Sender<ReadyState>>,
	log: AppendLog,
	frames: Option<mpsc::UnboundedReceiver<VideoFrame>>,
	buffers: usize,
	pub reject_audio: bool,
}

impl MockBackend {
	pub fn new(state: ReadyState) -> (Self, Arc<watch::Sender<ReadyState>>, AppendLog) {
		let ready = Arc::new(watch::channel(state).0);
		let log: AppendLog = Default::default();
		let (_send, recv) = mpsc::unbounded_channel();

		let backend = Self {
			ready: ready.clone(),
			log: log.clone(),
			frames: Some(recv),
			buffers: 0,
			reject_audio: false,
		};
		(backend, ready, log)
	}
}

impl MediaBackend for MockBackend {
	fn ready(&self) -> watch::Receiver<ReadyState> {
		self.ready.subscribe()
	}

	fn add_buffer(&mut self, mime: &str) -> anyhow::Result<Box<dyn AppendBuffer>> {
		if self.reject_audio && mime.starts_with("audio/") {
			anyhow::bail!("quota exceeded");
		}
		self.buffers += 1;
		assert!(self.buffers <= 2, "too many append buffers");

		Ok(Box::new(MockBuffer {
			mime: mime.to_string(),
			log: self.log.clone(),
			updating: Arc::new(watch::channel(false).0),
		}))
	}

	fn play(&mut self) -> anyhow::Result<bool> {
		Ok(true)
	}

	fn take_frames(&mut self) -> mpsc::UnboundedReceiver<VideoFrame> {
		self.frames.take().expect("frames already taken")
	}
}

// Decodes every encoded frame into one picture with the config's size.
struct PassthroughVideo {
	width: u32,
	height: u32,
}

impl VideoDecoder for PassthroughVideo {
	fn decode(&mut self, frame: &Frame) -> anyhow::Result<Vec<VideoFrame>> {
		Ok(vec![VideoFrame {
			timestamp: frame.timestamp,
			width: self.width,
			height: self.height,
			data: frame.payload.clone(),
		}])
	}

	fn flush(&mut self) -> anyhow::Result<Vec<VideoFrame>> {
		Ok(Vec::new())
	}
}

struct PassthroughAudio {
	sample_rate: u32,
	channel_count: u32,
}

impl AudioDecoder for PassthroughAudio {
	fn decode(&mut self, frame: &Frame) -> anyhow::Result<Vec<AudioFrame>> {
		Ok(vec![AudioFrame {
			timestamp: frame.timestamp,
			sample_rate: self.sample_rate,
			channel_count: self.channel_count,
			samples: frame.payload.clone(),
		}])
	}

	fn flush(&mut self) -> anyhow::Result<Vec<AudioFrame>> {
		Ok(Vec::new())
	}
}

struct CollectSink {
	pcm: Arc<Mutex<Vec<AudioFrame>>>,
}

impl AudioSink for CollectSink {
	fn write(&mut self, frame: AudioFrame) -> anyhow::Result<()> {
		self.pcm.lock().unwrap().push(frame);
		Ok(())
	}
}

/// A platform that supports everything and decodes one-to-one.
#[derive(Default)]
pub struct MockPlatform {
	/// PCM written to any sink this platform vended.
	pub pcm: Arc<Mutex<Vec<AudioFrame>>>,
}

impl Platform for MockPlatform {
	fn supports_video(&self, _config: &VideoConfig) -> bool {
		true
	}

	fn video_decoder(&self, config: &VideoConfig) -> anyhow::Result<Box<dyn VideoDecoder>> {
		Ok(Box::new(PassthroughVideo {
			width: config.coded_width.unwrap_or(0),
			height: config.coded_height.unwrap_or(0),
		}))
	}

	fn supports_audio(&self, _config: &AudioConfig) -> bool {
		true
	}

	fn audio_decoder(&self, config: &AudioConfig) -> anyhow::Result<Box<dyn AudioDecoder>> {
		Ok(Box::new(PassthroughAudio {
			sample_rate: config.sample_rate,
			channel_count: config.channel_count,
		}))
	}

	fn audio_sink(&self, _config: &AudioConfig) -> anyhow::Result<Box<dyn AudioSink>> {
		Ok(Box::new(CollectSink { pcm: self.pcm.clone() }))
	}

	fn media_backend(&self) -> anyhow::Result<Box<dyn MediaBackend>> {
		let (backend, _ready, _log) = MockBackend::new(ReadyState::Open);
		Ok(Box::new(backend))
	}
}

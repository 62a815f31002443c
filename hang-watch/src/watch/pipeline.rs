use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use crate::catalog::{AudioConfig, Dimensions, VideoConfig};
use crate::signals::Signal;
use crate::watch::{AppendBuffer, MediaBackend, ReadyState, VideoFrame};
use crate::{BoundedQueue, Error, QUEUE_CAPACITY, Result};

/// How long to wait for the media source to open.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

const PLAY_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const PLAY_RETRY_LIMIT: u32 = 100;

/// Scan a byte range for an atom 4CC.
///
/// This is a heuristic, not a parser; it's used to sanity-check init segments
/// and to detect in-band init data, never to demux.
pub fn contains_atom(data: &[u8], kind: &[u8; 4]) -> bool {
	data.windows(4).any(|window| window == kind)
}

struct JoinRequest {
	config: AudioConfig,
	init: Bytes,
	reply: oneshot::Sender<Result<()>>,
}

/// The container-assembly pipeline: one media backend, up to two append buffers.
///
/// The pipeline is created by the video source (video first) and exposed to
/// audio as a read-only [PipelineHandle]; audio joins in with
/// [PipelineHandle::initialize_audio]. Every mutation is serialized through
/// [run](Self::run): appends are only issued while the backend is open and the
/// target buffer is not updating, and each buffer receives its init segment
/// before any fragment.
pub struct Pipeline {
	backend: Box<dyn MediaBackend>,
	video_config: VideoConfig,
	video_init: Bytes,
	video_queue: BoundedQueue<Bytes>,
	audio_queue: BoundedQueue<Bytes>,
	join_recv: mpsc::UnboundedReceiver<JoinRequest>,
	current_frame: Signal<Option<Arc<VideoFrame>>>,
	display: Signal<Option<Dimensions>>,
}

/// A clonable handle for feeding the pipeline.
///
/// Fragments are enqueued into bounded per-buffer FIFO queues; when a queue is
/// full the oldest fragment is discarded with a warning.
#[derive(Clone)]
pub struct PipelineHandle {
	video: BoundedQueue<Bytes>,
	audio: BoundedQueue<Bytes>,
	join: mpsc::UnboundedSender<JoinRequest>,
}

enum Wake {
	Closed,
	Frame(VideoFrame),
	Join(JoinRequest),
	Play,
	Tick,
}

impl Pipeline {
	/// Create a pipeline for the given video rendition.
	///
	/// Fails when the rendition carries no init segment; fragmented playback is
	/// impossible without one.
	pub fn new(
		backend: Box<dyn MediaBackend>,
		video_config: VideoConfig,
		current_frame: Signal<Option<Arc<VideoFrame>>>,
		display: Signal<Option<Dimensions>>,
	) -> Result<(Self, PipelineHandle)> {
		let video_init = video_config
			.init_segment
			.clone()
			.ok_or_else(|| Error::Unsupported("missing video init segment".to_string()))?;

		let video_queue = BoundedQueue::new(QUEUE_CAPACITY, "pipeline-video");
		let audio_queue = BoundedQueue::new(QUEUE_CAPACITY, "pipeline-audio");
		let (join_send, join_recv) = mpsc::unbounded_channel();

		let handle = PipelineHandle {
			video: video_queue.clone(),
			audio: audio_queue.clone(),
			join: join_send,
		};

		let pipeline = Self {
			backend,
			video_config,
			video_init,
			video_queue,
			audio_queue,
			join_recv,
			current_frame,
			display,
		};

		Ok((pipeline, handle))
	}

	/// Drive the pipeline until the backend closes or the owning scope cancels.
	///
	/// Cancel-safe at every await; the owning effect drops this future to tear
	/// the pipeline down.
	pub async fn run(mut self) -> Result<()> {
		let mut ready = self.backend.ready();

		// Wait for the source to open.
		match tokio::time::timeout(OPEN_TIMEOUT, ready.wait_for(|state| *state == ReadyState::Open)).await {
			Ok(Ok(_)) => {}
			Ok(Err(_)) => return Err(Error::PipelineClosed),
			Err(_) => return Err(Error::Timeout),
		}

		if !contains_atom(&self.video_init, b"moov") {
			tracing::warn!("video init segment has no moov atom");
		}

		// The video buffer comes first and its init segment precedes everything.
		let mut video = self
			.backend
			.add_buffer(&self.video_config.mime_type())
			.map_err(|err| Error::Pipeline(Arc::new(err)))?;
		let mut video_updating = video.updating();

		video
			.append(self.video_init.clone())
			.map_err(|err| Error::Pipeline(Arc::new(err)))?;
		video_updating
			.wait_for(|updating| !*updating)
			.await
			.map_err(|_| Error::PipelineClosed)?;
		tracing::debug!(mime = %self.video_config.mime_type(), "video init segment appended");

		let mut audio: Option<(Box<dyn AppendBuffer>, watch::Receiver<bool>)> = None;
		let mut frames = self.backend.take_frames();
		let mut frames_open = true;
		let mut join_open = true;
		let mut play_attempts: Option<u32> = None;
		let mut started = false;

		loop {
			// Issue whatever appends are allowed right now, one per buffer.
			if !*video_updating.borrow() {
				if let Some(data) = self.video_queue.try_pop() {
					video.append(data).map_err(|err| Error::Pipeline(Arc::new(err)))?;
					if !started {
						// First fragment is in; start poking the element to play.
						started = true;
						play_attempts = Some(0);
					}
				}
			}
			if let Some((buffer, updating)) = &mut audio {
				if !*updating.borrow() {
					if let Some(data) = self.audio_queue.try_pop() {
						buffer.append(data).map_err(|err| Error::Pipeline(Arc::new(err)))?;
					}
				}
			}

			let video_idle = !*video_updating.borrow();
			let audio_idle = audio.as_ref().map(|(_, updating)| !*updating.borrow()).unwrap_or(false);

			let wake = tokio::select! {
				res = ready.wait_for(|state| *state == ReadyState::Closed) => {
					let _ = res;
					Wake::Closed
				}
				frame = frames.recv(), if frames_open => match frame {
					Some(frame) => Wake::Frame(frame),
					None => {
						frames_open = false;
						Wake::Tick
					}
				},
				request = self.join_recv.recv(), if join_open => match request {
					Some(request) => Wake::Join(request),
					None => {
						join_open = false;
						Wake::Tick
					}
				},
				_ = video_updating.changed() => Wake::Tick,
				_ = audio_changed(&mut audio) => Wake::Tick,
				_ = self.video_queue.readable(), if video_idle => Wake::Tick,
				_ = self.audio_queue.readable(), if audio_idle => Wake::Tick,
				_ = tokio::time::sleep(PLAY_RETRY_INTERVAL), if play_attempts.is_some() => Wake::Play,
			};

			match wake {
				Wake::Closed => {
					// Producers observe the closed state on their next iteration.
					tracing::debug!("media pipeline closed");
					return Ok(());
				}
				Wake::Frame(frame) => self.capture(frame),
				Wake::Join(request) => {
					let result = self.join_audio(&request.config, request.init, &mut audio, &mut video_updating).await;
					let _ = request.reply.send(result);
				}
				Wake::Play => self.try_play(&mut play_attempts),
				Wake::Tick => {}
			}
		}
	}

	// Attach the audio append buffer and write its init segment (once).
	async fn join_audio(
		&mut self,
		config: &AudioConfig,
		init: Bytes,
		audio: &mut Option<(Box<dyn AppendBuffer>, watch::Receiver<bool>)>,
		video_updating: &mut watch::Receiver<bool>,
	) -> Result<()> {
		if audio.is_some() {
			tracing::debug!("audio append buffer already attached");
			return Ok(());
		}

		// Never touch the pipeline while a video append is in flight.
		video_updating
			.wait_for(|updating| !*updating)
			.await
			.map_err(|_| Error::PipelineClosed)?;

		let mut buffer = self.backend.add_buffer(&config.mime_type()).map_err(|err| {
			// Quota exhaustion: keep going video-only.
			tracing::warn!(%err, "audio append buffer rejected, continuing video-only");
			Error::Pipeline(Arc::new(err))
		})?;
		let mut updating = buffer.updating();

		if !contains_atom(&init, b"moov") {
			tracing::warn!("audio init segment has no moov atom");
		}

		buffer.append(init).map_err(|err| Error::Pipeline(Arc::new(err)))?;
		updating
			.wait_for(|updating| !*updating)
			.await
			.map_err(|_| Error::PipelineClosed)?;
		tracing::debug!(mime = %config.mime_type(), "audio init segment appended");

		*audio = Some((buffer, updating));
		Ok(())
	}

	fn capture(&mut self, frame: VideoFrame) {
		let display = Dimensions {
			width: frame.width,
			height: frame.height,
		};
		if self.display.peek() != Some(display) {
			self.display.set(Some(display));
		}

		// Overwriting drops the previous reference.
		self.current_frame.set(Some(Arc::new(frame)));
	}

	fn try_play(&mut self, attempts: &mut Option<u32>) {
		let Some(count) = attempts.as_mut() else { return };

		match self.backend.play() {
			Ok(true) => {
				tracing::debug!(attempts = *count, "playback started");
				*attempts = None;
				return;
			}
			Ok(false) => {}
			Err(err) => tracing::debug!(%err, "play attempt failed"),
		}

		*count += 1;
		if *count >= PLAY_RETRY_LIMIT {
			tracing::warn!(attempts = *count, "giving up on playback");
			*attempts = None;
		}
	}
}

async fn audio_changed(audio: &mut Option<(Box<dyn AppendBuffer>, watch::Receiver<bool>)>) {
	match audio {
		Some((_, updating)) => {
			let _ = updating.changed().await;
		}
		None => std::future::pending().await,
	}
}

impl PipelineHandle {
	/// Enqueue a video fragment (moof+mdat bytes).
	pub fn append_video(&self, fragment: Bytes) {
		self.video.push(fragment);
	}

	/// Enqueue an audio fragment. Only meaningful after [initialize_audio](Self::initialize_audio).
	pub fn append_audio(&self, fragment: Bytes) {
		self.audio.push(fragment);
	}

	/// Attach the audio append buffer, appending its init segment first.
	///
	/// Waits for the pipeline to be open and for any in-flight video append to
	/// finish; fails with [Error::Timeout] after 5 seconds so the caller can
	/// fall back to per-frame decoding.
	pub async fn initialize_audio(&self, config: &AudioConfig, init: Bytes) -> Result<()> {
		let (reply, response) = oneshot::channel();
		self.join
			.send(JoinRequest {
				config: config.clone(),
				init,
				reply,
			})
			.map_err(|_| Error::PipelineClosed)?;

		match tokio::time::timeout(OPEN_TIMEOUT, response).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::PipelineClosed),
			Err(_) => Err(Error::Timeout),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::{AAC, Container, H264};
	use crate::watch::mock::MockBackend;

	fn video_config(init: Option<&'static [u8]>) -> VideoConfig {
		VideoConfig {
			codec: H264::default().into(),
			description: None,
			coded_width: Some(640),
			coded_height: Some(360),
			bitrate: None,
			framerate: None,
			optimize_for_latency: None,
			container: Container::Cmaf,
			init_segment: init.map(Bytes::from_static),
		}
	}

	fn audio_config(init: &'static [u8]) -> AudioConfig {
		AudioConfig {
			codec: AAC { profile: 2 }.into(),
			sample_rate: 48_000,
			channel_count: 2,
			bitrate: None,
			description: None,
			container: Container::Cmaf,
			init_segment: Some(Bytes::from_static(init)),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn two_buffer_ordering() {
		let (backend, _ready, log) = MockBackend::new(ReadyState::Open);

		let (pipeline, handle) = Pipeline::new(
			Box::new(backend),
			video_config(Some(b"moov")),
			Signal::new(None),
			Signal::new(None),
		)
		.unwrap();
		let driver = tokio::spawn(pipeline.run());

		// Audio joins before any fragment.
		handle
			.initialize_audio(&audio_config(b"moov"), Bytes::from_static(b"moov"))
			.await
			.unwrap();

		handle.append_video(Bytes::from_static(b"moofmdat"));
		tokio::time::sleep(Duration::from_millis(10)).await;
		handle.append_audio(Bytes::from_static(b"moofmdat"));
		tokio::time::sleep(Duration::from_millis(10)).await;

		let appended: Vec<(String, Bytes)> = log.lock().unwrap().clone();
		let kinds: Vec<(&str, &[u8])> = appended
			.iter()
			.map(|(mime, data)| (mime.split('/').next().unwrap(), data.as_ref()))
			.collect();

		assert_eq!(
			kinds,
			vec![
				("video", b"moov".as_slice()),
				("audio", b"moov".as_slice()),
				("video", b"moofmdat".as_slice()),
				("audio", b"moofmdat".as_slice()),
			]
		);

		driver.abort();
	}

	#[tokio::test(start_paused = true)]
	async fn init_before_queued_fragments() {
		// Fragments arrive while the source is still opening; the init segment
		// still lands first.
		let (backend, ready, log) = MockBackend::new(ReadyState::Closed);

		let (pipeline, handle) = Pipeline::new(
			Box::new(backend),
			video_config(Some(b"moov")),
			Signal::new(None),
			Signal::new(None),
		)
		.unwrap();

		handle.append_video(Bytes::from_static(b"frag0"));
		handle.append_video(Bytes::from_static(b"frag1"));

		let driver = tokio::spawn(pipeline.run());
		tokio::time::sleep(Duration::from_millis(5)).await;
		ready.send_replace(ReadyState::Open);
		tokio::time::sleep(Duration::from_millis(10)).await;

		let appended: Vec<Bytes> = log.lock().unwrap().iter().map(|(_, data)| data.clone()).collect();
		assert_eq!(appended[0].as_ref(), b"moov");
		assert_eq!(appended[1].as_ref(), b"frag0");
		assert_eq!(appended[2].as_ref(), b"frag1");

		driver.abort();
	}

	#[tokio::test(start_paused = true)]
	async fn audio_quota_video_only() {
		let (mut backend, _ready, log) = MockBackend::new(ReadyState::Open);
		backend.reject_audio = true;

		let (pipeline, handle) = Pipeline::new(
			Box::new(backend),
			video_config(Some(b"moov")),
			Signal::new(None),
			Signal::new(None),
		)
		.unwrap();
		let driver = tokio::spawn(pipeline.run());

		let err = handle
			.initialize_audio(&audio_config(b"moov"), Bytes::from_static(b"moov"))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Pipeline(_)));

		// Video keeps flowing.
		handle.append_video(Bytes::from_static(b"moofmdat"));
		tokio::time::sleep(Duration::from_millis(10)).await;

		let appended = log.lock().unwrap().clone();
		assert_eq!(appended.len(), 2);
		assert!(appended.iter().all(|(mime, _)| mime.starts_with("video/")));

		driver.abort();
	}

	#[tokio::test(start_paused = true)]
	async fn closed_exits_cleanly() {
		let (backend, ready, _log) = MockBackend::new(ReadyState::Open);

		let (pipeline, handle) = Pipeline::new(
			Box::new(backend),
			video_config(Some(b"moov")),
			Signal::new(None),
			Signal::new(None),
		)
		.unwrap();
		let driver = tokio::spawn(pipeline.run());

		handle.append_video(Bytes::from_static(b"moofmdat"));
		tokio::time::sleep(Duration::from_millis(10)).await;

		ready.send_replace(ReadyState::Closed);
		assert!(driver.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn missing_init_rejected() {
		let (backend, _ready, _log) = MockBackend::new(ReadyState::Open);

		let result = Pipeline::new(Box::new(backend), video_config(None), Signal::new(None), Signal::new(None));
		assert!(matches!(result, Err(Error::Unsupported(_))));
	}

	#[test]
	fn atom_scan() {
		assert!(contains_atom(b"moov", b"moov"));
		assert!(contains_atom(b"\x00\x00\x00\x14moovdata", b"moov"));
		assert!(!contains_atom(b"moofmdat", b"moov"));
		assert!(!contains_atom(b"mo", b"moov"));
	}
}

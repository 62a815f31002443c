use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::catalog::{self, Catalog, Container, Dimensions, VideoConfig};
use crate::signals::{Effect, Signal};
use crate::watch::{FrameConsumer, Pipeline, PipelineHandle, Platform, VideoDecoder, VideoFrame};
use crate::{Error, QUEUE_CAPACITY, Result, Timestamp};

/// Report a sync wait when a frame is scheduled further out than this.
const SYNC_WAIT_THRESHOLD: Duration = Duration::from_millis(200);

/// What the caller wants to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoTarget {
	/// The pixel goal: the smallest rendition with at least this many pixels is
	/// chosen, or the largest below it. Unset means best quality.
	pub pixels: Option<u64>,

	/// An explicit rendition name, overriding automatic selection.
	pub rendition: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferStatus {
	#[default]
	Empty,
	Filled,
}

/// Whether playback is at the live edge or waiting for its presentation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStatus {
	#[default]
	Ready,
	Wait {
		/// How much media is buffered while we wait.
		buffer: Duration,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
	pub frame_count: u64,
	pub timestamp: Timestamp,
	pub bytes_received: u64,
}

/// The watch-side video source.
///
/// Selects a rendition from the catalog, runs one of two decode paths, and
/// publishes the current picture:
/// - per-frame codec decoding with presentation-timestamp scheduling, or
/// - container assembly through a [Pipeline] for fragmented renditions.
///
/// Rendition switches are gapless: the new subscription runs as *pending*
/// alongside the active one and is promoted only once it has caught up to the
/// wall clock, at which point the previous subscription is closed.
pub struct Video {
	/// Caller intent.
	pub target: Signal<VideoTarget>,

	/// The currently emitting rendition, if any.
	pub rendition: Signal<Option<String>>,

	/// The latest picture. Overwriting releases the previous reference.
	pub current_frame: Signal<Option<Arc<VideoFrame>>>,

	/// Display size, from the catalog or the captured stream.
	pub display: Signal<Option<Dimensions>>,

	pub buffer_status: Signal<BufferStatus>,
	pub sync_status: Signal<SyncStatus>,
	pub stats: Signal<VideoStats>,

	/// The container-assembly pipeline, present while the fragmented path runs.
	/// Audio observes this to join in; it never owns it.
	pub pipeline: Signal<Option<PipelineHandle>>,

	/// The most recent unrecoverable error, ex. no eligible renditions.
	pub error: Signal<Option<Error>>,

	effect: Effect,
}

impl Video {
	pub fn new(
		platform: Arc<dyn Platform>,
		broadcast: Signal<Option<moq_model::BroadcastConsumer>>,
		catalog: Signal<Option<Catalog>>,
		enabled: Signal<bool>,
		latency: Signal<Duration>,
	) -> Self {
		let target = Signal::new(VideoTarget::default());
		let rendition = Signal::new(None);
		let current_frame: Signal<Option<Arc<VideoFrame>>> = Signal::new(None);
		let display = Signal::new(None);
		let buffer_status = Signal::new(BufferStatus::default());
		let sync_status = Signal::new(SyncStatus::default());
		let stats = Signal::new(VideoStats::default());
		let pipeline: Signal<Option<PipelineHandle>> = Signal::new(None);
		let error = Signal::new(None);

		let effect = {
			let target = target.clone();
			let rendition = rendition.clone();
			let current_frame = current_frame.clone();
			let display = display.clone();
			let buffer_status = buffer_status.clone();
			let sync_status = sync_status.clone();
			let stats = stats.clone();
			let pipeline = pipeline.clone();
			let error = error.clone();

			Effect::new(move |scope| {
				let enabled = enabled.get(scope);
				let broadcast = broadcast.get(scope);
				let catalog = catalog.get(scope);

				if !enabled {
					current_frame.set(None);
					return;
				}

				let Some(broadcast) = broadcast else { return };
				let Some(section) = catalog.and_then(|catalog| catalog.video) else {
					return;
				};

				let driver = Driver {
					platform: platform.clone(),
					latency: latency.clone(),
					target: target.clone(),
					rendition: rendition.clone(),
					current_frame: current_frame.clone(),
					display: display.clone(),
					buffer_status: buffer_status.clone(),
					sync_status: sync_status.clone(),
					stats: stats.clone(),
					pipeline: pipeline.clone(),
					error: error.clone(),
					excluded: Vec::new(),
					reference: None,
				};

				scope.spawn(move |_cancel| driver.run(broadcast, section));

				// Downstream observers shouldn't see a stale subscription.
				let rendition = rendition.clone();
				let pipeline = pipeline.clone();
				let buffer_status = buffer_status.clone();
				let sync_status = sync_status.clone();
				scope.cleanup(move || {
					rendition.set(None);
					pipeline.set(None);
					buffer_status.set(BufferStatus::Empty);
					sync_status.set(SyncStatus::Ready);
				});
			})
		};

		Self {
			target,
			rendition,
			current_frame,
			display,
			buffer_status,
			sync_status,
			stats,
			pipeline,
			error,
			effect,
		}
	}

	/// Close the source and wait for its tasks to finish.
	pub async fn closed(self) {
		self.effect.closed().await;
	}

	/// Close the source. Idempotent.
	pub fn close(&self) {
		self.effect.close();
	}
}

/// Pick a rendition: explicit target name wins; otherwise intersect the catalog
/// with what the platform can decode, then pick the smallest rendition meeting
/// the pixel goal, or the largest below it. Ties break in catalog (name) order.
fn select_rendition(
	section: &catalog::Video,
	target: &VideoTarget,
	platform: &dyn Platform,
	excluded: &[String],
) -> Option<(String, VideoConfig)> {
	if let Some(name) = &target.rendition {
		match section.renditions.get(name) {
			Some(config) => return Some((name.clone(), config.clone())),
			None => tracing::warn!(rendition = %name, "requested rendition not in catalog"),
		}
	}

	let eligible: Vec<(&String, &VideoConfig)> = section
		.renditions
		.iter()
		.filter(|(name, _)| !excluded.contains(name))
		.filter(|(_, config)| platform.supports_video(config))
		.collect();

	let goal = target.pixels.unwrap_or(u64::MAX);

	let selected = eligible
		.iter()
		.filter(|(_, config)| config.pixels().unwrap_or(0) >= goal)
		.min_by_key(|(_, config)| config.pixels().unwrap_or(0))
		.or_else(|| eligible.iter().max_by_key(|(_, config)| config.pixels().unwrap_or(0)))?;

	Some((selected.0.clone(), selected.1.clone()))
}

enum Outcome {
	End,
	Reselect,
}

// One subscription being decoded and scheduled.
struct Sub {
	name: String,
	consumer: FrameConsumer,
	decoder: Box<dyn VideoDecoder>,
	// Decoded pictures in presentation order (the B-frame reorder queue).
	queue: Vec<VideoFrame>,
	ended: bool,
}

impl Sub {
	fn insert(&mut self, frame: VideoFrame) {
		let index = self.queue.partition_point(|queued| queued.timestamp <= frame.timestamp);
		self.queue.insert(index, frame);

		if self.queue.len() > QUEUE_CAPACITY {
			tracing::warn!(rendition = %self.name, "reorder queue full, dropping oldest picture");
			self.queue.remove(0);
		}
	}

	// The buffered duration, for sync reporting.
	fn span(&self) -> Duration {
		match (self.queue.first(), self.queue.last()) {
			(Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp).into(),
			_ => Duration::ZERO,
		}
	}
}

struct Driver {
	platform: Arc<dyn Platform>,
	latency: Signal<Duration>,
	target: Signal<VideoTarget>,
	rendition: Signal<Option<String>>,
	current_frame: Signal<Option<Arc<VideoFrame>>>,
	display: Signal<Option<Dimensions>>,
	buffer_status: Signal<BufferStatus>,
	sync_status: Signal<SyncStatus>,
	stats: Signal<VideoStats>,
	pipeline: Signal<Option<PipelineHandle>>,
	error: Signal<Option<Error>>,
	// Renditions that failed at runtime, removed from selection.
	excluded: Vec<String>,
	// The wall-clock anchor: the instant the anchor timestamp was first emitted.
	// Timestamps may be wall-clock-sized, so they are never turned into instants
	// directly.
	reference: Option<(Instant, Timestamp)>,
}

impl Driver {
	async fn run(mut self, broadcast: moq_model::BroadcastConsumer, section: catalog::Video) {
		if let Some(display) = section.display {
			self.display.set(Some(display));
		}

		loop {
			let target = self.target.peek();
			let Some((name, config)) = select_rendition(&section, &target, self.platform.as_ref(), &self.excluded)
			else {
				tracing::warn!("no eligible video renditions");
				self.error.set(Some(Error::NoEligibleRenditions));
				self.rendition.set(None);
				return;
			};

			let outcome = match config.container {
				Container::Cmaf => self.run_assembly(&broadcast, &section, name, config).await,
				_ => self.run_codec(&broadcast, &section, name, config).await,
			};

			match outcome {
				Outcome::End => return,
				Outcome::Reselect => continue,
			}
		}
	}

	// Path A: per-frame codec decoding with presentation scheduling.
	async fn run_codec(
		&mut self,
		broadcast: &moq_model::BroadcastConsumer,
		section: &catalog::Video,
		name: String,
		config: VideoConfig,
	) -> Outcome {
		let mut active = match self.start_sub(broadcast, section, name, &config) {
			Ok(sub) => sub,
			Err(_) => return Outcome::Reselect,
		};
		self.rendition.set(Some(active.name.clone()));

		let mut pending: Option<Sub> = None;
		let mut target_recv = self.target.subscribe();

		loop {
			// Promote the pending subscription once it has caught up: its next
			// picture is due now, so the handover is seamless.
			if let Some(sub) = &pending {
				let due = sub.queue.first().map(|frame| self.due(frame.timestamp));
				if matches!(due, Some(due) if due <= Instant::now()) {
					self.promote(&mut active, pending.take().unwrap());
				}
			}

			// The active track ended: switch or finish.
			if active.ended && active.queue.is_empty() {
				match pending.take() {
					Some(sub) => self.promote(&mut active, sub),
					None => return Outcome::End,
				}
			}

			let buffer = match active.queue.is_empty() {
				true => BufferStatus::Empty,
				false => BufferStatus::Filled,
			};
			if self.buffer_status.peek() != buffer {
				self.buffer_status.set(buffer);
			}

			// Schedule the earliest picture; far-future frames report a sync wait.
			let due = active.queue.first().map(|frame| self.due(frame.timestamp));
			if let Some(due) = due {
				let sleep = due.saturating_duration_since(Instant::now());
				if sleep > SYNC_WAIT_THRESHOLD {
					let status = SyncStatus::Wait { buffer: active.span() };
					if self.sync_status.peek() != status {
						tracing::debug!(?sleep, "video ahead of schedule, waiting");
						self.sync_status.set(status);
					}
				}
			}

			tokio::select! {
				_ = target_recv.changed() => {
					match self.retarget(section, &active, &pending) {
						Retarget::Keep => pending = None,
						Retarget::Pending(name, config) => {
							if let Some(old) = pending.take() {
								old.consumer.close();
							}
							pending = self.start_sub(broadcast, section, name, &config).ok();
						}
						Retarget::Restart => {
							active.consumer.close();
							return Outcome::Reselect;
						}
						Retarget::None => {}
					}
				}
				res = active.consumer.next_frame(), if !active.ended => {
					if !self.ingest(&mut active, res) {
						// A decoder failure kills this subscription only.
						active.consumer.close();
						return Outcome::Reselect;
					}
				}
				res = next_pending(&pending) => {
					let sub = pending.as_mut().unwrap();
					if !self.ingest(sub, res) {
						sub.consumer.close();
						pending = None;
					}
				}
				_ = sleep_until(due), if due.is_some() => {
					self.emit(&mut active);
				}
			}
		}
	}

	// Path B: hand fragments to the container-assembly pipeline.
	async fn run_assembly(
		&mut self,
		broadcast: &moq_model::BroadcastConsumer,
		section: &catalog::Video,
		name: String,
		config: VideoConfig,
	) -> Outcome {
		let backend = match self.platform.media_backend() {
			Ok(backend) => backend,
			Err(err) => {
				tracing::warn!(%err, "no media backend, excluding fragmented rendition");
				self.excluded.push(name);
				return Outcome::Reselect;
			}
		};

		let (pipeline, handle) = match Pipeline::new(
			backend,
			config.clone(),
			self.current_frame.clone(),
			self.display.clone(),
		) {
			Ok(pair) => pair,
			Err(err) => {
				tracing::warn!(%err, rendition = %name, "pipeline rejected rendition");
				self.excluded.push(name);
				return Outcome::Reselect;
			}
		};

		let track = broadcast.subscribe_track(&moq_model::Track {
			name: name.clone(),
			priority: section.priority,
		});
		let consumer = FrameConsumer::new(track, Container::Cmaf, self.latency.clone());

		self.pipeline.set(Some(handle.clone()));
		self.rendition.set(Some(name.clone()));
		let mut target_recv = self.target.subscribe();

		let stats = self.stats.clone();
		let producer = async {
			loop {
				match consumer.next_frame().await {
					Ok(Some(frame)) => {
						stats.update(|stats| {
							stats.frame_count += 1;
							stats.bytes_received += frame.payload.len() as u64;
						});
						handle.append_video(frame.payload);
					}
					Ok(None) => return Ok(()),
					Err(err) => return Err(err),
				}
			}
		};

		let outcome = tokio::select! {
			res = pipeline.run() => {
				match res {
					Ok(()) => Outcome::End,
					Err(err) => {
						tracing::warn!(%err, "pipeline failed, tearing down video");
						self.error.set(Some(err));
						Outcome::End
					}
				}
			}
			res = producer => {
				if let Err(err) = res {
					tracing::warn!(%err, "video producer failed");
				}
				Outcome::End
			}
			_ = watch_target(&mut target_recv, self.target.clone(), section, self.platform.as_ref(), &self.excluded, &name) => {
				// A rendition change destroys and rebuilds the pipeline.
				tracing::debug!("rendition change, resetting pipeline");
				Outcome::Reselect
			}
		};

		consumer.close();
		self.pipeline.set(None);
		outcome
	}

	fn start_sub(
		&mut self,
		broadcast: &moq_model::BroadcastConsumer,
		section: &catalog::Video,
		name: String,
		config: &VideoConfig,
	) -> Result<Sub> {
		let decoder = match self.platform.video_decoder(config) {
			Ok(decoder) => decoder,
			Err(err) => {
				// The platform lied about support; drop the rendition entirely.
				tracing::warn!(%err, rendition = %name, "video decoder rejected config");
				self.excluded.push(name.clone());
				return Err(Error::Unsupported(name));
			}
		};

		let track = broadcast.subscribe_track(&moq_model::Track {
			name: name.clone(),
			priority: section.priority,
		});
		let consumer = FrameConsumer::new(track, config.container, self.latency.clone());

		tracing::debug!(rendition = %name, "starting video subscription");

		Ok(Sub {
			name,
			consumer,
			decoder,
			queue: Vec::new(),
			ended: false,
		})
	}

	// Feed one consumer result through the decoder. Returns false on decoder failure.
	fn ingest(&mut self, sub: &mut Sub, res: Result<Option<crate::Frame>>) -> bool {
		let frame = match res {
			Ok(Some(frame)) => frame,
			Ok(None) => {
				sub.ended = true;
				return true;
			}
			Err(err) => {
				tracing::warn!(%err, rendition = %sub.name, "video track failed");
				sub.ended = true;
				return true;
			}
		};

		self.stats.update(|stats| {
			stats.bytes_received += frame.payload.len() as u64;
		});

		match sub.decoder.decode(&frame) {
			Ok(pictures) => {
				for picture in pictures {
					// The first decoded picture anchors stream time to the wall
					// clock; everything is scheduled relative to it.
					if self.reference.is_none() {
						self.reference = Some((Instant::now(), picture.timestamp));
					}
					sub.insert(picture);
				}
				true
			}
			Err(err) => {
				tracing::warn!(%err, rendition = %sub.name, "video decoder error");
				false
			}
		}
	}

	fn emit(&mut self, sub: &mut Sub) {
		if sub.queue.is_empty() {
			return;
		}
		let frame = sub.queue.remove(0);

		if self.display.peek().is_none() {
			self.display.set(Some(Dimensions {
				width: frame.width,
				height: frame.height,
			}));
		}

		self.stats.update(|stats| {
			stats.frame_count += 1;
			stats.timestamp = frame.timestamp;
		});

		if self.sync_status.peek() != SyncStatus::Ready {
			self.sync_status.set(SyncStatus::Ready);
		}

		self.current_frame.set(Some(Arc::new(frame)));
	}

	fn promote(&mut self, active: &mut Sub, pending: Sub) {
		let old = std::mem::replace(active, pending);
		old.consumer.close();

		tracing::debug!(from = %old.name, to = %active.name, "gapless rendition switch");
		self.rendition.set(Some(active.name.clone()));
	}

	fn retarget(&self, section: &catalog::Video, active: &Sub, pending: &Option<Sub>) -> Retarget {
		let target = self.target.peek();
		let Some((name, config)) = select_rendition(section, &target, self.platform.as_ref(), &self.excluded) else {
			return Retarget::None;
		};

		if config.container == Container::Cmaf {
			return Retarget::Restart;
		}
		if name == active.name {
			return Retarget::Keep;
		}
		if matches!(pending, Some(sub) if sub.name == name) {
			return Retarget::None;
		}

		Retarget::Pending(name, config)
	}

	// When the presentation clock should show this timestamp.
	fn due(&self, timestamp: Timestamp) -> Instant {
		let Some((instant, anchor)) = self.reference else {
			// Nothing emitted yet; the first frame is due immediately.
			return Instant::now();
		};

		let latency = self.latency.peek();
		match timestamp.checked_sub(anchor) {
			Ok(ahead) => instant + Duration::from(ahead) + latency,
			// Behind the anchor: already late, clamp to the past.
			Err(_) => {
				let behind: Duration = anchor.saturating_sub(timestamp).into();
				(instant + latency).checked_sub(behind).unwrap_or(instant)
			}
		}
	}
}

enum Retarget {
	// The active subscription already matches; cancel any pending switch.
	Keep,
	// Start (or replace) a pending subscription to this rendition.
	Pending(String, VideoConfig),
	// The decode path itself changes; tear everything down.
	Restart,
	None,
}

async fn next_pending(pending: &Option<Sub>) -> Result<Option<crate::Frame>> {
	match pending {
		Some(sub) if !sub.ended => sub.consumer.next_frame().await,
		_ => std::future::pending().await,
	}
}

async fn sleep_until(due: Option<Instant>) {
	match due {
		Some(due) => tokio::time::sleep_until(due).await,
		None => std::future::pending().await,
	}
}

// Resolves when a target change selects a different rendition than the current one.
async fn watch_target(
	recv: &mut tokio::sync::watch::Receiver<VideoTarget>,
	target: Signal<VideoTarget>,
	section: &catalog::Video,
	platform: &dyn Platform,
	excluded: &[String],
	current: &str,
) {
	loop {
		if recv.changed().await.is_err() {
			return std::future::pending().await;
		}

		let selected = select_rendition(section, &target.peek(), platform, excluded);
		if matches!(selected, Some((name, _)) if name != current) {
			return;
		}
	}
}

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Catalog, CatalogConsumer};
use crate::signals::{Effect, Signal};
use crate::watch::{Audio, Platform, Video, VideoTarget};

/// Initial configuration for watching a broadcast.
///
/// `enabled` and `latency` stay reactive afterwards through the signals on
/// [Broadcast]; `reload` and the video target are fixed at construction.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
	/// Start downloading immediately.
	pub enabled: bool,

	/// The jitter-buffer latency budget.
	pub latency: Duration,

	/// Wait for the broadcast to be announced active before consuming it, and
	/// resume when it is re-announced. When false the broadcast is assumed active.
	pub reload: bool,

	/// The initial video selection target.
	pub video: VideoTarget,
}

impl Default for BroadcastConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			latency: Duration::from_millis(100),
			reload: true,
			video: VideoTarget::default(),
		}
	}
}

/// The watch-side orchestrator for one broadcast.
///
/// Owns the catalog subscription and the [Video]/[Audio] sources, wiring the
/// pipeline handle from video to audio (one way). Everything tears down and
/// rebuilds when the origin, the announcement state, or `enabled` changes.
pub struct Broadcast {
	pub path: String,

	/// Start/stop downloads.
	pub enabled: Signal<bool>,

	/// The jitter-buffer latency budget, adjustable at runtime.
	pub latency: Signal<Duration>,

	/// The most recent catalog, replaced whole on every update.
	pub catalog: Signal<Option<Catalog>>,

	pub video: Video,
	pub audio: Audio,

	effect: Effect,
}

impl Broadcast {
	pub fn new(
		platform: Arc<dyn Platform>,
		origin: Signal<Option<moq_model::OriginConsumer>>,
		path: impl ToString,
		config: BroadcastConfig,
	) -> Self {
		let path = path.to_string();
		let BroadcastConfig {
			enabled: start_enabled,
			latency: initial_latency,
			reload,
			video: video_target,
		} = config;

		let enabled = Signal::new(start_enabled);
		let latency = Signal::new(initial_latency);
		let catalog: Signal<Option<Catalog>> = Signal::new(None);
		let broadcast: Signal<Option<moq_model::BroadcastConsumer>> = Signal::new(None);

		let video = Video::new(
			platform.clone(),
			broadcast.clone(),
			catalog.clone(),
			enabled.clone(),
			latency.clone(),
		);
		video.target.set(video_target);

		let audio = Audio::new(
			platform,
			broadcast.clone(),
			catalog.clone(),
			enabled.clone(),
			latency.clone(),
			video.pipeline.clone(),
		);

		let effect = {
			let path = path.clone();
			let enabled = enabled.clone();
			let catalog = catalog.clone();

			Effect::new(move |scope| {
				let on = enabled.get(scope);
				let origin = origin.get(scope);

				if !on {
					broadcast.set(None);
					catalog.set(None);
					return;
				}
				let Some(origin) = origin else {
					broadcast.set(None);
					catalog.set(None);
					return;
				};

				let path = path.clone();
				let broadcast = broadcast.clone();
				let catalog = catalog.clone();
				scope.spawn(move |_cancel| run(origin, path, reload, broadcast, catalog));
			})
		};

		Self {
			path,
			enabled,
			latency,
			catalog,
			video,
			audio,
			effect,
		}
	}

	/// Close everything. Idempotent.
	pub fn close(&self) {
		self.video.close();
		self.audio.close();
		self.effect.close();
	}

	/// Close everything and wait until no task remains.
	pub async fn closed(self) {
		self.effect.closed().await;
		self.video.closed().await;
		self.audio.closed().await;
	}
}

// Resolve the broadcast from the origin, honoring announcements, and follow its
// catalog until it ends.
async fn run(
	origin: moq_model::OriginConsumer,
	path: String,
	reload: bool,
	broadcast: Signal<Option<moq_model::BroadcastConsumer>>,
	catalog: Signal<Option<Catalog>>,
) {
	// One announce stream for the whole lifetime: each loop iteration consumes
	// the transitions that accumulated while the previous broadcast played.
	let mut announced = match reload {
		true => Some(origin.announced(&path)),
		false => None,
	};

	loop {
		if let Some(announced) = announced.as_mut() {
			// Wait until the broadcast is announced active.
			loop {
				match announced.next().await {
					Ok(Some(entry)) if entry.path == path && entry.active => break,
					Ok(Some(_)) => continue,
					Ok(None) | Err(_) => return,
				}
			}
			tracing::debug!(%path, "broadcast announced");
		}

		let Some(consumer) = origin.consume_broadcast(&path) else {
			tracing::warn!(%path, "broadcast not found");
			match reload {
				true => continue,
				false => return,
			}
		};

		broadcast.set(Some(consumer.clone()));

		// Each catalog update is a full replacement.
		let track = consumer.subscribe_track(&Catalog::default_track());
		let mut updates = CatalogConsumer::new(track);
		loop {
			tokio::select! {
				res = updates.next() => match res {
					Ok(Some(update)) => {
						tracing::debug!(%path, "catalog updated");
						catalog.set(Some(update));
					}
					Ok(None) => break,
					Err(err) => {
						tracing::warn!(%path, %err, "catalog failed");
						break;
					}
				},
				_ = consumer.closed() => break,
			}
		}

		broadcast.set(None);
		catalog.set(None);

		if !reload {
			return;
		}
		// Go back to waiting for the next announcement.
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::{Container, H264, VideoConfig};
	use crate::watch::mock::MockPlatform;
	use std::collections::BTreeMap;

	fn catalog_doc() -> Catalog {
		let mut renditions = BTreeMap::new();
		renditions.insert(
			"video0".to_string(),
			VideoConfig {
				codec: H264::default().into(),
				description: None,
				coded_width: Some(1280),
				coded_height: Some(720),
				bitrate: None,
				framerate: None,
				optimize_for_latency: Some(true),
				container: Container::Varint,
				init_segment: None,
			},
		);

		Catalog {
			video: Some(crate::catalog::Video {
				renditions,
				priority: 1,
				display: None,
				flip: None,
			}),
			..Default::default()
		}
	}

	// Build an origin with one announced broadcast carrying a catalog track and
	// a video track.
	fn publish() -> (
		moq_model::OriginProducer,
		moq_model::OriginConsumer,
		moq_model::TrackProducer,
	) {
		let origin = moq_model::Origin::produce();
		let mut origin_producer = origin.producer;

		let broadcast = moq_model::Broadcast::produce();
		let mut broadcast_producer = broadcast.producer;

		let produced = catalog_doc().produce();
		broadcast_producer.insert_track(produced.consumer.track.clone());
		produced.producer.clone().lock(); // publish the initial version

		let video_track = moq_model::Track {
			name: "video0".to_string(),
			priority: 1,
		}
		.produce();
		broadcast_producer.insert_track(video_track.consumer);

		origin_producer.publish_broadcast("room/demo", broadcast_producer.consume());

		// Keep the producers alive with the test.
		std::mem::forget(broadcast_producer);
		std::mem::forget(produced.producer);

		(origin_producer, origin.consumer, video_track.producer)
	}

	#[tokio::test(start_paused = true)]
	async fn end_to_end() {
		let (_origin_producer, origin, mut video_track) = publish();
		let platform = Arc::new(MockPlatform::default());

		let broadcast = Broadcast::new(
			platform,
			Signal::new(Some(origin)),
			"room/demo",
			BroadcastConfig {
				enabled: true,
				latency: Duration::ZERO,
				reload: true,
				video: VideoTarget::default(),
			},
		);

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(broadcast.catalog.peek().is_some(), "catalog never arrived");
		assert_eq!(broadcast.video.rendition.peek().as_deref(), Some("video0"));

		// A frame flows all the way to the published picture.
		let mut group = video_track.append_group();
		let timestamp = crate::Timestamp::ZERO;
		group.write_frame(Container::Varint.encode_frame(timestamp, b"frame"));
		tokio::time::sleep(Duration::from_millis(10)).await;

		let frame = broadcast.video.current_frame.peek().expect("no picture published");
		assert_eq!(frame.width, 1280);
		assert_eq!(broadcast.video.stats.peek().frame_count, 1);

		// Close is idempotent and joins every task.
		broadcast.close();
		broadcast.close();
		broadcast.closed().await;
	}

	#[tokio::test(start_paused = true)]
	async fn disabled_consumes_nothing() {
		let (_origin_producer, origin, _video_track) = publish();

		let broadcast = Broadcast::new(
			Arc::new(MockPlatform::default()),
			Signal::new(Some(origin)),
			"room/demo",
			BroadcastConfig::default(),
		);

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(broadcast.catalog.peek().is_none());

		// Enabling starts the whole stack.
		broadcast.enabled.set(true);
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(broadcast.catalog.peek().is_some());

		broadcast.closed().await;
	}

	#[tokio::test(start_paused = true)]
	async fn reload_waits_for_announce() {
		let origin = moq_model::Origin::produce();
		let mut origin_producer = origin.producer;

		let broadcast = Broadcast::new(
			Arc::new(MockPlatform::default()),
			Signal::new(Some(origin.consumer.clone())),
			"room/late",
			BroadcastConfig {
				enabled: true,
				..Default::default()
			},
		);

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(broadcast.catalog.peek().is_none());

		// The broadcast shows up later; the watcher picks it up.
		let inner = moq_model::Broadcast::produce();
		let mut inner_producer = inner.producer;
		let produced = catalog_doc().produce();
		inner_producer.insert_track(produced.consumer.track.clone());
		produced.producer.clone().lock();
		origin_producer.publish_broadcast("room/late", inner_producer.consume());

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(broadcast.catalog.peek().is_some(), "catalog never arrived after announce");

		std::mem::forget(inner_producer);
		std::mem::forget(produced.producer);
		broadcast.closed().await;
	}
}

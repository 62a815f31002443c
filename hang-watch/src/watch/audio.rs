use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{self, AudioConfig, Catalog, Container};
use crate::signals::{Effect, Signal};
use crate::Error;
use crate::watch::{FrameConsumer, PipelineHandle, Platform, contains_atom};

/// How long to wait for the video-owned pipeline before falling back to
/// per-frame decoding.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
	pub bytes_received: u64,
}

/// The watch-side audio source.
///
/// Mirrors [Video](crate::watch::Video) with two differences: per-frame decoding
/// pipes PCM into an [AudioSink](crate::watch::AudioSink) instead of scheduling
/// pictures, and the fragmented path joins the video-owned [Pipeline]
/// (crate::watch::Pipeline) through its handle rather than owning one.
///
/// Audio starts disabled (autoplay policies usually require a gesture); enable
/// it to start downloading and rendering. For the fragmented path the append
/// buffer is initialized even while disabled, so the two-buffer pipeline is
/// fully formed before video fragments start flowing.
pub struct Audio {
	/// Whether audio downloads and renders. Starts false.
	pub enabled: Signal<bool>,

	/// The currently selected rendition, if any.
	pub rendition: Signal<Option<String>>,

	pub stats: Signal<AudioStats>,

	/// The most recent unrecoverable error, ex. no eligible renditions.
	pub error: Signal<Option<Error>>,

	effect: Effect,
}

impl Audio {
	pub fn new(
		platform: Arc<dyn Platform>,
		broadcast: Signal<Option<moq_model::BroadcastConsumer>>,
		catalog: Signal<Option<Catalog>>,
		broadcast_enabled: Signal<bool>,
		latency: Signal<Duration>,
		pipeline: Signal<Option<PipelineHandle>>,
	) -> Self {
		let enabled = Signal::new(false);
		let rendition = Signal::new(None);
		let stats = Signal::new(AudioStats::default());
		let error = Signal::new(None);

		let effect = {
			let enabled = enabled.clone();
			let rendition = rendition.clone();
			let stats = stats.clone();
			let error = error.clone();

			Effect::new(move |scope| {
				let on = broadcast_enabled.get(scope);
				let audio_on = enabled.get(scope);
				let broadcast = broadcast.get(scope);
				let catalog = catalog.get(scope);

				if !on {
					return;
				}
				let Some(broadcast) = broadcast else { return };
				let Some(section) = catalog.and_then(|catalog| catalog.audio) else {
					return;
				};

				let driver = Driver {
					platform: platform.clone(),
					latency: latency.clone(),
					rendition: rendition.clone(),
					stats: stats.clone(),
					error: error.clone(),
					pipeline: pipeline.clone(),
					enabled: audio_on,
					excluded: Vec::new(),
				};

				scope.spawn(move |_cancel| driver.run(broadcast, section));

				let rendition = rendition.clone();
				scope.cleanup(move || rendition.set(None));
			})
		};

		Self {
			enabled,
			rendition,
			stats,
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

enum Outcome {
	End,
	Reselect,
	// The pipeline never materialized; decode per-frame instead.
	Fallback(String, AudioConfig),
}

struct Driver {
	platform: Arc<dyn Platform>,
	latency: Signal<Duration>,
	rendition: Signal<Option<String>>,
	stats: Signal<AudioStats>,
	error: Signal<Option<Error>>,
	pipeline: Signal<Option<PipelineHandle>>,
	enabled: bool,
	excluded: Vec<String>,
}

impl Driver {
	async fn run(mut self, broadcast: moq_model::BroadcastConsumer, section: catalog::Audio) {
		loop {
			let Some((name, config)) = self.select(&section) else {
				if self.enabled {
					tracing::warn!("no eligible audio renditions");
					self.error.set(Some(Error::NoEligibleRenditions));
				}
				self.rendition.set(None);
				return;
			};

			let outcome = match config.container {
				Container::Cmaf => self.run_assembly(&broadcast, &section, name, config).await,
				// Per-frame decoding only downloads while enabled.
				_ if self.enabled => self.run_codec(&broadcast, &section, name, config).await,
				_ => return,
			};

			match outcome {
				Outcome::End => return,
				Outcome::Reselect => continue,
				Outcome::Fallback(name, config) => {
					if !self.enabled {
						return;
					}
					match self.run_codec(&broadcast, &section, name, config).await {
						Outcome::Reselect => continue,
						_ => return,
					}
				}
			}
		}
	}

	// The first supported rendition in catalog order; audio has no pixel goal.
	fn select(&self, section: &catalog::Audio) -> Option<(String, AudioConfig)> {
		section
			.renditions
			.iter()
			.filter(|(name, _)| !self.excluded.contains(name))
			.find(|(_, config)| self.platform.supports_audio(config))
			.map(|(name, config)| (name.clone(), config.clone()))
	}

	fn subscribe(
		&self,
		broadcast: &moq_model::BroadcastConsumer,
		section: &catalog::Audio,
		name: &str,
		config: &AudioConfig,
	) -> FrameConsumer {
		let track = broadcast.subscribe_track(&moq_model::Track {
			name: name.to_string(),
			priority: section.priority,
		});
		FrameConsumer::new(track, config.container, self.latency.clone())
	}

	// Path A: decode frames and pipe PCM into the platform's render graph.
	async fn run_codec(
		&mut self,
		broadcast: &moq_model::BroadcastConsumer,
		section: &catalog::Audio,
		name: String,
		config: AudioConfig,
	) -> Outcome {
		let mut decoder = match self.platform.audio_decoder(&config) {
			Ok(decoder) => decoder,
			Err(err) => {
				tracing::warn!(%err, rendition = %name, "audio decoder rejected config");
				self.excluded.push(name);
				return Outcome::Reselect;
			}
		};
		let mut sink = match self.platform.audio_sink(&config) {
			Ok(sink) => sink,
			Err(err) => {
				tracing::warn!(%err, "no audio output");
				self.error.set(Some(Error::Decoder(Arc::new(err))));
				return Outcome::End;
			}
		};

		let consumer = self.subscribe(broadcast, section, &name, &config);
		self.rendition.set(Some(name.clone()));
		tracing::debug!(rendition = %name, "starting audio subscription");

		loop {
			match consumer.next_frame().await {
				Ok(Some(frame)) => {
					self.stats.update(|stats| {
						stats.bytes_received += frame.payload.len() as u64;
					});

					match decoder.decode(&frame) {
						Ok(frames) => {
							for pcm in frames {
								if let Err(err) = sink.write(pcm) {
									tracing::warn!(%err, "audio sink failed");
									self.error.set(Some(Error::Decoder(Arc::new(err))));
									return Outcome::End;
								}
							}
						}
						Err(err) => {
							// Kills this subscription only; selection may retry.
							tracing::warn!(%err, rendition = %name, "audio decoder error");
							consumer.close();
							return Outcome::Reselect;
						}
					}
				}
				Ok(None) => return Outcome::End,
				Err(err) => {
					tracing::warn!(%err, "audio track failed");
					return Outcome::End;
				}
			}
		}
	}

	// Path B: join the video-owned pipeline with our own append buffer.
	async fn run_assembly(
		&mut self,
		broadcast: &moq_model::BroadcastConsumer,
		section: &catalog::Audio,
		name: String,
		config: AudioConfig,
	) -> Outcome {
		let mut pipe = self.pipeline.subscribe();
		self.rendition.set(Some(name.clone()));

		loop {
			let handle = pipe.borrow_and_update().clone();
			let Some(handle) = handle else {
				if self.enabled {
					// Bounded wait: the pipeline may never exist (ex. video disabled).
					match tokio::time::timeout(JOIN_TIMEOUT, pipe.changed()).await {
						Ok(Ok(())) => continue,
						Ok(Err(_)) => return Outcome::End,
						Err(_) => {
							tracing::warn!("pipeline unavailable, falling back to per-frame decoding");
							return Outcome::Fallback(name, config);
						}
					}
				}

				// Disabled: nothing to do until a pipeline shows up.
				if pipe.changed().await.is_err() {
					return Outcome::End;
				}
				continue;
			};

			// Resolve the init segment. The catalog field is authoritative.
			let (init, consumer) = match config.init_segment.clone() {
				Some(init) => (init, None),
				None if self.enabled => {
					// LEGACY: older broadcasters omit the catalog field and ship
					// the init segment in-band as the first fragment.
					tracing::warn!("no init segment in catalog, sniffing first fragment (legacy)");
					let consumer = self.subscribe(broadcast, section, &name, &config);
					match consumer.next_frame().await {
						Ok(Some(first)) if contains_atom(&first.payload, b"moov") => (first.payload, Some(consumer)),
						Ok(Some(_)) => {
							tracing::warn!(rendition = %name, "first fragment carries no moov atom");
							self.excluded.push(name);
							return Outcome::Reselect;
						}
						_ => return Outcome::End,
					}
				}
				None => {
					// Disabled and nothing to append yet; init once enabled.
					tracing::debug!("no init segment, deferring audio buffer setup");
					if pipe.changed().await.is_err() {
						return Outcome::End;
					}
					continue;
				}
			};

			match handle.initialize_audio(&config, init).await {
				Ok(()) => tracing::debug!(rendition = %name, "audio append buffer initialized"),
				Err(Error::Timeout) => {
					tracing::warn!("audio join-in timed out");
					return Outcome::Fallback(name, config);
				}
				Err(err) => {
					// Quota or a dying pipeline: stay video-only until it changes.
					tracing::warn!(%err, "audio join-in failed");
					if pipe.changed().await.is_err() {
						return Outcome::End;
					}
					continue;
				}
			}

			if !self.enabled {
				// The two-buffer pipeline is formed; no downloads while disabled.
				if pipe.changed().await.is_err() {
					return Outcome::End;
				}
				continue;
			}

			let consumer = consumer.unwrap_or_else(|| self.subscribe(broadcast, section, &name, &config));
			loop {
				tokio::select! {
					res = consumer.next_frame() => match res {
						Ok(Some(frame)) => {
							self.stats.update(|stats| {
								stats.bytes_received += frame.payload.len() as u64;
							});
							handle.append_audio(frame.payload);
						}
						Ok(None) => return Outcome::End,
						Err(err) => {
							tracing::warn!(%err, "audio track failed");
							return Outcome::End;
						}
					},
					res = pipe.changed() => {
						// The pipeline was rebuilt (rendition change); rejoin.
						consumer.close();
						match res {
							Ok(()) => break,
							Err(_) => return Outcome::End,
						}
					}
				}
			}
		}
	}
}

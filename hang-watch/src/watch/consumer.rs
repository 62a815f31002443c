use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::select_all;
use tokio::sync::{Mutex, watch};

use crate::catalog::Container;
use crate::signals::Signal;
use crate::{Error, Frame, Result, Timestamp};

/// A jitter-buffered frame consumer for one track.
///
/// Groups may arrive concurrently and out of order; this consumer reorders them
/// and emits a single stream of [Frame]s with non-decreasing group numbers.
/// Freshness is bounded by a reactive latency budget: when the stream falls too
/// far behind, the active group is dropped whole and playback resumes from the
/// next one (only whole groups are dropped, preserving decodability).
///
/// Buffering advances only while a caller is inside [next_frame](Self::next_frame);
/// at most one caller may wait at a time.
#[derive(Clone)]
pub struct FrameConsumer {
	state: Arc<Mutex<State>>,
	// Runtime guard for the at-most-one-waiter contract.
	waiter: Arc<AtomicBool>,
	closed: Arc<watch::Sender<bool>>,
	container: Container,
	latency: Signal<Duration>,

	/// The number of latency-enforcement skips so far.
	pub skipped: Signal<u64>,
}

struct State {
	// None once the track has ended.
	track: Option<moq_model::TrackConsumer>,
	// Known groups, all with sequence >= the active group, sorted by arrival.
	groups: Vec<GroupBuffer>,
	// The active group sequence. Initialized to the first group observed.
	active: Option<u64>,
}

struct GroupBuffer {
	consumer: moq_model::GroupConsumer,
	sequence: u64,
	// Decoded frames not yet consumed.
	frames: VecDeque<Frame>,
	// The number of frames decoded so far; the first one is the keyframe.
	decoded: u64,
	// The latest timestamp observed in this group, kept after consumption.
	max_timestamp: Option<Timestamp>,
	ended: bool,
}

enum Event {
	Group(Option<moq_model::GroupConsumer>),
	Frame(usize, Option<Bytes>),
	Closed,
}

impl FrameConsumer {
	pub fn new(track: moq_model::TrackConsumer, container: Container, latency: Signal<Duration>) -> Self {
		Self {
			state: Arc::new(Mutex::new(State {
				track: Some(track),
				groups: Vec::new(),
				active: None,
			})),
			waiter: Arc::new(AtomicBool::new(false)),
			closed: Arc::new(watch::channel(false).0),
			container,
			latency,
			skipped: Signal::new(0),
		}
	}

	/// Return the next frame in decode order, waiting until one is available.
	///
	/// Returns `None` once the track ends or the consumer is closed.
	/// Concurrent calls fail with [Error::InvalidState].
	pub async fn next_frame(&self) -> Result<Option<Frame>> {
		if self.waiter.swap(true, Ordering::SeqCst) {
			return Err(Error::InvalidState);
		}
		let _guard = WaiterGuard(self.waiter.as_ref());

		let mut state = self.state.lock().await;
		loop {
			if *self.closed.borrow() {
				state.reset();
				return Ok(None);
			}

			// Drain the active group before waiting for anything new.
			if let Some(frame) = state.pop_active()? {
				return Ok(Some(frame));
			}

			// The track ended and the active group will never arrive; jump ahead.
			if state.track.is_none() {
				match state.next_known() {
					Some(sequence) => {
						if state.active != Some(sequence) {
							state.active = Some(sequence);
							continue;
						}
					}
					None => return Ok(None),
				}
			}

			let event = {
				let State { track, groups, .. } = &mut *state;

				let next_group = async {
					match track {
						Some(track) => track.next_group().await.unwrap_or(None),
						None => std::future::pending().await,
					}
				};

				let next_frame = async {
					let pending: Vec<_> = groups
						.iter_mut()
						.enumerate()
						.filter(|(_, group)| !group.ended)
						.map(|(index, group)| {
							Box::pin(async move { (index, group.consumer.read_frame().await.unwrap_or(None)) })
						})
						.collect();

					if pending.is_empty() {
						return std::future::pending().await;
					}

					let ((index, frame), _, _) = select_all(pending).await;
					(index, frame)
				};

				let mut closed = self.closed.subscribe();

				tokio::select! {
					_ = closed.wait_for(|closed| *closed) => Event::Closed,
					group = next_group => Event::Group(group),
					(index, frame) = next_frame => Event::Frame(index, frame),
				}
			};

			match event {
				Event::Closed => {
					state.reset();
					return Ok(None);
				}
				Event::Group(None) => {
					state.track = None;
				}
				Event::Group(Some(group)) => self.buffer_group(&mut state, group),
				Event::Frame(index, None) => {
					state.groups[index].ended = true;
				}
				Event::Frame(index, Some(body)) => self.buffer_frame(&mut state, index, body)?,
			}
		}
	}

	fn buffer_group(&self, state: &mut State, group: moq_model::GroupConsumer) {
		let sequence = group.sequence();

		match state.active {
			// The first group observed becomes the active one.
			None => state.active = Some(sequence),
			Some(active) if sequence < active => {
				// The stream is live; a group from before we joined is useless.
				tracing::debug!(sequence, active, "discarding group from the past");
				return;
			}
			Some(_) => {}
		}

		state.groups.push(GroupBuffer {
			consumer: group,
			sequence,
			frames: VecDeque::new(),
			decoded: 0,
			max_timestamp: None,
			ended: false,
		});
	}

	fn buffer_frame(&self, state: &mut State, index: usize, body: Bytes) -> Result<()> {
		let (timestamp, payload) = self.container.decode_frame(body)?;
		let active = state.active;

		let group = &mut state.groups[index];
		let frame = Frame {
			timestamp,
			keyframe: group.decoded == 0,
			group: group.sequence,
			payload,
		};

		group.decoded += 1;
		group.max_timestamp = Some(match group.max_timestamp {
			Some(max) => max.max(timestamp),
			None => timestamp,
		});

		let is_active = active.is_none() || active == Some(group.sequence);
		group.frames.push_back(frame);

		// A frame for a non-active group means we're holding playback back;
		// check whether the latency budget allows it.
		if !is_active {
			self.enforce_latency(state);
		}

		Ok(())
	}

	// The skip rule: when the span between the earliest unconsumed timestamp and
	// the latest known timestamp exceeds the budget, drop the active group whole.
	fn enforce_latency(&self, state: &mut State) {
		if state.groups.len() < 2 {
			return;
		}

		let earliest = state
			.groups
			.iter()
			.filter_map(|group| group.frames.front())
			.map(|frame| frame.timestamp)
			.min();
		let latest = state.groups.iter().filter_map(|group| group.max_timestamp).max();

		let (Some(earliest), Some(latest)) = (earliest, latest) else {
			return;
		};

		let span: Duration = latest.saturating_sub(earliest).into();
		let budget = self.latency.peek();
		if span <= budget {
			return;
		}

		let Some(active) = state.active else { return };

		// Free the active group's frames and close its transport handle.
		state.groups.retain(|group| group.sequence != active);

		let next = state.next_known();
		tracing::warn!(
			group = active,
			?span,
			budget = ?budget,
			next,
			"skipping group to enforce latency budget"
		);

		// Resume from the next group we know about.
		state.active = next;
		self.skipped.update(|count| *count += 1);
	}

	/// Close the consumer, freeing all buffered frames and waking any waiter.
	/// Idempotent.
	pub fn close(&self) {
		self.closed.send_replace(true);

		// Free buffers immediately when no waiter holds the state.
		if let Ok(mut state) = self.state.try_lock() {
			state.reset();
		}
	}
}

impl State {
	// Pop the next frame of the active group, advancing past finished groups.
	fn pop_active(&mut self) -> Result<Option<Frame>> {
		loop {
			let Some(active) = self.active else { return Ok(None) };

			let Some(group) = self.groups.iter_mut().find(|group| group.sequence == active) else {
				return Ok(None);
			};

			if let Some(frame) = group.frames.pop_front() {
				return Ok(Some(frame));
			}

			if !group.ended {
				return Ok(None);
			}

			// The active group finished: advance by one, whether or not the
			// next group has arrived yet.
			self.groups.retain(|group| group.sequence != active);
			self.active = Some(active + 1);
		}
	}

	// The smallest known group sequence at or after the active one.
	fn next_known(&self) -> Option<u64> {
		self.groups.iter().map(|group| group.sequence).min()
	}

	fn reset(&mut self) {
		self.groups.clear();
		self.track = None;
	}
}

struct WaiterGuard<'a>(&'a AtomicBool);

impl Drop for WaiterGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn track() -> (moq_model::TrackProducer, FrameConsumer) {
		let track = moq_model::Track {
			name: "video0".to_string(),
			priority: 1,
		}
		.produce();

		let consumer = FrameConsumer::new(
			track.consumer,
			Container::Varint,
			Signal::new(Duration::from_secs(1)),
		);
		(track.producer, consumer)
	}

	fn frame(millis: u64) -> Bytes {
		let timestamp = Timestamp::from_millis(millis).unwrap();
		Container::Varint.encode_frame(timestamp, b"data")
	}

	#[tokio::test]
	async fn two_group_reorder() {
		let (mut producer, consumer) = track();

		// Frames straddle groups: f0.1 arrives after f1.0.
		let mut g0 = producer.create_group(0);
		g0.write_frame(frame(0));
		let mut g1 = producer.create_group(1);
		g1.write_frame(frame(40));
		g0.write_frame(frame(20));
		g0.close();
		g1.close();
		producer.close();

		let expect = [(0u64, 0u64, true), (0, 20, false), (1, 40, true)];
		for (group, millis, keyframe) in expect {
			let frame = consumer.next_frame().await.unwrap().unwrap();
			assert_eq!(frame.group, group);
			assert_eq!(frame.timestamp.as_millis(), millis);
			assert_eq!(frame.keyframe, keyframe);
		}
		assert!(consumer.next_frame().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn group_order_non_decreasing() {
		let (mut producer, consumer) = track();

		// Deliver groups out of order; the group tags must never decrease.
		let mut g1 = producer.create_group(1);
		let mut g0 = producer.create_group(0);
		let mut g2 = producer.create_group(2);
		g1.write_frame(frame(10));
		g0.write_frame(frame(0));
		g2.write_frame(frame(20));
		g1.close();
		g0.close();
		g2.close();
		producer.close();

		let mut last = 0;
		let mut keyframes = 0;
		while let Some(frame) = consumer.next_frame().await.unwrap() {
			assert!(frame.group >= last, "group went backwards");
			last = frame.group;
			keyframes += (frame.keyframe) as u32;
		}

		// The first group observed (G1) became active; G0 was discarded as stale.
		assert_eq!(last, 2);
		assert_eq!(keyframes, 2);
	}

	#[tokio::test]
	async fn single_waiter() {
		let (_producer, consumer) = track();

		let pending = {
			let consumer = consumer.clone();
			tokio::spawn(async move { consumer.next_frame().await })
		};
		tokio::task::yield_now().await;

		assert!(matches!(consumer.next_frame().await, Err(Error::InvalidState)));

		consumer.close();
		assert!(pending.await.unwrap().unwrap().is_none());

		// The waiter slot frees up again after the first caller returns.
		assert!(consumer.next_frame().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn latency_skip() {
		let track = moq_model::Track {
			name: "video0".to_string(),
			priority: 1,
		}
		.produce();
		let mut producer = track.producer;
		let consumer = FrameConsumer::new(
			track.consumer,
			Container::Varint,
			Signal::new(Duration::from_millis(100)),
		);

		// G0 stalls after one frame; G1 keeps going past the budget.
		let mut g0 = producer.create_group(0);
		g0.write_frame(frame(0));

		let first = consumer.next_frame().await.unwrap().unwrap();
		assert_eq!(first.group, 0);
		assert!(first.keyframe);

		let mut g1 = producer.create_group(1);
		for millis in [0, 50, 100, 150, 200] {
			g1.write_frame(frame(millis));
		}

		// The next frame crosses the group boundary with a fresh keyframe.
		let skipped = consumer.next_frame().await.unwrap().unwrap();
		assert_eq!(skipped.group, 1);
		assert!(skipped.keyframe);
		assert_eq!(skipped.timestamp.as_millis(), 0);
		assert_eq!(consumer.skipped.peek(), 1);

		// The rest of G1 follows; nothing from G0 ever again.
		for millis in [50, 100, 150, 200] {
			let frame = consumer.next_frame().await.unwrap().unwrap();
			assert_eq!(frame.group, 1);
			assert_eq!(frame.timestamp.as_millis(), millis);
			assert!(!frame.keyframe);
		}
	}

	#[tokio::test]
	async fn close_idempotent() {
		let (mut producer, consumer) = track();
		let mut g0 = producer.create_group(0);
		g0.write_frame(frame(0));

		consumer.close();
		consumer.close();
		assert!(consumer.next_frame().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn advance_over_gap() {
		let (mut producer, consumer) = track();

		// G0 completes; G2 exists but G1 never will. Once the track ends the
		// consumer jumps the gap instead of waiting forever.
		let mut g0 = producer.create_group(0);
		g0.write_frame(frame(0));
		g0.close();
		let mut g2 = producer.create_group(2);
		g2.write_frame(frame(100));
		g2.close();
		producer.close();

		assert_eq!(consumer.next_frame().await.unwrap().unwrap().group, 0);
		assert_eq!(consumer.next_frame().await.unwrap().unwrap().group, 2);
		assert!(consumer.next_frame().await.unwrap().is_none());
	}
}

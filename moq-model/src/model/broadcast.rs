use std::collections::HashMap;

use tokio::sync::watch;

use crate::{Produce, Track, TrackConsumer};

/// A broadcast: a named collection of tracks from a single publisher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Broadcast;

impl Broadcast {
	pub fn produce() -> Produce<BroadcastProducer, BroadcastConsumer> {
		let (send, recv) = watch::channel(BroadcastState::default());

		Produce {
			producer: BroadcastProducer { state: send },
			consumer: BroadcastConsumer { state: recv },
		}
	}
}

#[derive(Default)]
struct BroadcastState {
	tracks: HashMap<String, TrackConsumer>,
	closed: bool,
}

/// Publishes tracks into a broadcast.
pub struct BroadcastProducer {
	state: watch::Sender<BroadcastState>,
}

impl BroadcastProducer {
	/// Expose a track to subscribers, replacing any previous track with the same name.
	pub fn insert_track(&mut self, track: TrackConsumer) {
		self.state.send_modify(|state| {
			state.tracks.insert(track.info.name.clone(), track);
		});
	}

	pub fn remove_track(&mut self, name: &str) {
		self.state.send_modify(|state| {
			state.tracks.remove(name);
		});
	}

	pub fn consume(&self) -> BroadcastConsumer {
		BroadcastConsumer {
			state: self.state.subscribe(),
		}
	}

	pub fn close(self) {
		// Drop performs the close.
	}
}

impl Drop for BroadcastProducer {
	fn drop(&mut self) {
		self.state.send_modify(|state| state.closed = true);
	}
}

/// Subscribes to tracks within a broadcast.
#[derive(Clone)]
pub struct BroadcastConsumer {
	state: watch::Receiver<BroadcastState>,
}

impl BroadcastConsumer {
	/// Subscribe to a track by name.
	///
	/// A track that was never published yields a consumer that ends immediately,
	/// so a subscriber working from a stale catalog cannot block forever.
	pub fn subscribe_track(&self, track: &Track) -> TrackConsumer {
		if let Some(consumer) = self.state.borrow().tracks.get(&track.name) {
			return consumer.clone();
		}

		let missing = track.clone().produce();
		missing.consumer
	}

	/// Wait until the broadcast is closed by the publisher.
	pub async fn closed(&self) {
		let mut state = self.state.clone();
		// An error means the producer disappeared, which also counts as closed.
		let _ = state.wait_for(|state| state.closed).await;
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed
	}
}

use tokio::sync::watch;

use crate::{Error, Group, GroupConsumer, GroupProducer, Produce};

/// A track: a named stream of groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
	pub name: String,

	/// The priority of this track relative to others in the broadcast.
	/// Advisory; higher values are delivered first when bandwidth is constrained.
	pub priority: u8,
}

impl Track {
	pub fn produce(self) -> Produce<TrackProducer, TrackConsumer> {
		let (send, recv) = watch::channel(TrackState::default());

		Produce {
			producer: TrackProducer {
				info: self.clone(),
				state: send,
			},
			consumer: TrackConsumer {
				info: self,
				state: recv,
				index: 0,
			},
		}
	}
}

#[derive(Default)]
struct TrackState {
	// Groups in delivery order, which is not necessarily sequence order.
	groups: Vec<GroupConsumer>,
	next_sequence: u64,
	closed: bool,
}

/// Produces groups for a track.
pub struct TrackProducer {
	pub info: Track,
	state: watch::Sender<TrackState>,
}

impl TrackProducer {
	/// Create the next group in sequence order.
	pub fn append_group(&mut self) -> GroupProducer {
		let sequence = self.state.borrow().next_sequence;
		self.create_group(sequence)
	}

	/// Create a group with an explicit sequence number, allowing out-of-order production.
	pub fn create_group(&mut self, sequence: u64) -> GroupProducer {
		let group = Group { sequence }.produce();
		self.state.send_modify(|state| {
			state.groups.push(group.consumer);
			state.next_sequence = state.next_sequence.max(sequence + 1);
		});
		group.producer
	}

	/// Create a new consumer for this track, starting at the first buffered group.
	pub fn consume(&self) -> TrackConsumer {
		TrackConsumer {
			info: self.info.clone(),
			state: self.state.subscribe(),
			index: 0,
		}
	}

	/// Finish the track, signalling end-of-groups to consumers.
	pub fn close(self) {
		// Drop performs the close.
	}

	/// Returns true when every consumer has been dropped.
	pub fn is_unused(&self) -> bool {
		self.state.is_closed()
	}
}

impl Drop for TrackProducer {
	fn drop(&mut self) {
		self.state.send_modify(|state| state.closed = true);
	}
}

/// Receives groups from a track in delivery order.
///
/// Cloning creates an independent cursor over the same track.
#[derive(Clone)]
pub struct TrackConsumer {
	pub info: Track,
	state: watch::Receiver<TrackState>,
	index: usize,
}

impl TrackConsumer {
	/// Receive the next group, waiting until one is available.
	///
	/// Returns `None` once the track is closed and all groups have been returned.
	pub async fn next_group(&mut self) -> Result<Option<GroupConsumer>, Error> {
		let index = self.index;
		let state = self
			.state
			.wait_for(|state| state.groups.len() > index || state.closed)
			.await
			.map_err(|_| Error::Cancelled)?;

		match state.groups.get(index) {
			Some(group) => {
				let group = group.clone();
				drop(state);
				self.index += 1;
				Ok(Some(group))
			}
			None => Ok(None),
		}
	}

	/// Wait until the track is closed by the producer.
	pub async fn closed(&self) -> Result<(), Error> {
		let mut state = self.state.clone();
		state
			.wait_for(|state| state.closed)
			.await
			.map_err(|_| Error::Cancelled)?;
		Ok(())
	}
}

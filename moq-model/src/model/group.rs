use bytes::Bytes;
use tokio::sync::watch;

use crate::{Error, Produce};

/// A group of frames, the unit of out-of-order delivery.
///
/// The first frame in a group is independently decodable (a keyframe or an init+fragment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
	/// The sequence number of this group within its track, assigned by the publisher.
	pub sequence: u64,
}

impl Group {
	pub fn produce(self) -> Produce<GroupProducer, GroupConsumer> {
		let (send, recv) = watch::channel(GroupState::default());

		Produce {
			producer: GroupProducer {
				info: self,
				state: send,
			},
			consumer: GroupConsumer {
				info: self,
				state: recv,
				index: 0,
			},
		}
	}
}

#[derive(Default)]
struct GroupState {
	// Frames in decode order. Consumers keep a cursor into this list.
	frames: Vec<Bytes>,
	closed: bool,
}

/// Writes frames to a group in decode order.
pub struct GroupProducer {
	pub info: Group,
	state: watch::Sender<GroupState>,
}

impl GroupProducer {
	/// Append a frame to the group.
	pub fn write_frame(&mut self, frame: impl Into<Bytes>) {
		let frame = frame.into();
		self.state.send_modify(|state| state.frames.push(frame));
	}

	/// Finish the group, signalling end-of-frames to consumers.
	pub fn close(self) {
		// Drop performs the close.
	}

	/// Returns true when every consumer has been dropped.
	pub fn is_unused(&self) -> bool {
		self.state.is_closed()
	}
}

impl Drop for GroupProducer {
	fn drop(&mut self) {
		self.state.send_modify(|state| state.closed = true);
	}
}

/// Reads frames from a group in decode order.
///
/// Cloning creates an independent cursor over the same group.
#[derive(Clone)]
pub struct GroupConsumer {
	pub info: Group,
	state: watch::Receiver<GroupState>,
	index: usize,
}

impl GroupConsumer {
	pub fn sequence(&self) -> u64 {
		self.info.sequence
	}

	/// Read the next frame, waiting until one is available.
	///
	/// Returns `None` once the group is closed and fully read.
	pub async fn read_frame(&mut self) -> Result<Option<Bytes>, Error> {
		let index = self.index;
		let state = self
			.state
			.wait_for(|state| state.frames.len() > index || state.closed)
			.await
			.map_err(|_| Error::Cancelled)?;

		match state.frames.get(index) {
			Some(frame) => {
				let frame = frame.clone();
				drop(state);
				self.index += 1;
				Ok(Some(frame))
			}
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn read_in_order() {
		let group = Group { sequence: 7 }.produce();
		let mut producer = group.producer;
		let mut consumer = group.consumer;

		producer.write_frame(Bytes::from_static(b"one"));
		producer.write_frame(Bytes::from_static(b"two"));
		producer.close();

		assert_eq!(consumer.read_frame().await.unwrap().unwrap().as_ref(), b"one");
		assert_eq!(consumer.read_frame().await.unwrap().unwrap().as_ref(), b"two");
		assert!(consumer.read_frame().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn wakes_waiter() {
		let group = Group { sequence: 0 }.produce();
		let mut producer = group.producer;
		let mut consumer = group.consumer;

		let read = tokio::spawn(async move { consumer.read_frame().await });
		tokio::task::yield_now().await;

		producer.write_frame(Bytes::from_static(b"late"));
		assert_eq!(read.await.unwrap().unwrap().unwrap().as_ref(), b"late");
	}

	#[tokio::test]
	async fn independent_cursors() {
		let group = Group { sequence: 0 }.produce();
		let mut producer = group.producer;
		let mut a = group.consumer;
		let mut b = a.clone();

		producer.write_frame(Bytes::from_static(b"x"));
		producer.close();

		assert!(a.read_frame().await.unwrap().is_some());
		assert!(b.read_frame().await.unwrap().is_some());
		assert!(a.read_frame().await.unwrap().is_none());
	}
}

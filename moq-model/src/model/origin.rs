use std::collections::{HashMap, VecDeque};

use tokio::sync::watch;

use crate::{BroadcastConsumer, Error, Produce};

/// An origin: a collection of broadcasts, discovered via announcements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Origin;

impl Origin {
	pub fn produce() -> Produce<OriginProducer, OriginConsumer> {
		let (send, recv) = watch::channel(OriginState::default());

		Produce {
			producer: OriginProducer { state: send },
			consumer: OriginConsumer { state: recv },
		}
	}
}

/// An announcement transition for a broadcast path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announced {
	pub path: String,
	pub active: bool,
}

#[derive(Default)]
struct OriginState {
	broadcasts: HashMap<String, BroadcastConsumer>,
	// Every publish/unpublish transition, in order. Announce consumers follow this log.
	log: Vec<Announced>,
	closed: bool,
}

/// Publishes broadcasts to an origin.
pub struct OriginProducer {
	state: watch::Sender<OriginState>,
}

impl OriginProducer {
	/// Announce a broadcast at the given path, replacing any existing one.
	pub fn publish_broadcast(&mut self, path: impl ToString, broadcast: BroadcastConsumer) {
		let path = path.to_string();
		self.state.send_modify(|state| {
			state.broadcasts.insert(path.clone(), broadcast);
			state.log.push(Announced { path, active: true });
		});
	}

	/// Withdraw the announcement for a path.
	pub fn unpublish_broadcast(&mut self, path: &str) {
		self.state.send_modify(|state| {
			if state.broadcasts.remove(path).is_some() {
				state.log.push(Announced {
					path: path.to_string(),
					active: false,
				});
			}
		});
	}

	pub fn consume(&self) -> OriginConsumer {
		OriginConsumer {
			state: self.state.subscribe(),
		}
	}

	pub fn close(self) {
		// Drop performs the close.
	}
}

impl Drop for OriginProducer {
	fn drop(&mut self) {
		self.state.send_modify(|state| state.closed = true);
	}
}

/// Discovers and consumes broadcasts from an origin.
#[derive(Clone)]
pub struct OriginConsumer {
	state: watch::Receiver<OriginState>,
}

impl OriginConsumer {
	/// Get the broadcast currently published at the given path, if any.
	pub fn consume_broadcast(&self, path: &str) -> Option<BroadcastConsumer> {
		self.state.borrow().broadcasts.get(path).cloned()
	}

	/// Wait until the origin is closed by the producer.
	pub async fn closed(&self) {
		let mut state = self.state.clone();
		// An error means the producer disappeared, which also counts as closed.
		let _ = state.wait_for(|state| state.closed).await;
	}

	/// Subscribe to announcement transitions for paths starting with the given prefix.
	///
	/// The current active set is delivered first, followed by live transitions.
	pub fn announced(&self, prefix: &str) -> AnnouncedConsumer {
		let state = self.state.clone();
		let snapshot = state.borrow();

		let initial = snapshot
			.broadcasts
			.keys()
			.filter(|path| path.starts_with(prefix))
			.map(|path| Announced {
				path: path.clone(),
				active: true,
			})
			.collect();
		let index = snapshot.log.len();
		drop(snapshot);

		AnnouncedConsumer {
			state,
			prefix: prefix.to_string(),
			initial,
			index,
		}
	}
}

/// A stream of [Announced] transitions matching a path prefix.
pub struct AnnouncedConsumer {
	state: watch::Receiver<OriginState>,
	prefix: String,
	initial: VecDeque<Announced>,
	index: usize,
}

impl AnnouncedConsumer {
	/// Receive the next announcement transition.
	///
	/// Returns `None` once the origin is closed.
	pub async fn next(&mut self) -> Result<Option<Announced>, Error> {
		if let Some(announced) = self.initial.pop_front() {
			return Ok(Some(announced));
		}

		loop {
			let index = self.index;
			let state = self
				.state
				.wait_for(|state| state.log.len() > index || state.closed)
				.await
				.map_err(|_| Error::Cancelled)?;

			match state.log.get(index) {
				Some(announced) => {
					let announced = announced.clone();
					drop(state);
					self.index += 1;

					if announced.path.starts_with(&self.prefix) {
						return Ok(Some(announced));
					}
				}
				None => return Ok(None),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Broadcast;

	#[tokio::test]
	async fn announce_transitions() {
		let origin = Origin::produce();
		let mut producer = origin.producer;

		let broadcast = Broadcast::produce();
		producer.publish_broadcast("room/alice", broadcast.producer.consume());

		// The current active set arrives before live transitions.
		let mut announced = origin.consumer.announced("room/");
		assert_eq!(
			announced.next().await.unwrap().unwrap(),
			Announced {
				path: "room/alice".to_string(),
				active: true
			}
		);

		producer.unpublish_broadcast("room/alice");
		assert_eq!(
			announced.next().await.unwrap().unwrap(),
			Announced {
				path: "room/alice".to_string(),
				active: false
			}
		);

		drop(producer);
		assert!(announced.next().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn prefix_filter() {
		let origin = Origin::produce();
		let mut producer = origin.producer;
		let mut announced = origin.consumer.announced("room/");

		let a = Broadcast::produce();
		let b = Broadcast::produce();
		producer.publish_broadcast("lobby/bob", a.producer.consume());
		producer.publish_broadcast("room/carol", b.producer.consume());

		assert_eq!(announced.next().await.unwrap().unwrap().path, "room/carol");
	}

	#[tokio::test]
	async fn consume_by_path() {
		let origin = Origin::produce();
		let mut producer = origin.producer;

		assert!(origin.consumer.consume_broadcast("missing").is_none());

		let broadcast = Broadcast::produce();
		producer.publish_broadcast("live", broadcast.producer.consume());
		assert!(origin.consumer.consume_broadcast("live").is_some());
	}
}

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

/// The default capacity for every queue in the pipeline.
pub const QUEUE_CAPACITY: usize = 10;

struct QueueState<T> {
	items: VecDeque<T>,
	closed: bool,
}

impl<T> Default for QueueState<T> {
	fn default() -> Self {
		Self {
			items: VecDeque::new(),
			closed: false,
		}
	}
}

/// A bounded FIFO queue with a discard-oldest overflow policy.
///
/// Overflow never exerts backpressure: when full, the oldest entry is dropped
/// with a warning so the stream stays fresh.
pub struct BoundedQueue<T> {
	send: Arc<watch::Sender<QueueState<T>>>,
	recv: watch::Receiver<QueueState<T>>,
	capacity: usize,
	name: &'static str,
}

impl<T> Clone for BoundedQueue<T> {
	fn clone(&self) -> Self {
		Self {
			send: self.send.clone(),
			recv: self.recv.clone(),
			capacity: self.capacity,
			name: self.name,
		}
	}
}

impl<T: Send + Sync + 'static> BoundedQueue<T> {
	/// Create a queue with the given capacity. The name labels overflow warnings.
	pub fn new(capacity: usize, name: &'static str) -> Self {
		let (send, recv) = watch::channel(QueueState::default());
		Self {
			send: Arc::new(send),
			recv,
			capacity,
			name,
		}
	}

	/// Append an item, discarding the oldest entry when full.
	pub fn push(&self, item: T) {
		self.send.send_modify(|state| {
			if state.items.len() >= self.capacity {
				state.items.pop_front();
				tracing::warn!(queue = self.name, capacity = self.capacity, "queue full, dropping oldest");
			}
			state.items.push_back(item);
		});
	}

	/// Remove the oldest item, waiting until one is available.
	///
	/// Returns `None` once the queue is closed and drained.
	pub async fn pop(&mut self) -> Option<T> {
		loop {
			let mut taken = None;
			self.send.send_if_modified(|state| {
				taken = state.items.pop_front();
				taken.is_some()
			});
			if let Some(item) = taken {
				return Some(item);
			}

			if self.recv.borrow().closed {
				return None;
			}

			if self.recv.changed().await.is_err() {
				return None;
			}
		}
	}

	/// Remove the oldest item if one is available right now.
	pub fn try_pop(&self) -> Option<T> {
		let mut taken = None;
		self.send.send_if_modified(|state| {
			taken = state.items.pop_front();
			taken.is_some()
		});
		taken
	}

	/// Wait until the queue has an item or is closed, without taking anything.
	///
	/// Cancel-safe: no item is ever lost by dropping this future.
	pub async fn readable(&mut self) {
		let _ = self
			.recv
			.wait_for(|state| !state.items.is_empty() || state.closed)
			.await;
	}

	/// Close the queue, waking any blocked [pop](Self::pop).
	pub fn close(&self) {
		self.send.send_modify(|state| state.closed = true);
	}

	pub fn len(&self) -> usize {
		self.recv.borrow().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.recv.borrow().items.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn fifo() {
		let mut queue = BoundedQueue::new(4, "test");
		queue.push(1);
		queue.push(2);
		assert_eq!(queue.pop().await, Some(1));
		assert_eq!(queue.pop().await, Some(2));
	}

	#[tokio::test]
	async fn discard_oldest() {
		let mut queue = BoundedQueue::new(2, "test");
		queue.push(1);
		queue.push(2);
		queue.push(3);
		assert_eq!(queue.len(), 2);
		assert_eq!(queue.pop().await, Some(2));
		assert_eq!(queue.pop().await, Some(3));
	}

	#[tokio::test]
	async fn close_wakes() {
		let queue = BoundedQueue::<u32>::new(2, "test");
		let handle = {
			let mut queue = queue.clone();
			tokio::spawn(async move { queue.pop().await })
		};
		tokio::task::yield_now().await;

		queue.close();
		assert_eq!(handle.await.unwrap(), None);

		// Items pushed before close still drain.
		let mut queue = BoundedQueue::new(2, "test");
		queue.push(7);
		queue.close();
		assert_eq!(queue.pop().await, Some(7));
		assert_eq!(queue.pop().await, None);
	}
}

//! A minimal signal/effect runtime.
//!
//! Every lifecycle in the watch pipeline is expressed as: "as long as these
//! inputs are valid, run this work and tear it down when any of them changes".
//! [Signal] is a value cell; [Effect] re-runs a body whenever a dependency read
//! with [Signal::get] changes, cancelling the tasks the previous run spawned.
//!
//! The body runs synchronously to register dependencies; all async work must be
//! spawned on the [Scope], where it is raced against a [Cancel] token.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;

/// A reactive value cell.
///
/// Cloning is cheap and every clone refers to the same cell.
/// Writes notify all subscribed effects and tasks.
pub struct Signal<T> {
	send: Arc<watch::Sender<T>>,
}

impl<T> Clone for Signal<T> {
	fn clone(&self) -> Self {
		Self {
			send: self.send.clone(),
		}
	}
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
	pub fn new(value: T) -> Self {
		let (send, _) = watch::channel(value);
		Self { send: Arc::new(send) }
	}

	/// Read the current value without registering a dependency.
	pub fn peek(&self) -> T {
		self.send.borrow().clone()
	}

	/// Read the current value, re-running the effect when it changes.
	pub fn get(&self, scope: &mut Scope) -> T {
		scope.depend(self.send.subscribe());
		self.peek()
	}

	/// Replace the current value.
	pub fn set(&self, value: T) {
		self.send.send_replace(value);
	}

	/// Modify the current value in place.
	pub fn update(&self, f: impl FnOnce(&mut T)) {
		self.send.send_modify(f);
	}

	/// Subscribe for use in long-running tasks, outside any effect body.
	pub fn subscribe(&self) -> watch::Receiver<T> {
		self.send.subscribe()
	}
}

impl<T: Clone + Send + Sync + 'static + Default> Default for Signal<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.send.borrow().fmt(f)
	}
}

/// A cancellation token handed to effect-spawned tasks.
///
/// Resolves when the owning scope closes. Tasks are additionally raced against
/// the token at the top level, so an await that ignores it is still bounded.
#[derive(Clone)]
pub struct Cancel {
	recv: watch::Receiver<bool>,
}

impl Cancel {
	/// Wait until the owning scope closes.
	pub async fn cancelled(&self) {
		let mut recv = self.recv.clone();
		// An error means the scope was dropped, which also counts as cancelled.
		let _ = recv.wait_for(|cancelled| *cancelled).await;
	}

	pub fn is_cancelled(&self) -> bool {
		*self.recv.borrow()
	}
}

type DepChanged = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The per-run state of an effect: dependencies, cleanups, tasks, nested effects.
pub struct Scope {
	deps: Vec<DepChanged>,
	cleanups: Vec<Box<dyn FnOnce() + Send>>,
	tasks: Vec<tokio::task::JoinHandle<()>>,
	nested: Vec<Effect>,
	cancel: watch::Sender<bool>,
}

impl Scope {
	fn new() -> Self {
		let (cancel, _) = watch::channel(false);
		Self {
			deps: Vec::new(),
			cleanups: Vec::new(),
			tasks: Vec::new(),
			nested: Vec::new(),
			cancel,
		}
	}

	pub(crate) fn depend<T: Send + Sync + 'static>(&mut self, mut recv: watch::Receiver<T>) {
		self.deps.push(Box::pin(async move {
			if recv.changed().await.is_err() {
				// The signal was dropped; it can never change again.
				std::future::pending::<()>().await
			}
		}));
	}

	/// The cancellation token for this scope.
	pub fn token(&self) -> Cancel {
		Cancel {
			recv: self.cancel.subscribe(),
		}
	}

	/// Register a callback to run when the scope closes. Callbacks run in LIFO order.
	pub fn cleanup(&mut self, f: impl FnOnce() + Send + 'static) {
		self.cleanups.push(Box::new(f));
	}

	/// Spawn an async task owned by this scope.
	///
	/// The task receives the scope's [Cancel] token and is raced against it;
	/// when the scope closes the task is awaited before cleanups run.
	pub fn spawn<F, Fut>(&mut self, f: F)
	where
		F: FnOnce(Cancel) -> Fut,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let cancel = self.token();
		let fut = f(cancel.clone());
		let handle = tokio::spawn(async move {
			// The task is polled first so it can finish gracefully when it was
			// already waiting on the token; otherwise it is dropped mid-await.
			tokio::select! {
				biased;
				_ = fut => {}
				_ = cancel.cancelled() => {}
			}
		});
		self.tasks.push(handle);
	}

	/// Create a nested effect that closes when this scope closes.
	pub fn effect(&mut self, body: impl FnMut(&mut Scope) + Send + 'static) {
		self.nested.push(Effect::new(body));
	}

	// Resolves when any dependency changes. Pending forever when there are none.
	async fn changed(&mut self) {
		if self.deps.is_empty() {
			return std::future::pending().await;
		}

		let deps = std::mem::take(&mut self.deps);
		let _ = futures::future::select_all(deps).await;
	}

	async fn close(&mut self) {
		self.cancel.send_replace(true);

		for task in self.tasks.drain(..) {
			let _ = task.await;
		}

		for cleanup in self.cleanups.drain(..).rev() {
			cleanup();
		}

		for nested in self.nested.drain(..) {
			nested.closed().await;
		}
	}
}

/// A reactive scope: runs a body, tracks its dependencies, and re-runs it when
/// any of them changes.
///
/// Dropping the effect closes it; use [Effect::closed] to wait for teardown.
/// Must be created within a tokio runtime.
pub struct Effect {
	close: watch::Sender<bool>,
	handle: Option<tokio::task::JoinHandle<()>>,
}

impl Effect {
	pub fn new(mut body: impl FnMut(&mut Scope) + Send + 'static) -> Self {
		let (close, close_recv) = watch::channel(false);

		// The first run is synchronous so dependencies exist before we return.
		let mut scope = Scope::new();
		body(&mut scope);

		let handle = tokio::spawn(Self::run(body, scope, close_recv));

		Self {
			close,
			handle: Some(handle),
		}
	}

	async fn run(
		mut body: impl FnMut(&mut Scope) + Send + 'static,
		mut scope: Scope,
		mut close: watch::Receiver<bool>,
	) {
		loop {
			let rerun = tokio::select! {
				// An error means the Effect handle was dropped; close.
				_ = close.wait_for(|closed| *closed) => false,
				_ = scope.changed() => true,
			};

			scope.close().await;

			if !rerun {
				return;
			}

			scope = Scope::new();
			body(&mut scope);
		}
	}

	/// Close the effect, cancelling tasks and running cleanups. Idempotent.
	pub fn close(&self) {
		self.close.send_replace(true);
	}

	/// Close the effect and wait until teardown finishes.
	pub async fn closed(mut self) {
		self.close();
		if let Some(handle) = self.handle.take() {
			let _ = handle.await;
		}
	}
}

impl Drop for Effect {
	fn drop(&mut self) {
		self.close();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn rerun_on_change() {
		let signal = Signal::new(1u32);
		let runs = Arc::new(AtomicUsize::new(0));

		let effect = Effect::new({
			let signal = signal.clone();
			let runs = runs.clone();
			move |scope| {
				let _ = signal.get(scope);
				runs.fetch_add(1, Ordering::SeqCst);
			}
		});

		assert_eq!(runs.load(Ordering::SeqCst), 1);

		signal.set(2);
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 2);

		effect.closed().await;
		signal.set(3);
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn peek_does_not_subscribe() {
		let signal = Signal::new(1u32);
		let runs = Arc::new(AtomicUsize::new(0));

		let effect = Effect::new({
			let signal = signal.clone();
			let runs = runs.clone();
			move |_scope| {
				let _ = signal.peek();
				runs.fetch_add(1, Ordering::SeqCst);
			}
		});

		signal.set(2);
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(runs.load(Ordering::SeqCst), 1);

		effect.closed().await;
	}

	#[tokio::test]
	async fn cleanups_lifo() {
		let order = Arc::new(Mutex::new(Vec::new()));

		let effect = Effect::new({
			let order = order.clone();
			move |scope| {
				let first = order.clone();
				scope.cleanup(move || first.lock().unwrap().push("first"));
				let second = order.clone();
				scope.cleanup(move || second.lock().unwrap().push("second"));
			}
		});

		effect.closed().await;
		assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
	}

	#[tokio::test]
	async fn tasks_cancelled() {
		let started = Arc::new(AtomicUsize::new(0));
		let finished = Arc::new(AtomicUsize::new(0));

		let effect = Effect::new({
			let started = started.clone();
			let finished = finished.clone();
			move |scope| {
				let started = started.clone();
				let finished = finished.clone();
				scope.spawn(move |cancel| async move {
					started.fetch_add(1, Ordering::SeqCst);
					cancel.cancelled().await;
					finished.fetch_add(1, Ordering::SeqCst);
				});
			}
		});

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(started.load(Ordering::SeqCst), 1);

		effect.closed().await;
		assert_eq!(finished.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn nested_effects_close() {
		let signal = Signal::new(0u32);
		let cleaned = Arc::new(AtomicUsize::new(0));

		let effect = Effect::new({
			let signal = signal.clone();
			let cleaned = cleaned.clone();
			move |scope| {
				let signal = signal.clone();
				let cleaned = cleaned.clone();
				scope.effect(move |inner| {
					let _ = signal.get(inner);
					let cleaned = cleaned.clone();
					inner.cleanup(move || {
						cleaned.fetch_add(1, Ordering::SeqCst);
					});
				});
			}
		});

		effect.closed().await;
		assert_eq!(cleaned.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn update_in_place() {
		let signal = Signal::new(vec![1u32]);
		signal.update(|v| v.push(2));
		assert_eq!(signal.peek(), vec![1, 2]);
	}
}

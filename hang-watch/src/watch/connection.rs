use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex};

use url::Url;

use crate::signals::{Effect, Signal};

/// The reactive state of a transport connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
	#[default]
	Disconnected,
	Connecting,
	Connected,
}

/// Establishes transport sessions.
///
/// The wire protocol lives elsewhere; a dialer hands back the origin of
/// broadcasts the session subscribes to.
pub trait Dialer: Send + Sync + 'static {
	fn connect(&self, url: &Url) -> Pin<Box<dyn Future<Output = anyhow::Result<moq_model::OriginConsumer>> + Send>>;
}

/// A reactive connection: dial whenever the URL is set, expose the origin while
/// the session lives, and reconnect when the URL changes.
pub struct Connection {
	pub url: Signal<Option<Url>>,
	pub status: Signal<ConnectionStatus>,

	/// The origin of broadcasts, present while connected.
	pub origin: Signal<Option<moq_model::OriginConsumer>>,

	effect: Effect,
}

impl Connection {
	pub fn new(dialer: Arc<dyn Dialer>) -> Self {
		let url: Signal<Option<Url>> = Signal::new(None);
		let status = Signal::new(ConnectionStatus::default());
		let origin: Signal<Option<moq_model::OriginConsumer>> = Signal::new(None);

		let effect = {
			let url = url.clone();
			let status = status.clone();
			let origin = origin.clone();

			Effect::new(move |scope| {
				let Some(url) = url.get(scope) else {
					status.set(ConnectionStatus::Disconnected);
					return;
				};

				status.set(ConnectionStatus::Connecting);

				let dialer = dialer.clone();
				let status_spawn = status.clone();
				let origin_spawn = origin.clone();
				scope.spawn(move |_cancel| async move {
					let status = status_spawn;
					let origin = origin_spawn;
					match dialer.connect(&url).await {
						Ok(consumer) => {
							tracing::debug!(%url, "connected");
							status.set(ConnectionStatus::Connected);
							origin.set(Some(consumer.clone()));

							consumer.closed().await;
							tracing::debug!(%url, "connection closed");
						}
						Err(err) => {
							tracing::warn!(%url, %err, "connection failed");
						}
					}
					origin.set(None);
					status.set(ConnectionStatus::Disconnected);
				});

				let status = status.clone();
				let origin = origin.clone();
				scope.cleanup(move || {
					origin.set(None);
					status.set(ConnectionStatus::Disconnected);
				});
			})
		};

		Self {
			url,
			status,
			origin,
			effect,
		}
	}

	/// Close the connection and wait for teardown.
	pub async fn closed(self) {
		self.effect.closed().await;
	}

	/// Close the connection. Idempotent.
	pub fn close(&self) {
		self.effect.close();
	}
}

/// The transport flavor a session ended up on, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
	WebTransport,
	Quic,
	WebSocket,
}

type ConnectionTypeCallback = Box<dyn Fn(ConnectionType) + Send + Sync>;

#[derive(Default)]
struct ConnectionTypeRegistry {
	current: Option<ConnectionType>,
	callbacks: Vec<ConnectionTypeCallback>,
}

// Process-wide and lifecycle-free: sessions report in, observers subscribe.
static CONNECTION_TYPE: LazyLock<Mutex<ConnectionTypeRegistry>> = LazyLock::new(Default::default);

/// Record the transport flavor of the most recent session.
pub fn set_connection_type(kind: ConnectionType) {
	let mut registry = CONNECTION_TYPE.lock().unwrap();
	registry.current = Some(kind);
	for callback in &registry.callbacks {
		callback(kind);
	}
}

/// Observe transport flavors; the callback fires immediately with the current
/// value, then on every change.
pub fn on_connection_type(callback: impl Fn(ConnectionType) + Send + Sync + 'static) {
	let mut registry = CONNECTION_TYPE.lock().unwrap();
	if let Some(current) = registry.current {
		callback(current);
	}
	registry.callbacks.push(Box::new(callback));
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	struct MockDialer {
		origin: Mutex<Option<moq_model::OriginConsumer>>,
	}

	impl Dialer for MockDialer {
		fn connect(
			&self,
			_url: &Url,
		) -> Pin<Box<dyn Future<Output = anyhow::Result<moq_model::OriginConsumer>> + Send>> {
			let origin = self.origin.lock().unwrap().clone();
			Box::pin(async move {
				match origin {
					Some(origin) => Ok(origin),
					None => anyhow::bail!("refused"),
				}
			})
		}
	}

	#[tokio::test(start_paused = true)]
	async fn connects_and_disconnects() {
		let origin = moq_model::Origin::produce();
		let dialer = Arc::new(MockDialer {
			origin: Mutex::new(Some(origin.consumer.clone())),
		});

		let connection = Connection::new(dialer);
		assert_eq!(connection.status.peek(), ConnectionStatus::Disconnected);

		connection.url.set(Some("https://relay.example/".parse().unwrap()));
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert_eq!(connection.status.peek(), ConnectionStatus::Connected);
		assert!(connection.origin.peek().is_some());

		// The session ends when the origin producer goes away.
		drop(origin.producer);
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert_eq!(connection.status.peek(), ConnectionStatus::Disconnected);
		assert!(connection.origin.peek().is_none());

		connection.closed().await;
	}

	#[tokio::test(start_paused = true)]
	async fn failed_dial() {
		let dialer = Arc::new(MockDialer {
			origin: Mutex::new(None),
		});

		let connection = Connection::new(dialer);
		connection.url.set(Some("https://relay.example/".parse().unwrap()));
		tokio::time::sleep(Duration::from_millis(5)).await;

		assert_eq!(connection.status.peek(), ConnectionStatus::Disconnected);
		connection.closed().await;
	}

	#[test]
	fn connection_type_registry() {
		use std::sync::atomic::{AtomicUsize, Ordering};

		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		on_connection_type(move |_kind| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		set_connection_type(ConnectionType::WebTransport);
		assert!(seen.load(Ordering::SeqCst) >= 1);
	}
}

use std::sync::Arc;

/// An error surfaced by the watch pipeline.
///
/// Latency skips and append-queue overflow are events, not errors; they are
/// observable via signals and warnings instead.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
	/// The underlying transport ended; surfaced as end-of-stream by consumers.
	#[error("transport error: {0}")]
	Transport(#[from] moq_model::Error),

	#[error("decode error: {0}")]
	Decode(#[from] moq_model::coding::DecodeError),

	#[error("timestamp overflow")]
	TimeOverflow(#[from] moq_model::TimeOverflow),

	/// API misuse, such as two concurrent `next_frame` waiters.
	#[error("invalid state")]
	InvalidState,

	/// No catalog rendition is decodable on this platform.
	#[error("no eligible renditions")]
	NoEligibleRenditions,

	/// The platform rejected a specific codec configuration.
	#[error("unsupported codec: {0}")]
	Unsupported(String),

	/// A platform decoder reported a failure.
	#[error("decoder error: {0}")]
	Decoder(Arc<anyhow::Error>),

	/// The media pipeline backend reported a failure.
	#[error("pipeline error: {0}")]
	Pipeline(Arc<anyhow::Error>),

	/// The media pipeline closed underneath us.
	#[error("pipeline closed")]
	PipelineClosed,

	/// A bounded wait (pipeline open, audio join-in) expired.
	#[error("timeout")]
	Timeout,

	#[error("json error: {0}")]
	Json(Arc<serde_json::Error>),
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Json(Arc::new(err))
	}
}

pub type Result<T> = std::result::Result<T, Error>;

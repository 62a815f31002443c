/// An error returned by model handles.
///
/// End-of-stream is not an error; consumers return `Ok(None)` instead.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// The handle was used after being closed.
	#[error("closed")]
	Closed,

	/// The producer side disappeared without closing cleanly.
	#[error("cancelled")]
	Cancelled,
}

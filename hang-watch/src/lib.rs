//! # hang-watch: watch-side media pipeline for MoQ broadcasts
//!
//! `hang-watch` turns a [moq_model] broadcast into a playable, adaptive,
//! A/V-synchronized experience with bounded latency. It provides:
//!
//! - **Catalog**: Discovery of available renditions and their codec metadata.
//! - **Frame consumer**: A jitter buffer that reorders groups and enforces a latency budget.
//! - **Video/Audio sources**: Rendition selection, decode scheduling, and gapless switching.
//! - **Container assembly**: A dual-buffer media pipeline for fragmented containers.
//! - **Signals**: The small reactive runtime that ties lifecycles together.
//!
//! Platform concerns (decoders, audio output, the media element) are traits in
//! [watch::platform]; implement them against WebCodecs, FFmpeg, or whatever the
//! target provides.

mod error;
mod queue;

pub mod catalog;
pub mod model;
pub mod signals;
pub mod watch;

// export the moq-model version in use
pub use moq_model;
pub use moq_model::{TimeOverflow, Timestamp};

pub use error::*;
pub use model::*;
pub use queue::*;

//! The catalog describes available media tracks and codecs.
//!
//! This is a JSON blob that can be live updated like any other track in MoQ.
//! It describes the available audio and video renditions, including codec
//! information, resolution, and container format, plus sidecar tracks.

mod audio;
mod chat;
mod codec;
mod container;
mod root;
mod user;
mod video;

pub use audio::*;
pub use chat::*;
pub use codec::*;
pub use container::*;
pub use root::*;
pub use user::*;
pub use video::*;

//! # moq-model: Media over QUIC data model
//!
//! The object hierarchy used by MoQ broadcasts, decoupled from any wire protocol:
//! - [Origin]: A collection of [Broadcast]s, discovered via announcements.
//! - [Broadcast]: A collection of [Track]s, produced by a single publisher.
//! - [Track]: A collection of [Group]s, delivered out-of-order until expired.
//! - [Group]: An ordered collection of frames, each an opaque byte payload.
//!
//! Everything is split into Producer/Consumer pairs.
//! Producers are held by whatever feeds the model (a network session, an importer, a test);
//! consumers are cheap to clone and each clone keeps its own read cursor.
//!
//! To publish:
//! - [Origin::produce] to get an [OriginProducer] and [OriginConsumer] pair.
//! - [OriginProducer::publish_broadcast] to announce a [BroadcastConsumer].
//! - [BroadcastProducer::insert_track] to expose a [TrackConsumer] for each track.
//! - [TrackProducer::append_group] for each group of pictures (or audio frames).
//! - [GroupProducer::write_frame] to write each frame in the group.
//!
//! To consume:
//! - [OriginConsumer::announced] to discover broadcasts as they're announced.
//! - [BroadcastConsumer::subscribe_track] to get a [TrackConsumer] for a specific track.
//! - [TrackConsumer::next_group] to receive each group in delivery order.
//! - [GroupConsumer::read_frame] to read each frame in decode order.

mod error;
mod model;
mod produce;
mod time;

pub mod coding;

pub use error::*;
pub use model::*;
pub use produce::*;
pub use time::*;

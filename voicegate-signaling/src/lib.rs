//! Voicegate signaling core
//!
//! Track publication/subscription signaling for voice and stream
//! rooms: decides which media tracks each participant publishes and
//! which peers' tracks it consumes, and keeps every client's view of
//! available tracks (SSRCs, codec assignments, stream metadata)
//! synchronized as participants connect, start or stop producing, and
//! leave.
//!
//! ## Architecture
//!
//! - **[`RoomRegistry`]**: room lifetime and participant membership
//! - **[`Participant`]**: one connected client's transport readiness
//!   and produced tracks
//! - **[`SubscriptionManager`]**: idempotent (viewer, producer, kind)
//!   consumption edges
//! - **[`UpdateFanout`]**: the producer-intent protocol and per-peer
//!   update dispatch
//! - **[`KeyframeCoordinator`]**: keyframe requests on viewer decode
//!   readiness
//! - **[`MediaEngine`]**: injected boundary to the media transport
//!   (ICE/DTLS, RTP routing stay outside this crate)

pub mod config;
pub mod error;
pub mod fanout;
pub mod keyframe;
pub mod logging;
pub mod media;
pub mod participant;
pub mod registry;
pub mod subscription;
pub mod types;

pub use config::{Config, LoggingConfig, ServerConfig, SignalingConfig};
pub use error::{Error, Result};
pub use fanout::{ProducerState, TrackUpdate, UpdateFanout};
pub use keyframe::KeyframeCoordinator;
pub use media::{ConsumerAllocation, LocalMediaEngine, MediaEngine, UpdateSink};
pub use participant::Participant;
pub use registry::{Room, RoomRegistry};
pub use subscription::{OutgoingCodecs, OutgoingSsrcs, SubscriptionManager};
pub use types::{MediaKind, RoomId, RoomType, StreamEntry, TrackInfo, UserId};

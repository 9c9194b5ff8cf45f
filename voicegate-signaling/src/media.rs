//! Media engine boundary
//!
//! The signaling core does not route packets. It calls into a
//! [`MediaEngine`] to publish tracks, allocate per-viewer consumers and
//! request keyframes, and pushes outbound signaling through an
//! [`UpdateSink`] attached to each participant. Both are injected so
//! the core stays free of transport details.

use crate::error::{Error, Result};
use crate::fanout::TrackUpdate;
use crate::types::{MediaKind, RoomId, TrackInfo, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Identifiers the engine assigned to one (viewer, producer, kind)
/// consumer when it was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerAllocation {
    pub ssrc: u32,
    /// 0 for kinds without a retransmission stream (audio)
    pub rtx_ssrc: u32,
    pub payload_type: u8,
    /// 0 for kinds without a retransmission stream (audio)
    pub rtx_payload_type: u8,
}

/// Capability the core requires from the underlying media transport
/// engine (SFU). ICE/DTLS negotiation and RTP routing live behind this
/// trait.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Register a track the producer started sending
    async fn publish_track(
        &self,
        room: &RoomId,
        producer: &UserId,
        kind: MediaKind,
        info: TrackInfo,
    ) -> Result<()>;

    /// Tear down a track the producer stopped sending
    async fn stop_track(&self, room: &RoomId, producer: &UserId, kind: MediaKind) -> Result<()>;

    /// Create a per-viewer consumer of a producer's track and return
    /// the transport identifiers assigned to it
    async fn create_consumer(
        &self,
        room: &RoomId,
        viewer: &UserId,
        producer: &UserId,
        kind: MediaKind,
    ) -> Result<ConsumerAllocation>;

    /// Ask the producer's video track for a fresh keyframe on behalf of
    /// a viewer. Returns whether the request was accepted.
    async fn request_keyframe(
        &self,
        room: &RoomId,
        producer: &UserId,
        viewer: &UserId,
    ) -> Result<bool>;
}

/// Best-effort outbound dispatch for one participant's connection.
///
/// A failed send must stay isolated to that participant; callers log
/// and move on.
pub trait UpdateSink: Send + Sync {
    /// Deliver a track update to this participant
    fn send_update(&self, update: TrackUpdate) -> anyhow::Result<()>;

    /// Deliver a media-sink-wants bitrate hint to this participant
    fn send_media_sink_wants(&self, any: u32) -> anyhow::Result<()>;

    /// Tell this participant that a peer disconnected
    fn send_client_disconnect(&self, user_id: &UserId) -> anyhow::Result<()>;
}

/// Opus is 111, H264 is 102 and its RTX companion 103, matching the
/// static payload-type assignment clients negotiate against.
const AUDIO_PAYLOAD_TYPE: u8 = 111;
const VIDEO_PAYLOAD_TYPE: u8 = 102;
const RTX_PAYLOAD_TYPE: u8 = 103;

/// In-process media engine that allocates consumer identifiers from an
/// atomic counter. Used by the server binary and tests; a deployment
/// bridging to a real SFU supplies its own [`MediaEngine`].
pub struct LocalMediaEngine {
    next_ssrc: AtomicU32,
}

impl LocalMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_ssrc: AtomicU32::new(10_000),
        }
    }

    fn allocate_ssrc(&self) -> u32 {
        self.next_ssrc.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LocalMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn publish_track(
        &self,
        room: &RoomId,
        producer: &UserId,
        kind: MediaKind,
        info: TrackInfo,
    ) -> Result<()> {
        debug!(
            room_id = %room,
            producer = %producer,
            kind = %kind,
            ssrc = info.ssrc,
            rtx_ssrc = info.rtx_ssrc,
            "Registered published track"
        );
        Ok(())
    }

    async fn stop_track(&self, room: &RoomId, producer: &UserId, kind: MediaKind) -> Result<()> {
        debug!(room_id = %room, producer = %producer, kind = %kind, "Stopped track");
        Ok(())
    }

    async fn create_consumer(
        &self,
        room: &RoomId,
        viewer: &UserId,
        producer: &UserId,
        kind: MediaKind,
    ) -> Result<ConsumerAllocation> {
        let allocation = match kind {
            MediaKind::Audio => ConsumerAllocation {
                ssrc: self.allocate_ssrc(),
                rtx_ssrc: 0,
                payload_type: AUDIO_PAYLOAD_TYPE,
                rtx_payload_type: 0,
            },
            MediaKind::Video => ConsumerAllocation {
                ssrc: self.allocate_ssrc(),
                rtx_ssrc: self.allocate_ssrc(),
                payload_type: VIDEO_PAYLOAD_TYPE,
                rtx_payload_type: RTX_PAYLOAD_TYPE,
            },
        };

        debug!(
            room_id = %room,
            viewer = %viewer,
            producer = %producer,
            kind = %kind,
            ssrc = allocation.ssrc,
            "Created consumer"
        );

        Ok(allocation)
    }

    async fn request_keyframe(
        &self,
        room: &RoomId,
        producer: &UserId,
        viewer: &UserId,
    ) -> Result<bool> {
        let _ = room;
        debug!(producer = %producer, viewer = %viewer, "Keyframe requested");
        Ok(true)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Engine(e.to_string())
    }
}

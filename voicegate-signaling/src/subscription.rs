//! Subscription edge management
//!
//! A subscription edge is keyed by (viewer, producer, kind) and holds
//! the consumer identifiers the media engine assigned when the edge was
//! created. Edges are created lazily and never deleted when a producer
//! merely stops producing; a stopped producer's edges are simply
//! excluded from the active queries until it resumes, so resubscription
//! after a restart costs nothing.

use crate::error::Result;
use crate::media::{ConsumerAllocation, MediaEngine};
use crate::participant::Participant;
use crate::types::{MediaKind, RoomId, UserId};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeKey {
    viewer: UserId,
    producer: UserId,
    kind: MediaKind,
}

/// SSRCs a viewer receives for one producer, 0 where no active edge
/// exists. Values are never synthesized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutgoingSsrcs {
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub rtx_ssrc: u32,
}

/// Payload types assigned to a viewer's consumers for one producer,
/// 0 where no edge exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutgoingCodecs {
    pub audio_pt: u8,
    pub video_pt: u8,
    pub rtx_pt: u8,
}

/// Per-room subscription edge map
pub struct SubscriptionManager {
    room_id: RoomId,
    edges: DashMap<EdgeKey, ConsumerAllocation>,

    /// Serializes check-then-create so two racing signaling messages
    /// cannot produce duplicate consumers for the same edge
    create_lock: Mutex<()>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            edges: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Subscribe a viewer to a producer's track.
    ///
    /// Idempotent: an existing edge is returned untouched, without a
    /// second engine call. Callers only invoke this when the producer
    /// is confirmed active for `kind`, so no dead consumers are created.
    pub async fn subscribe_to_track(
        &self,
        engine: &dyn MediaEngine,
        viewer: &UserId,
        producer: &UserId,
        kind: MediaKind,
    ) -> Result<ConsumerAllocation> {
        let key = EdgeKey {
            viewer: viewer.clone(),
            producer: producer.clone(),
            kind,
        };

        if let Some(existing) = self.edges.get(&key) {
            return Ok(*existing);
        }

        let _guard = self.create_lock.lock().await;
        // Re-check under the lock: another message may have created the
        // edge while we waited
        if let Some(existing) = self.edges.get(&key) {
            return Ok(*existing);
        }

        let allocation = engine
            .create_consumer(&self.room_id, viewer, producer, kind)
            .await?;
        self.edges.insert(key, allocation);

        info!(
            room_id = %self.room_id,
            viewer = %viewer,
            producer = %producer,
            kind = %kind,
            ssrc = allocation.ssrc,
            "Created subscription edge"
        );

        Ok(allocation)
    }

    #[must_use]
    pub fn is_subscribed_to_track(
        &self,
        viewer: &UserId,
        producer: &UserId,
        kind: MediaKind,
    ) -> bool {
        self.edges.contains_key(&EdgeKey {
            viewer: viewer.clone(),
            producer: producer.clone(),
            kind,
        })
    }

    fn edge(&self, viewer: &UserId, producer: &UserId, kind: MediaKind) -> Option<ConsumerAllocation> {
        self.edges
            .get(&EdgeKey {
                viewer: viewer.clone(),
                producer: producer.clone(),
                kind,
            })
            .map(|entry| *entry)
    }

    /// SSRCs the viewer receives from this producer. An edge whose
    /// producer is not currently producing that kind reports 0.
    #[must_use]
    pub fn outgoing_ssrcs_for(&self, viewer: &UserId, producer: &Participant) -> OutgoingSsrcs {
        let mut out = OutgoingSsrcs::default();

        if producer.is_producing(MediaKind::Audio) {
            if let Some(edge) = self.edge(viewer, &producer.user_id, MediaKind::Audio) {
                out.audio_ssrc = edge.ssrc;
            }
        }
        if producer.is_producing(MediaKind::Video) {
            if let Some(edge) = self.edge(viewer, &producer.user_id, MediaKind::Video) {
                out.video_ssrc = edge.ssrc;
                out.rtx_ssrc = edge.rtx_ssrc;
            }
        }

        out
    }

    /// Payload types assigned to the viewer's consumers for this
    /// producer, 0 where no edge exists
    #[must_use]
    pub fn outgoing_codecs_for(&self, viewer: &UserId, producer: &UserId) -> OutgoingCodecs {
        let mut out = OutgoingCodecs::default();

        if let Some(edge) = self.edge(viewer, producer, MediaKind::Audio) {
            out.audio_pt = edge.payload_type;
        }
        if let Some(edge) = self.edge(viewer, producer, MediaKind::Video) {
            out.video_pt = edge.payload_type;
            out.rtx_pt = edge.rtx_payload_type;
        }

        out
    }

    /// Drop every edge that references a participant who left, in
    /// either role
    pub fn remove_participant(&self, user_id: &UserId) {
        let before = self.edges.len();
        self.edges
            .retain(|key, _| key.viewer != *user_id && key.producer != *user_id);
        let removed = before - self.edges.len();
        if removed > 0 {
            debug!(
                room_id = %self.room_id,
                user_id = %user_id,
                removed,
                "Tore down subscription edges"
            );
        }
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

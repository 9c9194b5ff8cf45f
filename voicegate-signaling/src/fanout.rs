//! Producer-intent protocol and update fan-out
//!
//! Reconciles the three independently-timed event streams (transport
//! connectivity, producer intent, viewer readiness) into idempotent
//! track updates. A producer-state message stops unwanted tracks before
//! starting new ones, subscribes every peer to each wanted track, and
//! resends updates to already-subscribed peers: join-time
//! reconciliation creates edges without dispatching, so the resend is
//! what guarantees delivery.

use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use crate::media::MediaEngine;
use crate::participant::Participant;
use crate::registry::{Room, RoomRegistry};
use crate::types::{MediaKind, RoomId, RoomType, StreamEntry, TrackInfo, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bitrate hint sent back to a producer after its state message
const MEDIA_SINK_WANTS_ANY: u32 = 100;

/// A producer's declared production state, received over the control
/// channel. An SSRC of 0 means the kind is not wanted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerState {
    #[serde(default)]
    pub audio_ssrc: u32,
    #[serde(default)]
    pub video_ssrc: u32,
    #[serde(default)]
    pub rtx_ssrc: u32,
    #[serde(default)]
    pub streams: Vec<StreamEntry>,
}

/// Per-recipient update payload describing what a viewer receives from
/// one producer. Absent identifiers are 0, never fabricated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackUpdate {
    pub user_id: UserId,
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub rtx_ssrc: u32,
    pub audio_pt: u8,
    pub video_pt: u8,
    pub rtx_pt: u8,
    pub streams: Vec<StreamEntry>,
}

/// Computes and dispatches signaling updates on every state change
pub struct UpdateFanout {
    registry: Arc<RoomRegistry>,
    engine: Arc<dyn MediaEngine>,
    config: SignalingConfig,
}

impl UpdateFanout {
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        engine: Arc<dyn MediaEngine>,
        config: SignalingConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Handle a producer's state-change message.
    ///
    /// Messages arriving before the transport is ready wait up to the
    /// readiness timeout when they carry audio intent; otherwise they
    /// are discarded silently.
    pub async fn handle_producer_state(
        &self,
        room_id: &RoomId,
        producer_id: &UserId,
        state: ProducerState,
    ) -> Result<()> {
        let room = self.registry.get_room(room_id)?;
        let Some(producer) = room.get_participant(producer_id).await else {
            return Err(Error::ParticipantNotFound(producer_id.to_string()));
        };

        // Serialize this producer's messages: a new state must
        // supersede, not race, the fan-out of the previous one
        let _guard = producer.lock_state().await;

        let declared_stream = state.streams.iter().find(|s| s.active).cloned();

        let wants_audio = state.audio_ssrc != 0;
        let mut wants_video = state.video_ssrc != 0 && declared_stream.is_some();

        // Stream rooms: only the designated owner publishes video
        if wants_video && !room.may_publish_video(producer_id) {
            debug!(
                room_id = %room_id,
                user_id = %producer_id,
                "Ignoring video intent from non-owner in stream room"
            );
            wants_video = false;
        }

        // Connection-readiness gate: audio intent waits out the race
        // between the readiness notification and a timer; video intent
        // without readiness is dropped immediately
        if !producer.is_transport_ready() {
            if wants_audio {
                if let Err(e) = producer
                    .wait_transport_ready(self.config.readiness_timeout())
                    .await
                {
                    debug!(
                        room_id = %room_id,
                        user_id = %producer_id,
                        error = %e,
                        "Discarding producer state: transport never became ready"
                    );
                    return Ok(());
                }
            } else {
                debug!(
                    room_id = %room_id,
                    user_id = %producer_id,
                    "Dropping producer state before transport ready"
                );
                return Ok(());
            }
        }

        if let Err(e) = producer.sink().send_media_sink_wants(MEDIA_SINK_WANTS_ANY) {
            debug!(user_id = %producer_id, error = %e, "Failed to send media sink wants");
        }

        // Stop unwanted kinds before starting new ones so no moment
        // exists where both old and new tracks are valid
        if !wants_audio && producer.is_producing(MediaKind::Audio) {
            self.stop_track(&room, &producer, MediaKind::Audio).await;
        }
        if !wants_video && producer.is_producing(MediaKind::Video) {
            self.stop_track(&room, &producer, MediaKind::Video).await;
        }

        let mut needs_update: HashMap<UserId, Arc<Participant>> = HashMap::new();

        if wants_audio {
            self.start_and_subscribe_peers(
                &room,
                &producer,
                MediaKind::Audio,
                TrackInfo::audio(state.audio_ssrc),
                &mut needs_update,
            )
            .await?;
        }

        if wants_video {
            if let Some(stream) = declared_stream {
                // Clients send "screen" when going live but expect
                // "video" back
                let mut meta = stream;
                meta.kind = "video".to_string();
                producer.set_video_stream_meta(meta);
            }
            self.start_and_subscribe_peers(
                &room,
                &producer,
                MediaKind::Video,
                TrackInfo::video(state.video_ssrc, state.rtx_ssrc),
                &mut needs_update,
            )
            .await?;
        }

        // When everything was stopped, prior viewers still need to see
        // the tracks go inactive
        if !wants_audio && !wants_video {
            for peer in room.peers_of(producer_id).await {
                if room
                    .subscriptions
                    .is_subscribed_to_track(&peer.user_id, producer_id, MediaKind::Audio)
                    || room.subscriptions.is_subscribed_to_track(
                        &peer.user_id,
                        producer_id,
                        MediaKind::Video,
                    )
                {
                    needs_update.insert(peer.user_id.clone(), peer);
                }
            }
        }

        self.dispatch_updates(&room, &producer, needs_update.into_values());
        Ok(())
    }

    /// Join-time reconciliation: when a participant's transport becomes
    /// ready, subscribe it to every already-producing peer and tell it
    /// what it now receives. A late joiner discovers all producers
    /// without waiting for them to re-signal.
    pub async fn handle_transport_ready(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let room = self.registry.get_room(room_id)?;
        let Some(viewer) = room.get_participant(user_id).await else {
            return Err(Error::ParticipantNotFound(user_id.to_string()));
        };

        viewer.mark_transport_ready();
        let _guard = viewer.lock_state().await;

        for peer in room.peers_of(user_id).await {
            let mut subscribed_any = false;

            for kind in MediaKind::ALL {
                if !peer.is_producing(kind) {
                    continue;
                }
                subscribed_any = true;
                if room
                    .subscriptions
                    .is_subscribed_to_track(user_id, &peer.user_id, kind)
                {
                    continue;
                }
                if let Err(e) = room
                    .subscriptions
                    .subscribe_to_track(self.engine.as_ref(), user_id, &peer.user_id, kind)
                    .await
                {
                    warn!(
                        room_id = %room_id,
                        viewer = %user_id,
                        producer = %peer.user_id,
                        kind = %kind,
                        error = %e,
                        "Failed to subscribe during reconciliation"
                    );
                }
            }

            if !subscribed_any {
                continue;
            }

            // Same gate and payload as a producer-triggered fan-out,
            // addressed to the joiner
            if let Some(update) = build_track_update(&room, &viewer.user_id, &peer) {
                if let Err(e) = viewer.sink().send_update(update) {
                    warn!(
                        room_id = %room_id,
                        viewer = %user_id,
                        producer = %peer.user_id,
                        error = %e,
                        "Failed to dispatch reconciliation update"
                    );
                }
            }
        }

        Ok(())
    }

    /// Tear down a leaver's room state and tell its peers
    pub async fn handle_disconnect(&self, room_id: &RoomId, user_id: &UserId) {
        let peers = match self.registry.get_room(room_id) {
            Ok(room) => room.peers_of(user_id).await,
            Err(_) => Vec::new(),
        };

        if self.registry.leave(room_id, user_id).await.is_none() {
            return;
        }

        for peer in peers {
            if let Err(e) = peer.sink().send_client_disconnect(user_id) {
                debug!(
                    room_id = %room_id,
                    peer = %peer.user_id,
                    error = %e,
                    "Failed to notify peer of disconnect"
                );
            }
        }
    }

    async fn stop_track(&self, room: &Arc<Room>, producer: &Arc<Participant>, kind: MediaKind) {
        producer.stop_publishing_track(kind);
        if let Err(e) = self
            .engine
            .stop_track(&room.id, &producer.user_id, kind)
            .await
        {
            warn!(
                room_id = %room.id,
                user_id = %producer.user_id,
                kind = %kind,
                error = %e,
                "Media engine failed to stop track"
            );
        }
    }

    /// Start (or re-affirm) a produced track and make sure every peer
    /// in the room consumes it. Peers that were already subscribed are
    /// still collected: the resend is idempotent and guarantees
    /// delivery after reconnection or metadata changes.
    async fn start_and_subscribe_peers(
        &self,
        room: &Arc<Room>,
        producer: &Arc<Participant>,
        kind: MediaKind,
        info: TrackInfo,
        needs_update: &mut HashMap<UserId, Arc<Participant>>,
    ) -> Result<()> {
        if producer.publish_track(kind, info)? {
            if let Err(e) = self
                .engine
                .publish_track(&room.id, &producer.user_id, kind, info)
                .await
            {
                warn!(
                    room_id = %room.id,
                    user_id = %producer.user_id,
                    kind = %kind,
                    error = %e,
                    "Media engine failed to publish track"
                );
            }
        }

        for peer in room.peers_of(&producer.user_id).await {
            if !room
                .subscriptions
                .is_subscribed_to_track(&peer.user_id, &producer.user_id, kind)
            {
                if let Err(e) = room
                    .subscriptions
                    .subscribe_to_track(self.engine.as_ref(), &peer.user_id, &producer.user_id, kind)
                    .await
                {
                    // One failed consumer must not starve the rest of
                    // the room
                    warn!(
                        room_id = %room.id,
                        viewer = %peer.user_id,
                        producer = %producer.user_id,
                        kind = %kind,
                        error = %e,
                        "Failed to create subscription"
                    );
                    continue;
                }
            }
            needs_update.insert(peer.user_id.clone(), peer);
        }

        Ok(())
    }

    /// Build and dispatch one update per recipient, best-effort; a
    /// failed send never blocks sibling dispatches
    fn dispatch_updates(
        &self,
        room: &Arc<Room>,
        producer: &Arc<Participant>,
        recipients: impl Iterator<Item = Arc<Participant>>,
    ) {
        let mut sent = 0usize;
        for recipient in recipients {
            let Some(update) = build_track_update(room, &recipient.user_id, producer) else {
                continue;
            };
            match recipient.sink().send_update(update) {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    room_id = %room.id,
                    recipient = %recipient.user_id,
                    producer = %producer.user_id,
                    error = %e,
                    "Failed to dispatch track update"
                ),
            }
        }
        if sent > 0 {
            info!(
                room_id = %room.id,
                producer = %producer.user_id,
                sent,
                "Dispatched track updates"
            );
        }
    }
}

/// Resolve what `viewer` receives from `producer` into an update
/// payload. Returns None when the update is suppressed: a stream-room
/// viewer without a resolved video SSRC would set its remote
/// description without video and render black, so it gets nothing
/// instead of an incomplete update.
#[must_use]
pub fn build_track_update(
    room: &Room,
    viewer: &UserId,
    producer: &Participant,
) -> Option<TrackUpdate> {
    let ssrcs = room.subscriptions.outgoing_ssrcs_for(viewer, producer);
    let codecs = room
        .subscriptions
        .outgoing_codecs_for(viewer, &producer.user_id);

    if room.room_type == RoomType::Stream && ssrcs.video_ssrc == 0 {
        debug!(
            room_id = %room.id,
            viewer = %viewer,
            producer = %producer.user_id,
            "Suppressing update to stream viewer without video SSRC"
        );
        return None;
    }

    let stream = producer.video_stream_meta().map_or_else(
        || {
            StreamEntry::fallback(
                ssrcs.video_ssrc,
                ssrcs.rtx_ssrc,
                producer.is_producing(MediaKind::Video),
            )
        },
        |mut meta| {
            meta.kind = "video".to_string();
            meta.ssrc = ssrcs.video_ssrc;
            meta.rtx_ssrc = ssrcs.rtx_ssrc;
            meta
        },
    );

    Some(TrackUpdate {
        user_id: producer.user_id.clone(),
        audio_ssrc: ssrcs.audio_ssrc,
        video_ssrc: ssrcs.video_ssrc,
        rtx_ssrc: ssrcs.rtx_ssrc,
        audio_pt: codecs.audio_pt,
        video_pt: codecs.video_pt,
        rtx_pt: codecs.rtx_pt,
        streams: vec![stream],
    })
}

//! Participant handles
//!
//! A [`Participant`] represents one connected signaling client: its
//! transport readiness, the tracks it is currently producing and the
//! sink its updates are dispatched through. Track state sits behind a
//! short-critical-section `parking_lot` lock; the readiness flag is a
//! `tokio::sync::watch` channel so the connection-readiness gate can
//! race a readiness notification against a timer.

use crate::error::{Error, Result};
use crate::media::UpdateSink;
use crate::types::{MediaKind, RoomId, RoomType, StreamEntry, TrackInfo, UserId};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::debug;

#[derive(Debug, Default)]
struct ProducingState {
    audio: Option<TrackInfo>,
    video: Option<TrackInfo>,
    video_stream_meta: Option<StreamEntry>,
}

impl ProducingState {
    fn slot(&mut self, kind: MediaKind) -> &mut Option<TrackInfo> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    const fn get(&self, kind: MediaKind) -> Option<TrackInfo> {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

/// One connected signaling client
pub struct Participant {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub room_type: RoomType,

    /// Flips to true once ICE/DTLS negotiation finishes; never flips back
    ready_tx: watch::Sender<bool>,

    producing: RwLock<ProducingState>,

    /// Serializes this participant's producer-state handling so a new
    /// message supersedes, rather than races, the fan-out triggered by
    /// the previous one
    state_lock: Mutex<()>,

    sink: Arc<dyn UpdateSink>,
}

impl Participant {
    #[must_use]
    pub fn new(
        user_id: UserId,
        room_id: RoomId,
        room_type: RoomType,
        sink: Arc<dyn UpdateSink>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            user_id,
            room_id,
            room_type,
            ready_tx,
            producing: RwLock::new(ProducingState::default()),
            state_lock: Mutex::new(()),
            sink,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn UpdateSink> {
        &self.sink
    }

    /// Acquire this participant's message-ordering lock
    pub async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.state_lock.lock().await
    }

    #[must_use]
    pub fn is_transport_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Mark the underlying media transport as connected, waking any
    /// message suspended on the readiness gate
    pub fn mark_transport_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    /// Wait until the transport becomes ready, bounded by `timeout`.
    ///
    /// The race between the readiness notification and the timer
    /// resolves to whichever happens first; on timeout the caller
    /// discards its message.
    pub async fn wait_transport_ready(&self, timeout: Duration) -> Result<()> {
        if self.is_transport_ready() {
            return Ok(());
        }
        let mut rx = self.ready_tx.subscribe();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::NotReady(self.user_id.to_string())),
            Err(_) => Err(Error::Timeout(format!(
                "transport for {} not ready within {timeout:?}",
                self.user_id
            ))),
        };
        result
    }

    /// Start (or restart) producing a track.
    ///
    /// Idempotent: returns false without touching state when the same
    /// identifiers are already active. Returns true when the kind was
    /// newly started or its identifiers were replaced.
    pub fn publish_track(&self, kind: MediaKind, info: TrackInfo) -> Result<bool> {
        if !self.is_transport_ready() {
            return Err(Error::NotReady(self.user_id.to_string()));
        }

        let mut producing = self.producing.write();
        let slot = producing.slot(kind);
        if *slot == Some(info) {
            return Ok(false);
        }

        debug!(
            user_id = %self.user_id,
            kind = %kind,
            ssrc = info.ssrc,
            rtx_ssrc = info.rtx_ssrc,
            "Publishing track"
        );
        *slot = Some(info);
        Ok(true)
    }

    /// Stop producing a track. Idempotent: returns false when the kind
    /// was not being produced.
    pub fn stop_publishing_track(&self, kind: MediaKind) -> bool {
        let mut producing = self.producing.write();
        if producing.slot(kind).take().is_none() {
            return false;
        }
        if kind == MediaKind::Video {
            if let Some(meta) = producing.video_stream_meta.as_mut() {
                meta.active = false;
            }
        }
        debug!(user_id = %self.user_id, kind = %kind, "Stopped publishing track");
        true
    }

    #[must_use]
    pub fn is_producing(&self, kind: MediaKind) -> bool {
        self.producing.read().get(kind).is_some()
    }

    #[must_use]
    pub fn track_info(&self, kind: MediaKind) -> Option<TrackInfo> {
        self.producing.read().get(kind)
    }

    #[must_use]
    pub fn video_stream_meta(&self) -> Option<StreamEntry> {
        self.producing.read().video_stream_meta.clone()
    }

    pub fn set_video_stream_meta(&self, meta: StreamEntry) {
        self.producing.write().video_stream_meta = Some(meta);
    }
}

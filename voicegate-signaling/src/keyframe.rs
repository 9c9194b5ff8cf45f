//! Keyframe coordination
//!
//! When a stream viewer's connection finishes SDP negotiation it sends
//! a viewer-ready signal; a fresh keyframe is then requested from the
//! named producer so the viewer can start decoding.

use crate::error::Result;
use crate::media::MediaEngine;
use crate::types::{RoomId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

pub struct KeyframeCoordinator {
    engine: Arc<dyn MediaEngine>,
}

impl KeyframeCoordinator {
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// Handle a viewer-ready signal. A missing producer reference drops
    /// the message; an engine failure is non-fatal to the session.
    pub async fn on_viewer_ready(
        &self,
        room_id: &RoomId,
        viewer: &UserId,
        producer: Option<UserId>,
    ) -> Result<()> {
        let Some(producer) = producer else {
            warn!(room_id = %room_id, viewer = %viewer, "Viewer ready without producer user_id");
            return Ok(());
        };

        match self
            .engine
            .request_keyframe(room_id, &producer, viewer)
            .await
        {
            Ok(true) => {
                info!(room_id = %room_id, viewer = %viewer, producer = %producer, "Keyframe requested");
            }
            Ok(false) => {
                warn!(room_id = %room_id, viewer = %viewer, producer = %producer, "Keyframe request refused");
            }
            Err(e) => {
                warn!(
                    room_id = %room_id,
                    viewer = %viewer,
                    producer = %producer,
                    error = %e,
                    "Keyframe request failed"
                );
            }
        }

        Ok(())
    }
}

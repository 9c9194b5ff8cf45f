//! Room registry
//!
//! Rooms are created on first join and destroyed when the last
//! participant leaves. The registry owns room lifetime; everything else
//! receives rooms by handle.

use crate::config::SignalingConfig;
use crate::error::{Error, Result};
use crate::participant::Participant;
use crate::subscription::SubscriptionManager;
use crate::types::{RoomId, RoomType, UserId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A live voice/stream room and its connected participants
pub struct Room {
    pub id: RoomId,
    pub room_type: RoomType,
    /// Designated publisher for `Stream` rooms; only this user may
    /// publish video there
    pub stream_owner: Option<UserId>,
    participants: RwLock<HashMap<UserId, Arc<Participant>>>,
    pub subscriptions: SubscriptionManager,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("room_type", &self.room_type)
            .field("stream_owner", &self.stream_owner)
            .finish_non_exhaustive()
    }
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId, room_type: RoomType, stream_owner: Option<UserId>) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(id.clone()),
            id,
            room_type,
            stream_owner,
            participants: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_participant(&self, participant: Arc<Participant>) {
        self.participants
            .write()
            .await
            .insert(participant.user_id.clone(), participant);
    }

    pub async fn remove_participant(&self, user_id: &UserId) -> Option<Arc<Participant>> {
        let removed = self.participants.write().await.remove(user_id);
        if removed.is_some() {
            self.subscriptions.remove_participant(user_id);
        }
        removed
    }

    pub async fn get_participant(&self, user_id: &UserId) -> Option<Arc<Participant>> {
        self.participants.read().await.get(user_id).cloned()
    }

    /// Snapshot of every connected participant
    pub async fn participants(&self) -> Vec<Arc<Participant>> {
        self.participants.read().await.values().cloned().collect()
    }

    /// Snapshot of every participant except `user_id`
    pub async fn peers_of(&self, user_id: &UserId) -> Vec<Arc<Participant>> {
        self.participants
            .read()
            .await
            .values()
            .filter(|p| p.user_id != *user_id)
            .cloned()
            .collect()
    }

    pub async fn participant_count(&self) -> usize {
        self.participants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.participants.read().await.is_empty()
    }

    /// Whether this user may publish video into this room
    #[must_use]
    pub fn may_publish_video(&self, user_id: &UserId) -> bool {
        match self.room_type {
            RoomType::Stream => self.stream_owner.as_ref() == Some(user_id),
            RoomType::Call | RoomType::GuildVoice => true,
        }
    }
}

/// Maps room identifiers to live rooms
pub struct RoomRegistry {
    config: SignalingConfig,
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            rooms: DashMap::new(),
        }
    }

    /// Get an existing room, or create it with the given type and
    /// stream owner. A type declared by a later joiner that differs
    /// from the live room's is ignored with a warning.
    pub fn get_or_create_room(
        &self,
        room_id: &RoomId,
        room_type: RoomType,
        stream_owner: Option<UserId>,
    ) -> Result<Arc<Room>> {
        if let Some(room) = self.rooms.get(room_id) {
            if room.room_type != room_type {
                warn!(
                    room_id = %room_id,
                    live_type = ?room.room_type,
                    declared_type = ?room_type,
                    "Joiner declared a different room type; keeping the live one"
                );
            }
            return Ok(Arc::clone(room.value()));
        }

        if self.config.max_rooms > 0 && self.rooms.len() >= self.config.max_rooms {
            return Err(Error::LimitExceeded(format!(
                "room limit of {} reached",
                self.config.max_rooms
            )));
        }

        let room = Arc::new(Room::new(room_id.clone(), room_type, stream_owner));
        self.rooms.insert(room_id.clone(), Arc::clone(&room));
        info!(room_id = %room_id, room_type = ?room_type, "Created room");
        Ok(room)
    }

    pub fn get_room(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        self.rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))
    }

    /// Join a participant to a room, creating the room on first join
    pub async fn join(
        &self,
        room_id: &RoomId,
        room_type: RoomType,
        stream_owner: Option<UserId>,
        participant: Arc<Participant>,
    ) -> Result<Arc<Room>> {
        let room = self.get_or_create_room(room_id, room_type, stream_owner)?;

        let count = room.participant_count().await;
        if self.config.max_participants_per_room > 0
            && count >= self.config.max_participants_per_room
        {
            // A room created by this join attempt must not linger empty
            if count == 0 {
                self.rooms.remove(room_id);
            }
            return Err(Error::LimitExceeded(format!(
                "participant limit of {} reached for room {room_id}",
                self.config.max_participants_per_room
            )));
        }

        info!(
            room_id = %room_id,
            user_id = %participant.user_id,
            participant_count = count + 1,
            "Participant joined"
        );
        room.add_participant(participant).await;
        Ok(room)
    }

    /// Remove a participant; the room is destroyed when it empties
    pub async fn leave(&self, room_id: &RoomId, user_id: &UserId) -> Option<Arc<Participant>> {
        let room = self.rooms.get(room_id).map(|e| Arc::clone(e.value()))?;
        let removed = room.remove_participant(user_id).await;

        if removed.is_some() {
            info!(room_id = %room_id, user_id = %user_id, "Participant left");
            if room.is_empty().await {
                self.rooms.remove(room_id);
                debug!(room_id = %room_id, "Removed empty room");
            }
        }

        removed
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }
}

//! Signaling envelope
//!
//! Every control message is an `{op, d}` envelope. Opcode values are
//! part of the wire contract and must stay stable across client and
//! server. Op 12 is used in both directions: clients send their
//! producer state on it, the server fans track updates out on it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use voicegate_signaling::{ProducerState, TrackUpdate, UserId};

/// Control-channel opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    /// C→S keep-alive
    Heartbeat = 1,
    /// S→C, carries the heartbeat interval
    Hello = 10,
    /// S→C keep-alive reply
    HeartbeatAck = 11,
    /// C→S producer state / S→C track update
    Video = 12,
    /// S→C bitrate hint
    MediaSinkWants = 13,
    /// S→C peer-left notification
    ClientDisconnect = 14,
    /// C→S viewer ready to decode
    ViewerReady = 15,
}

impl OpCode {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for OpCode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Self::Heartbeat),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            12 => Ok(Self::Video),
            13 => Ok(Self::MediaSinkWants),
            14 => Ok(Self::ClientDisconnect),
            15 => Ok(Self::ViewerReady),
            other => Err(Error::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerReadyPayload {
    /// The producer whose video the viewer is ready to decode
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSinkWantsPayload {
    pub any: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnectPayload {
    pub user_id: UserId,
}

/// Messages the core consumes from clients
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Heartbeat,
    ProducerState(ProducerState),
    ViewerReady(ViewerReadyPayload),
}

/// Messages the core produces for clients
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello(HelloPayload),
    HeartbeatAck,
    TrackUpdate(TrackUpdate),
    MediaSinkWants(MediaSinkWantsPayload),
    ClientDisconnect(ClientDisconnectPayload),
}

impl ServerMessage {
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::Hello(_) => OpCode::Hello,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
            Self::TrackUpdate(_) => OpCode::Video,
            Self::MediaSinkWants(_) => OpCode::MediaSinkWants,
            Self::ClientDisconnect(_) => OpCode::ClientDisconnect,
        }
    }
}

impl ClientMessage {
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::Heartbeat => OpCode::Heartbeat,
            Self::ProducerState(_) => OpCode::Video,
            Self::ViewerReady(_) => OpCode::ViewerReady,
        }
    }
}

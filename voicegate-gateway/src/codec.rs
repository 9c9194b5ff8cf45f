//! Wire codecs
//!
//! The encoding is negotiated once per connection from the
//! `?encoding=` query parameter and is purely a serialization concern:
//! both encodings carry the identical logical `{op, d}` envelope.
//!
//! - **Text**: JSON, `{"op": N, "d": {...}}`.
//! - **Binary**: big-endian u16 opcode prefix followed by the
//!   bincode-encoded payload; payload-less ops are just the prefix.

use crate::envelope::{ClientMessage, OpCode, ServerMessage, ViewerReadyPayload};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use voicegate_signaling::ProducerState;

/// Protocol versions this gateway speaks
pub const SUPPORTED_VERSIONS: [u8; 1] = [1];

/// Per-connection wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    #[default]
    Text,
    Binary,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    op: u16,
    #[serde(default)]
    d: Option<Value>,
}

impl WireEncoding {
    /// Parse the negotiated encoding from the handshake query value
    pub fn from_query(value: Option<&str>) -> Result<Self> {
        match value {
            None | Some("text") | Some("json") => Ok(Self::Text),
            Some("binary") => Ok(Self::Binary),
            Some(other) => Err(Error::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Whether frames travel as websocket text or binary messages
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }

    pub fn encode(self, message: &ServerMessage) -> Result<Vec<u8>> {
        match self {
            Self::Text => encode_text(message),
            Self::Binary => encode_binary(message),
        }
    }

    pub fn decode(self, frame: &[u8]) -> Result<ClientMessage> {
        match self {
            Self::Text => decode_text(frame),
            Self::Binary => decode_binary(frame),
        }
    }
}

fn to_json<T: Serialize>(op: OpCode, payload: Option<&T>) -> Result<Vec<u8>> {
    let d = match payload {
        Some(p) => Some(serde_json::to_value(p).map_err(|e| Error::Encode(e.to_string()))?),
        None => None,
    };
    serde_json::to_vec(&RawEnvelope {
        op: op.as_u16(),
        d,
    })
    .map_err(|e| Error::Encode(e.to_string()))
}

fn encode_text(message: &ServerMessage) -> Result<Vec<u8>> {
    match message {
        ServerMessage::Hello(p) => to_json(OpCode::Hello, Some(p)),
        ServerMessage::HeartbeatAck => to_json::<()>(OpCode::HeartbeatAck, None),
        ServerMessage::TrackUpdate(p) => to_json(OpCode::Video, Some(p)),
        ServerMessage::MediaSinkWants(p) => to_json(OpCode::MediaSinkWants, Some(p)),
        ServerMessage::ClientDisconnect(p) => to_json(OpCode::ClientDisconnect, Some(p)),
    }
}

fn decode_text(frame: &[u8]) -> Result<ClientMessage> {
    let raw: RawEnvelope =
        serde_json::from_slice(frame).map_err(|e| Error::Decode(e.to_string()))?;
    let op = OpCode::try_from(raw.op)?;
    let d = raw.d.unwrap_or(Value::Null);

    fn payload<T: DeserializeOwned>(d: Value) -> Result<T> {
        serde_json::from_value(d).map_err(|e| Error::Decode(e.to_string()))
    }

    match op {
        OpCode::Heartbeat => Ok(ClientMessage::Heartbeat),
        OpCode::Video => Ok(ClientMessage::ProducerState(payload::<ProducerState>(d)?)),
        OpCode::ViewerReady => Ok(ClientMessage::ViewerReady(payload::<ViewerReadyPayload>(d)?)),
        // Server-to-client ops arriving inbound are malformed traffic
        OpCode::Hello | OpCode::HeartbeatAck | OpCode::MediaSinkWants | OpCode::ClientDisconnect => {
            Err(Error::Decode(format!("inbound frame with outbound op {}", raw.op)))
        }
    }
}

fn binary_frame<T: Serialize>(op: OpCode, payload: Option<&T>) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(64);
    frame
        .write_u16::<BigEndian>(op.as_u16())
        .map_err(|e| Error::Encode(e.to_string()))?;
    if let Some(p) = payload {
        let bytes = bincode::serialize(p).map_err(|e| Error::Encode(e.to_string()))?;
        frame.extend_from_slice(&bytes);
    }
    Ok(frame)
}

fn encode_binary(message: &ServerMessage) -> Result<Vec<u8>> {
    match message {
        ServerMessage::Hello(p) => binary_frame(OpCode::Hello, Some(p)),
        ServerMessage::HeartbeatAck => binary_frame::<()>(OpCode::HeartbeatAck, None),
        ServerMessage::TrackUpdate(p) => binary_frame(OpCode::Video, Some(p)),
        ServerMessage::MediaSinkWants(p) => binary_frame(OpCode::MediaSinkWants, Some(p)),
        ServerMessage::ClientDisconnect(p) => binary_frame(OpCode::ClientDisconnect, Some(p)),
    }
}

fn decode_binary(frame: &[u8]) -> Result<ClientMessage> {
    if frame.len() < 2 {
        return Err(Error::Truncated);
    }
    let op = OpCode::try_from(BigEndian::read_u16(&frame[..2]))?;
    let payload = &frame[2..];

    match op {
        OpCode::Heartbeat => Ok(ClientMessage::Heartbeat),
        OpCode::Video => bincode::deserialize::<ProducerState>(payload)
            .map(ClientMessage::ProducerState)
            .map_err(|e| Error::Decode(e.to_string())),
        OpCode::ViewerReady => bincode::deserialize::<ViewerReadyPayload>(payload)
            .map(ClientMessage::ViewerReady)
            .map_err(|e| Error::Decode(e.to_string())),
        OpCode::Hello | OpCode::HeartbeatAck | OpCode::MediaSinkWants | OpCode::ClientDisconnect => {
            Err(Error::Decode(format!(
                "inbound frame with outbound op {}",
                op.as_u16()
            )))
        }
    }
}

/// Encode a client message, used by tests and by client-side tooling
pub fn encode_client(encoding: WireEncoding, message: &ClientMessage) -> Result<Vec<u8>> {
    match encoding {
        WireEncoding::Text => match message {
            ClientMessage::Heartbeat => to_json::<()>(OpCode::Heartbeat, None),
            ClientMessage::ProducerState(p) => to_json(OpCode::Video, Some(p)),
            ClientMessage::ViewerReady(p) => to_json(OpCode::ViewerReady, Some(p)),
        },
        WireEncoding::Binary => match message {
            ClientMessage::Heartbeat => binary_frame::<()>(OpCode::Heartbeat, None),
            ClientMessage::ProducerState(p) => binary_frame(OpCode::Video, Some(p)),
            ClientMessage::ViewerReady(p) => binary_frame(OpCode::ViewerReady, Some(p)),
        },
    }
}

//! Voicegate gateway
//!
//! WebSocket transport for the signaling core: the `{op, d}` control
//! envelope, text and binary codecs, and the per-connection actor that
//! bridges frames to [`voicegate_signaling::UpdateFanout`].

pub mod codec;
pub mod connection;
pub mod envelope;
pub mod error;

pub use codec::{WireEncoding, SUPPORTED_VERSIONS};
pub use connection::{voice_handler, ConnectQuery, ConnectionSink, GatewayState};
pub use envelope::{
    ClientDisconnectPayload, ClientMessage, HelloPayload, MediaSinkWantsPayload, OpCode,
    ServerMessage, ViewerReadyPayload,
};
pub use error::{Error, Result};

//! Error types for the signaling core

use thiserror::Error;

/// Signaling error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Transport not ready: {0}")]
    NotReady(String),

    #[error("Missing producer reference")]
    MissingProducer,

    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type for signaling operations
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the gateway

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Frame too short")]
    Truncated,
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

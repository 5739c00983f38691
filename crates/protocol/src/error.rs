//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed or unencodable frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a frame.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a frame.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The frame was valid JSON but not a message this protocol understands.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            ProtocolError::InvalidMessage(err.to_string())
        } else if err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

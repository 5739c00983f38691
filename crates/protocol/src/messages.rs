//! Terminal frames exchanged over an attached client channel.
//!
//! Every frame is a single JSON text message tagged by a `type` field.
//! Older terminal clients send bare keystrokes instead of tagged messages, so
//! [`ClientMessage::from_frame`] treats anything it cannot parse as input.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Frames sent by a terminal client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Keystrokes to write verbatim to the remote shell.
    Input {
        /// Raw terminal input, escape sequences included.
        data: String,
    },
    /// New terminal geometry.
    Resize {
        /// Terminal width in columns.
        cols: u16,
        /// Terminal height in rows.
        rows: u16,
    },
}

impl ClientMessage {
    /// Parse a text frame strictly as a tagged message.
    pub fn parse(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Interpret a text frame, falling back to raw input.
    ///
    /// Frames that are not a well-formed tagged message are forwarded to the
    /// shell unchanged.
    pub fn from_frame(frame: &str) -> Self {
        match Self::parse(frame) {
            Ok(message) => message,
            Err(_) => ClientMessage::Input {
                data: frame.to_string(),
            },
        }
    }
}

/// Frames sent by the daemon to an attached terminal client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Decoded remote shell output.
    Output {
        /// Terminal output text.
        data: String,
    },
    /// A failure the client should display.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Build an output frame.
    pub fn output(data: impl Into<String>) -> Self {
        ServerMessage::Output { data: data.into() }
    }

    /// Build an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Encode the frame as JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns true for error frames.
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }
}

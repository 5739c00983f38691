//! # rigterm Protocol Library
//!
//! Message definitions shared by the rigterm daemon, its CLI, and browser
//! terminal clients.
//!
//! ## Overview
//!
//! Two families of messages live here:
//!
//! - **Terminal frames** ([`messages`]): the JSON text frames exchanged over an
//!   attached WebSocket. Clients send [`ClientMessage`]s (keystrokes and
//!   resizes), the daemon answers with [`ServerMessage`]s (shell output and
//!   error notices).
//! - **Control-plane shapes** ([`control`]): request and response bodies for
//!   creating, closing, and listing remote shell sessions.
//!
//! ## Wire Format
//!
//! ```text
//! client → daemon   {"type":"input","data":"ls -la\n"}
//!                   {"type":"resize","cols":80,"rows":24}
//!                   ls -la            (legacy raw text, treated as input)
//!
//! daemon → client   {"type":"output","data":"total 48\r\n..."}
//!                   {"type":"error","message":"session not found: ..."}
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ServerMessage};
//!
//! let message = ClientMessage::from_frame(r#"{"type":"resize","cols":80,"rows":24}"#);
//! assert_eq!(message, ClientMessage::Resize { cols: 80, rows: 24 });
//!
//! // Anything that is not a tagged message is keyboard input.
//! let message = ClientMessage::from_frame("uptime\n");
//! assert_eq!(message, ClientMessage::Input { data: "uptime\n".to_string() });
//!
//! let json = ServerMessage::output("hello\r\n").to_json().unwrap();
//! assert_eq!(json, r#"{"type":"output","data":"hello\r\n"}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Terminal frames exchanged over an attachment
//! - [`control`]: Session control-plane requests and responses
//! - [`error`]: Error types

pub mod control;
pub mod error;
pub mod messages;

pub use control::{
    CloseSessionRequest, CreateSessionRequest, SessionClosed, SessionCreated, SessionListing,
    SessionStatus, SessionSummary, SESSION_KIND_INTERACTIVE,
};
pub use error::{ProtocolError, Result};
pub use messages::{ClientMessage, ServerMessage};

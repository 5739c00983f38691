//! IPC message types for CLI-daemon communication.

use protocol::{CreateSessionRequest, SessionClosed, SessionCreated, SessionListing};
use serde::{Deserialize, Serialize};

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Request the daemon to stop gracefully.
    Stop,
    /// Open a new interactive session.
    CreateSession(CreateSessionRequest),
    /// Close a session by ID.
    CloseSession {
        /// The session to close.
        session_id: String,
    },
    /// List all registered sessions.
    ListSessions,
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the daemon is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of registered sessions.
        session_count: usize,
        /// Address the WebSocket gateway listens on.
        listen_addr: String,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// A session was opened.
    SessionCreated(SessionCreated),
    /// A session was closed.
    SessionClosed(SessionClosed),
    /// Registered sessions.
    Sessions(SessionListing),
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

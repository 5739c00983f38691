//! Control-plane request and response bodies for remote shell sessions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Value of the `type` field on every created session.
pub const SESSION_KIND_INTERACTIVE: &str = "interactive";

/// Lifecycle status of a remote shell session.
///
/// Transitions only move forward: `Connecting` resolves to `Connected` or
/// `Failed`, and `Connected` ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Remote connection is being established.
    Connecting,
    /// Remote shell is live.
    Connected,
    /// Connection establishment failed.
    Failed,
    /// Session was disconnected.
    Closed,
}

impl SessionStatus {
    /// Returns true for `Failed` and `Closed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Failed | SessionStatus::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Connecting, SessionStatus::Connected)
                | (SessionStatus::Connecting, SessionStatus::Failed)
                | (SessionStatus::Connected, SessionStatus::Closed)
        )
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Failed => "failed",
            SessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to open an interactive shell on a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Directory name of the target host.
    pub hostname: String,
    /// Address to connect to when the directory has none for the host.
    #[serde(default, alias = "ip_address", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Login user overriding the directory mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl CreateSessionRequest {
    /// Request a session on `hostname` with directory defaults.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: None,
            user: None,
        }
    }

    /// Set the address hint.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Response to a successful session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    /// Opaque handle used to attach and close.
    pub session_id: String,
    /// Target host name.
    pub hostname: String,
    /// Address the shell is connected to.
    pub address: String,
    /// Login user.
    pub user: String,
    /// Status at creation time (always `connected`).
    pub status: SessionStatus,
    /// Session kind, always [`SESSION_KIND_INTERACTIVE`].
    #[serde(rename = "type")]
    pub kind: String,
}

/// Request to close a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    /// Session to close.
    pub session_id: String,
}

/// Response to a successful close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    /// The closed session.
    pub session_id: String,
    /// Always `closed`.
    pub status: SessionStatus,
}

impl SessionClosed {
    /// Acknowledge closing `session_id`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Closed,
        }
    }
}

/// One entry in a session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Target host name.
    pub hostname: String,
    /// Connected address.
    pub address: String,
    /// Login user.
    pub user: String,
    /// Current status.
    pub status: SessionStatus,
    /// Unix timestamp (seconds) of creation.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last input or output.
    pub last_used_at: u64,
    /// Whether a terminal client is currently attached.
    #[serde(default)]
    pub attached: bool,
}

/// Snapshot of every live session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionListing {
    /// Sessions keyed by id.
    pub sessions: BTreeMap<String, SessionSummary>,
    /// Number of sessions.
    pub total: usize,
}

impl SessionListing {
    /// Build a listing, deriving `total` from the entries.
    pub fn new(sessions: BTreeMap<String, SessionSummary>) -> Self {
        let total = sessions.len();
        Self { sessions, total }
    }
}

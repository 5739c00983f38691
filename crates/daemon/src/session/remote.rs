//! Abstractions over the remote side of a shell session.
//!
//! A [`RemoteConnector`] opens a PTY-backed shell on a remote host and hands
//! back two halves: a [`RemoteShell`] that accepts writes and geometry
//! changes, and a [`RemoteOutput`] that yields whatever the shell prints.
//! The SSH implementation lives in [`super::ssh`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Where a session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Directory name of the host.
    pub hostname: String,
    /// Address to dial.
    pub address: String,
    /// Login user.
    pub user: String,
}

/// Terminal parameters requested when the shell is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value for `TERM`.
    pub term: String,
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 120,
            rows: 30,
        }
    }
}

/// Failures reported by a remote connector.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The host could not be reached or the transport broke.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The host rejected every credential offered.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The operation did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Channel setup or I/O failed after connecting.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Opens interactive shells on remote hosts.
pub trait RemoteConnector: Send + Sync + 'static {
    /// Write half of an open shell.
    type Shell: RemoteShell;
    /// Read half of an open shell.
    type Output: RemoteOutput;

    /// Connect, authenticate, allocate a PTY and start a shell.
    fn connect(
        &self,
        target: &RemoteTarget,
        pty: &PtyRequest,
    ) -> impl Future<Output = Result<(Self::Shell, Self::Output), RemoteError>> + Send;
}

/// Write half of a remote shell.
pub trait RemoteShell: Send + 'static {
    /// Write bytes to the shell's input verbatim.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Request a terminal geometry change.
    fn resize(&mut self, cols: u16, rows: u16)
        -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Close the channel, then the connection. Called at most once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Read half of a remote shell.
pub trait RemoteOutput: Send + 'static {
    /// Wait for the next block of output. `None` once the channel has ended.
    fn recv(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

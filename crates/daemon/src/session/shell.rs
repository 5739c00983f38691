//! Remote shell sessions.
//!
//! A [`Session`] owns one remote PTY shell and bridges it to at most one
//! attached client. Its status only moves forward:
//!
//! ```text
//! Connecting ──► Connected ──► Closed
//!      │
//!      └──────► Failed
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use protocol::{ServerMessage, SessionStatus, SessionSummary};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::relay;
use super::remote::{
    PtyRequest, RemoteConnector, RemoteError, RemoteOutput, RemoteShell, RemoteTarget,
};
use crate::config::SshConfig;

/// Unique identifier for a session.
pub type SessionId = String;

/// Identifies one attachment of a client to a session.
pub type AttachmentId = u64;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The remote host could not be reached or the shell could not be opened.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// The remote host rejected the login.
    #[error("authentication failed for {user}@{address}: {reason}")]
    Authentication {
        user: String,
        address: String,
        reason: String,
    },

    /// Connecting took longer than the configured bound.
    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session is not in a state that allows the operation.
    #[error("session {id} is {status}")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
    },

    /// Another client is already attached.
    #[error("session {0} already has an attached client")]
    AlreadyAttached(SessionId),
}

/// Parameters applied to every new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on connect, login and shell startup.
    pub connect_timeout: Duration,
    /// How long to discard banner output after the shell starts.
    pub banner_settle: Duration,
    /// Initial terminal.
    pub pty: PtyRequest,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            banner_settle: Duration::from_millis(500),
            pty: PtyRequest::default(),
        }
    }
}

impl From<&SshConfig> for SessionSettings {
    fn from(config: &SshConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            banner_settle: config.banner_settle(),
            pty: PtyRequest {
                term: config.term.clone(),
                cols: config.cols,
                rows: config.rows,
            },
        }
    }
}

/// Outcome of handing a frame to the attached client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    NoClient,
    Failed,
}

struct Attachment {
    id: AttachmentId,
    tx: mpsc::Sender<ServerMessage>,
    // cancelled when the client is detached, abandoning any blocked send
    detached: CancellationToken,
}

impl Attachment {
    fn release(self) -> mpsc::Sender<ServerMessage> {
        self.detached.cancel();
        self.tx
    }
}

struct RelayHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A remote PTY shell plus its client attachment.
pub struct Session<C: RemoteConnector> {
    id: SessionId,
    target: RemoteTarget,
    created_at: SystemTime,
    last_used: StdMutex<SystemTime>,
    status: watch::Sender<SessionStatus>,
    shell: Mutex<Option<C::Shell>>,
    output: Arc<Mutex<Option<C::Output>>>,
    attachment: Mutex<Option<Attachment>>,
    attached: AtomicBool,
    next_attachment: AtomicU64,
    relay: StdMutex<Option<RelayHandle>>,
}

impl<C: RemoteConnector> Session<C> {
    /// Creates an unconnected session for `target`.
    pub fn new(target: RemoteTarget) -> Self {
        let (status, _) = watch::channel(SessionStatus::Connecting);
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4().to_string(),
            target,
            created_at: now,
            last_used: StdMutex::new(now),
            status,
            shell: Mutex::new(None),
            output: Arc::new(Mutex::new(None)),
            attachment: Mutex::new(None),
            attached: AtomicBool::new(false),
            next_attachment: AtomicU64::new(0),
            relay: StdMutex::new(None),
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the connection target.
    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Returns the target hostname.
    pub fn hostname(&self) -> &str {
        &self.target.hostname
    }

    /// Returns the current status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Returns true while the remote shell is live.
    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Returns true while a client is attached.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Returns the creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Returns the time of the last input or delivered output.
    pub fn last_used_at(&self) -> SystemTime {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time elapsed between the last use and `now`.
    pub fn idle_for(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_used_at()).unwrap_or_default()
    }

    pub(crate) fn touch(&self) {
        self.set_last_used(SystemTime::now());
    }

    pub(crate) fn set_last_used(&self, at: SystemTime) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// Applies `next` if it is a legal transition from the current status.
    fn transition(&self, next: SessionStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Opens the remote shell.
    ///
    /// Connect, login, PTY allocation and banner draining together are
    /// bounded by `settings.connect_timeout`. On failure the session is left
    /// `Failed`.
    pub async fn connect(&self, connector: &C, settings: &SessionSettings) -> Result<(), SessionError> {
        let status = self.status();
        if status != SessionStatus::Connecting {
            return Err(SessionError::InvalidState {
                id: self.id.clone(),
                status,
            });
        }

        let attempt = async {
            let (shell, mut output) = connector.connect(&self.target, &settings.pty).await?;
            let drained = drain_banner(&mut output, settings.banner_settle).await?;
            Ok::<_, RemoteError>((shell, output, drained))
        };

        let result = match tokio::time::timeout(settings.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(settings.connect_timeout)),
        };

        match result {
            Ok((shell, output, drained)) => {
                *self.shell.lock().await = Some(shell);
                *self.output.lock().await = Some(output);
                self.touch();
                self.transition(SessionStatus::Connected);
                tracing::debug!(
                    session_id = %self.id,
                    banner_bytes = drained,
                    "Remote shell ready"
                );
                Ok(())
            }
            Err(e) => {
                self.transition(SessionStatus::Failed);
                Err(self.classify(e))
            }
        }
    }

    fn classify(&self, err: RemoteError) -> SessionError {
        let address = self.target.address.clone();
        match err {
            RemoteError::Authentication(reason) => SessionError::Authentication {
                user: self.target.user.clone(),
                address,
                reason,
            },
            RemoteError::Timeout(timeout) => SessionError::Timeout { address, timeout },
            RemoteError::Connection(reason) | RemoteError::Channel(reason) => {
                SessionError::Connection { address, reason }
            }
        }
    }

    /// Writes keystrokes to the remote shell.
    ///
    /// Input for a session that is not connected is dropped with a warning.
    pub async fn send_input(&self, data: &[u8]) {
        if !self.is_connected() {
            tracing::warn!(
                session_id = %self.id,
                status = %self.status(),
                bytes = data.len(),
                "Dropping input for inactive session"
            );
            return;
        }

        let mut shell = self.shell.lock().await;
        let Some(shell) = shell.as_mut() else {
            tracing::warn!(session_id = %self.id, "Dropping input, remote channel released");
            return;
        };

        match shell.write(data).await {
            Ok(()) => self.touch(),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to write input");
            }
        }
    }

    /// Requests a terminal geometry change. No-op unless connected.
    pub async fn resize(&self, cols: u16, rows: u16) {
        if !self.is_connected() {
            tracing::debug!(session_id = %self.id, cols, rows, "Ignoring resize for inactive session");
            return;
        }

        let mut shell = self.shell.lock().await;
        if let Some(shell) = shell.as_mut() {
            match shell.resize(cols, rows).await {
                Ok(()) => tracing::debug!(session_id = %self.id, cols, rows, "Resized terminal"),
                Err(e) => tracing::warn!(session_id = %self.id, error = %e, "Failed to resize terminal"),
            }
        }
    }

    /// Registers `tx` as the session's client.
    pub async fn attach(&self, tx: mpsc::Sender<ServerMessage>) -> Result<AttachmentId, SessionError> {
        let mut slot = self.attachment.lock().await;

        let status = self.status();
        if status != SessionStatus::Connected {
            return Err(SessionError::InvalidState {
                id: self.id.clone(),
                status,
            });
        }
        if slot.is_some() {
            return Err(SessionError::AlreadyAttached(self.id.clone()));
        }

        let id = self.next_attachment.fetch_add(1, Ordering::Relaxed) + 1;
        *slot = Some(Attachment {
            id,
            tx,
            detached: CancellationToken::new(),
        });
        self.attached.store(true, Ordering::Release);
        Ok(id)
    }

    /// Clears the client reference if it still belongs to `attachment`.
    pub async fn detach(&self, attachment: AttachmentId) -> bool {
        let mut slot = self.attachment.lock().await;
        if !slot.as_ref().is_some_and(|current| current.id == attachment) {
            return false;
        }
        if let Some(current) = slot.take() {
            current.release();
        }
        self.attached.store(false, Ordering::Release);
        true
    }

    /// Hands a frame to the attached client, if any.
    ///
    /// Waiting for queue space does not hold the attachment lock. A frame
    /// still waiting when its client detaches is dropped.
    pub(crate) async fn deliver(&self, message: ServerMessage) -> Delivery {
        let (tx, detached) = {
            let slot = self.attachment.lock().await;
            let Some(attachment) = slot.as_ref() else {
                return Delivery::NoClient;
            };
            (attachment.tx.clone(), attachment.detached.clone())
        };

        tokio::select! {
            biased;
            _ = detached.cancelled() => Delivery::NoClient,
            sent = tx.send(message) => match sent {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Failed,
            },
        }
    }

    /// Starts the output relay unless one is already running.
    pub fn ensure_relay(self: &Arc<Self>) -> bool {
        let mut slot = self.relay.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.is_connected() {
            return false;
        }
        if slot.as_ref().is_some_and(|relay| !relay.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay::forward_output(
            Arc::clone(self),
            Arc::clone(&self.output),
            cancel.clone(),
        ));
        *slot = Some(RelayHandle { cancel, handle });
        true
    }

    /// Closes the session. Safe to call more than once.
    ///
    /// Input is refused from the first call on; the relay is cancelled and
    /// joined before the channel and connection are released, and the client
    /// reference is dropped last.
    pub async fn disconnect(&self) {
        let was_connected = self.transition(SessionStatus::Closed);

        let relay = self
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(relay) = relay {
            relay.cancel.cancel();
            if let Err(e) = relay.handle.await {
                if e.is_panic() {
                    tracing::error!(session_id = %self.id, "Output relay panicked");
                }
            }
        }

        self.release_remote().await;
        self.output.lock().await.take();

        if let Some(attachment) = self.attachment.lock().await.take() {
            attachment.release();
            self.attached.store(false, Ordering::Release);
        }

        if was_connected {
            tracing::info!(
                session_id = %self.id,
                hostname = %self.target.hostname,
                "Session closed"
            );
        }
    }

    /// Called by the relay when the remote side hangs up.
    pub(crate) async fn remote_ended(&self) {
        if !self.transition(SessionStatus::Closed) {
            return;
        }
        tracing::info!(
            session_id = %self.id,
            hostname = %self.target.hostname,
            "Remote shell ended"
        );

        self.release_remote().await;

        let attachment = self.attachment.lock().await.take();
        if let Some(attachment) = attachment {
            self.attached.store(false, Ordering::Release);
            let tx = attachment.release();
            let notice = ServerMessage::error(format!(
                "remote shell on {} closed",
                self.target.hostname
            ));
            if tx.try_send(notice).is_err() {
                tracing::debug!(session_id = %self.id, "Client queue full, dropping close notice");
            }
        }
    }

    async fn release_remote(&self) {
        let shell = self.shell.lock().await.take();
        if let Some(mut shell) = shell {
            shell.close().await;
        }
    }

    /// Snapshot for listings.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            hostname: self.target.hostname.clone(),
            address: self.target.address.clone(),
            user: self.target.user.clone(),
            status: self.status(),
            created_at: unix_secs(self.created_at),
            last_used_at: unix_secs(self.last_used_at()),
            attached: self.is_attached(),
        }
    }
}

impl<C: RemoteConnector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("status", &self.status())
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

/// Discards whatever the shell prints during the first `settle` after login.
async fn drain_banner<O: RemoteOutput>(output: &mut O, settle: Duration) -> Result<usize, RemoteError> {
    let deadline = tokio::time::Instant::now() + settle;
    let mut drained = 0;
    loop {
        match tokio::time::timeout_at(deadline, output.recv()).await {
            Ok(Some(bytes)) => drained += bytes.len(),
            Ok(None) => {
                return Err(RemoteError::Channel(
                    "shell exited during login".to_string(),
                ))
            }
            Err(_) => return Ok(drained),
        }
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

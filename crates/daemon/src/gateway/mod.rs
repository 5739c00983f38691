//! Client-facing gateway.
//!
//! The [`Gateway`] validates control requests (create, close, list) and runs
//! the frame loop for each attached client. It is transport-agnostic: the
//! WebSocket listener in [`websocket`] hands it a [`FrameSink`] and a
//! [`FrameSource`] per connection.

pub mod transport;
pub mod websocket;

use std::sync::Arc;

use protocol::{
    ClientMessage, CreateSessionRequest, ServerMessage, SessionClosed, SessionCreated,
    SessionListing, SESSION_KIND_INTERACTIVE,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::directory::{DirectoryError, HostDirectory};
use crate::session::{RemoteConnector, Session, SessionError, SessionRegistry};

pub use transport::{FrameSink, FrameSource, InboundFrame, TransportError};
pub use websocket::{session_id_from_path, WebSocketServer};

/// Default capacity of the per-attachment outbound queue.
pub const DEFAULT_OUTPUT_QUEUE: usize = 256;

/// Errors reported by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request is missing a required field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The hostname is not in the host directory.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Front door for session control and client attachments.
pub struct Gateway<C: RemoteConnector, D: HostDirectory> {
    registry: Arc<SessionRegistry<C>>,
    directory: Arc<D>,
    output_queue: usize,
}

impl<C: RemoteConnector, D: HostDirectory> Gateway<C, D> {
    /// Creates a gateway over `registry`, resolving hosts through `directory`.
    pub fn new(registry: Arc<SessionRegistry<C>>, directory: Arc<D>) -> Self {
        Self {
            registry,
            directory,
            output_queue: DEFAULT_OUTPUT_QUEUE,
        }
    }

    /// Sets the outbound queue capacity per attachment.
    pub fn with_output_queue(mut self, capacity: usize) -> Self {
        self.output_queue = capacity.max(1);
        self
    }

    /// The session registry behind this gateway.
    pub fn registry(&self) -> &Arc<SessionRegistry<C>> {
        &self.registry
    }

    /// Opens a new interactive session.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<SessionCreated, GatewayError> {
        let hostname = request.hostname.trim();
        if hostname.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "hostname is required".to_string(),
            ));
        }
        if !self.directory.is_known(hostname) {
            tracing::warn!(hostname, "Rejecting session for unknown host");
            return Err(GatewayError::UnknownHost(hostname.to_string()));
        }

        let target = self.directory.resolve(
            hostname,
            request.address.as_deref(),
            request.user.as_deref(),
        )?;
        let session = self.registry.create(target).await?;
        let target = session.target();

        Ok(SessionCreated {
            session_id: session.id().clone(),
            hostname: target.hostname.clone(),
            address: target.address.clone(),
            user: target.user.clone(),
            status: session.status(),
            kind: SESSION_KIND_INTERACTIVE.to_string(),
        })
    }

    /// Closes a session.
    pub async fn close_session(&self, session_id: &str) -> Result<SessionClosed, GatewayError> {
        if self.registry.close(session_id).await {
            tracing::info!(session_id, "Session closed by request");
            Ok(SessionClosed::new(session_id))
        } else {
            Err(SessionError::NotFound(session_id.to_string()).into())
        }
    }

    /// Lists all registered sessions.
    pub fn list_sessions(&self) -> SessionListing {
        SessionListing::new(self.registry.snapshot())
    }

    /// Attaches a client to a session and runs its frame loop to completion.
    ///
    /// If the session is missing, not connected or already attached, the
    /// client receives a single `error` frame and the connection is closed.
    /// When the loop ends the attachment is released; the session itself
    /// stays open.
    pub async fn attach<W, R>(&self, session_id: &str, mut sink: W, mut source: R) -> Result<(), GatewayError>
    where
        W: FrameSink,
        R: FrameSource,
    {
        let (tx, rx) = mpsc::channel(self.output_queue);

        let attached = match self.registry.get(session_id) {
            None => Err(SessionError::NotFound(session_id.to_string())),
            Some(session) => {
                // queued ahead of the attachment so it is always the first frame
                let _ = tx.try_send(welcome(&session));
                session.attach(tx).await.map(|id| (session, id))
            }
        };

        let (session, attachment) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Rejecting attachment");
                reject(&mut sink, e.to_string()).await;
                return Err(e.into());
            }
        };

        tracing::info!(session_id, hostname = %session.hostname(), "Client attached");

        let mut writer = tokio::spawn(pump_frames(sink, rx));
        session.ensure_relay();

        let reason = loop {
            tokio::select! {
                frame = source.next_frame() => match frame {
                    None => break "client closed",
                    Some(Err(e)) => {
                        tracing::debug!(session_id, error = %e, "Client connection failed");
                        break "client error";
                    }
                    Some(Ok(frame)) => dispatch(&session, frame).await,
                },
                _ = &mut writer => break "session ended attachment",
            }
        };

        writer.abort();
        session.detach(attachment).await;
        tracing::info!(session_id, reason, "Client detached");
        Ok(())
    }
}

fn welcome<C: RemoteConnector>(session: &Session<C>) -> ServerMessage {
    let target = session.target();
    ServerMessage::output(format!(
        "Connected to {} ({}@{})\r\n",
        target.hostname, target.user, target.address
    ))
}

async fn dispatch<C: RemoteConnector>(session: &Session<C>, frame: InboundFrame) {
    match frame {
        InboundFrame::Text(text) => match ClientMessage::from_frame(&text) {
            ClientMessage::Input { data } => session.send_input(data.as_bytes()).await,
            ClientMessage::Resize { cols, rows } => session.resize(cols, rows).await,
        },
        InboundFrame::Binary(bytes) => session.send_input(&bytes).await,
    }
}

/// Writes queued frames to the client until the queue closes.
async fn pump_frames<W: FrameSink>(mut sink: W, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send_message(&message).await {
            tracing::debug!(error = %e, "Client write failed");
            return;
        }
    }
    sink.close().await;
}

async fn reject<W: FrameSink>(sink: &mut W, message: String) {
    if let Err(e) = sink.send_message(&ServerMessage::error(message)).await {
        tracing::debug!(error = %e, "Failed to send rejection");
    }
    sink.close().await;
}

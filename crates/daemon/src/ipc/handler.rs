//! Dispatch of IPC requests to the gateway.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::messages::{IpcRequest, IpcResponse};
use super::server::{IpcConnection, IpcError};
use crate::directory::HostDirectory;
use crate::gateway::Gateway;
use crate::session::RemoteConnector;

/// Answers CLI requests on behalf of the running daemon.
pub struct IpcHandler<C: RemoteConnector, D: HostDirectory> {
    gateway: Arc<Gateway<C, D>>,
    started_at: Instant,
    listen_addr: String,
    stop_requested: CancellationToken,
}

impl<C: RemoteConnector, D: HostDirectory> IpcHandler<C, D> {
    /// Creates a handler. `stop_requested` is cancelled on a Stop request.
    pub fn new(
        gateway: Arc<Gateway<C, D>>,
        listen_addr: impl Into<String>,
        stop_requested: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            started_at: Instant::now(),
            listen_addr: listen_addr.into(),
            stop_requested,
        }
    }

    /// Produce the response for one request.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => IpcResponse::Status {
                running: true,
                uptime_secs: self.started_at.elapsed().as_secs(),
                session_count: self.gateway.registry().len(),
                listen_addr: self.listen_addr.clone(),
            },
            IpcRequest::Stop => {
                tracing::info!("Stop requested over IPC");
                self.stop_requested.cancel();
                IpcResponse::Stopping
            }
            IpcRequest::CreateSession(request) => {
                match self.gateway.create_session(request).await {
                    Ok(created) => IpcResponse::SessionCreated(created),
                    Err(e) => IpcResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            IpcRequest::CloseSession { session_id } => {
                match self.gateway.close_session(&session_id).await {
                    Ok(closed) => IpcResponse::SessionClosed(closed),
                    Err(e) => IpcResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            IpcRequest::ListSessions => IpcResponse::Sessions(self.gateway.list_sessions()),
        }
    }

    /// Serve requests on `conn` until the client disconnects.
    ///
    /// Malformed requests are answered with an error and the connection stays
    /// open.
    pub async fn serve_connection(&self, mut conn: IpcConnection) {
        loop {
            let response = match conn.read_request().await {
                Ok(Some(request)) => {
                    tracing::debug!(?request, "IPC request");
                    self.handle(request).await
                }
                Ok(None) => break,
                Err(IpcError::Json(e)) => IpcResponse::Error {
                    message: format!("invalid request: {e}"),
                },
                Err(e) => {
                    tracing::debug!(error = %e, "IPC connection failed");
                    break;
                }
            };

            if let Err(e) = conn.send_response(&response).await {
                tracing::debug!(error = %e, "Failed to send IPC response");
                break;
            }
        }
    }
}

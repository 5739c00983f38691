//! WebSocket listener for terminal attachments.
//!
//! Clients connect to `ws://<listen>/<prefix><session_id>`. The session ID is
//! taken from the upgrade request path; any other path is refused with 404
//! before the upgrade completes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use super::Gateway;
use crate::directory::HostDirectory;
use crate::session::RemoteConnector;

/// Extract the session ID from an attachment path.
///
/// Returns `None` unless `path` is exactly `prefix` followed by a single
/// non-empty path segment.
pub fn session_id_from_path<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let id = path.strip_prefix(prefix)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

/// Accepts WebSocket connections and hands them to a [`Gateway`].
pub struct WebSocketServer {
    listener: TcpListener,
    path_prefix: String,
}

impl WebSocketServer {
    /// Bind the listener.
    pub async fn bind(addr: &str, path_prefix: impl Into<String>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            path_prefix: path_prefix.into(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn serve<C, D>(self, gateway: Arc<Gateway<C, D>>, shutdown: CancellationToken)
    where
        C: RemoteConnector,
        D: HostDirectory,
    {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, prefix = %self.path_prefix, "WebSocket gateway listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = Arc::clone(&gateway);
                        let prefix = self.path_prefix.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, gateway, prefix).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        tracing::info!("WebSocket gateway stopped");
    }
}

async fn handle_connection<C, D>(
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Arc<Gateway<C, D>>,
    prefix: String,
) where
    C: RemoteConnector,
    D: HostDirectory,
{
    let mut session_id = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = request.uri().path();
        match session_id_from_path(&prefix, path) {
            Some(id) => {
                session_id = Some(id.to_string());
                Ok(response)
            }
            None => {
                tracing::debug!(%peer, path, "Refusing upgrade for unknown path");
                let mut rejection = ErrorResponse::new(Some("not found".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let Some(session_id) = session_id else {
        return;
    };

    tracing::debug!(%peer, session_id, "WebSocket upgraded");
    let (sink, source) = ws.split();

    if let Err(e) = gateway.attach(&session_id, sink, source).await {
        tracing::debug!(%peer, session_id, error = %e, "Attachment ended with error");
    }
}

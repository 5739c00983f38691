//! Client transport abstraction.
//!
//! The gateway talks to clients through a [`FrameSink`] / [`FrameSource`]
//! pair so that attachment logic does not depend on WebSocket types. The
//! WebSocket implementations are at the bottom of this file.

use std::future::Future;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{ProtocolError, ServerMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame, either a JSON control message or raw input.
    Text(String),
    /// Binary frame, always raw input.
    Binary(Vec<u8>),
}

/// Errors on the client side of an attachment.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client went away.
    #[error("client connection closed")]
    Closed,

    /// The underlying connection failed.
    #[error("client connection error: {0}")]
    Io(String),

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            other => TransportError::Io(other.to_string()),
        }
    }
}

/// Outbound half of a client connection.
pub trait FrameSink: Send + 'static {
    /// Send one server frame.
    fn send_message(
        &mut self,
        message: &ServerMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection. Errors are ignored.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Inbound half of a client connection.
pub trait FrameSource: Send + 'static {
    /// Next data frame, or `None` once the client has closed.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<Result<InboundFrame, TransportError>>> + Send;
}

impl<S> FrameSink for SplitSink<WebSocketStream<S>, WsMessage>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_message(&mut self, message: &ServerMessage) -> Result<(), TransportError> {
        let json = message.to_json()?;
        SinkExt::send(self, WsMessage::Text(json)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::close(self).await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}

impl<S> FrameSource for SplitStream<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let message = match StreamExt::next(self).await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                WsMessage::Text(text) => return Some(Ok(InboundFrame::Text(text))),
                WsMessage::Binary(bytes) => return Some(Ok(InboundFrame::Binary(bytes))),
                WsMessage::Close(_) => return None,
                // control frames are answered by tungstenite
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            }
        }
    }
}

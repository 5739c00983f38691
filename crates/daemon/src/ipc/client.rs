//! IPC client used by the CLI to drive the daemon.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::CreateSessionRequest;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Floor for session creation, which waits on a remote login.
const CREATE_TIMEOUT_SECS: u64 = 30;

/// A client for communicating with the daemon via IPC.
pub struct IpcClient {
    reader: BufReader<ReadHalf<UnixStream>>,
    writer: WriteHalf<UnixStream>,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon at `path`.
    ///
    /// Fails if the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        Self::connect_with_timeout(path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connect with a custom per-request timeout.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| timed_out("connection timed out"))??;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        })
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for the response.
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        let timeout = self.timeout;
        self.send_with_timeout(request, timeout).await
    }

    async fn send_with_timeout(
        &mut self,
        request: IpcRequest,
        timeout: Duration,
    ) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| timed_out("operation timed out"))?
    }

    async fn exchange(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            )));
        }

        Ok(serde_json::from_str(line.trim())?)
    }

    /// Returns `true` if the daemon answers with Pong.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(IpcRequest::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Get the current status of the daemon.
    pub async fn status(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Status).await
    }

    /// Request the daemon to stop.
    pub async fn stop(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Stop).await
    }

    /// Open a session.
    ///
    /// Waits at least `CREATE_TIMEOUT_SECS` since the daemon has to finish
    /// the remote login before it answers.
    pub async fn create_session(
        &mut self,
        request: CreateSessionRequest,
    ) -> Result<IpcResponse, IpcError> {
        let timeout = self.timeout.max(Duration::from_secs(CREATE_TIMEOUT_SECS));
        self.send_with_timeout(IpcRequest::CreateSession(request), timeout)
            .await
    }

    /// Close a session by ID.
    pub async fn close_session(&mut self, session_id: impl Into<String>) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::CloseSession {
            session_id: session_id.into(),
        })
        .await
    }

    /// List registered sessions.
    pub async fn list_sessions(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::ListSessions).await
    }
}

fn timed_out(message: &str) -> IpcError {
    IpcError::Io(io::Error::new(io::ErrorKind::TimedOut, message.to_string()))
}

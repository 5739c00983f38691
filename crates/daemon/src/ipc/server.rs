//! Unix socket listener for the CLI control channel.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{UnixListener, UnixStream};

use super::messages::{IpcRequest, IpcResponse};

/// Listens for CLI connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind to `path`, creating parent directories and replacing a stale
    /// socket file left by a previous run.
    ///
    /// The socket is restricted to the owning user.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Socket file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next client.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// One CLI connection speaking newline-delimited JSON.
pub struct IpcConnection {
    reader: BufReader<ReadHalf<UnixStream>>,
    writer: WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request. `None` once the client has disconnected.
    ///
    /// Blank lines are skipped.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(serde_json::from_str(trimmed)?));
            }
        }
    }

    /// Write one response line.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    async fn send_raw(path: &Path, payload: &str) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(payload.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_bind_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nested").join("rigterm.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        assert_eq!(server.path(), socket_path.as_path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("rigterm.sock");
        let _server = IpcServer::bind(&socket_path).await.unwrap();

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("rigterm.sock");

        drop(IpcServer::bind(&socket_path).await.unwrap());
        let _server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("rigterm.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let client = tokio::spawn({
            let socket_path = socket_path.clone();
            async move { send_raw(&socket_path, "\n\"Ping\"\n").await }
        });

        let mut conn = server.accept().await.unwrap();
        assert_eq!(conn.read_request().await.unwrap(), Some(IpcRequest::Ping));
        conn.send_response(&IpcResponse::Pong).await.unwrap();
        assert!(conn.read_request().await.unwrap().is_none());
        drop(conn);

        assert_eq!(client.await.unwrap(), "\"Pong\"\n");
    }

    #[tokio::test]
    async fn test_malformed_request_is_json_error() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("rigterm.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let client = tokio::spawn({
            let socket_path = socket_path.clone();
            async move { send_raw(&socket_path, "{not json}\n").await }
        });

        let mut conn = server.accept().await.unwrap();
        assert!(matches!(conn.read_request().await, Err(IpcError::Json(_))));
        drop(conn);
        client.await.unwrap();
    }
}

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use rigterm::config::Config;
use rigterm::orchestrator::DaemonOrchestrator;
use rigterm::session::{PtyRequest, RemoteConnector, RemoteError, RemoteOutput, RemoteShell, RemoteTarget};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Connect attempts to this address never complete.
pub const UNREACHABLE_ADDRESS: &str = "10.255.255.1";

/// How long a test waits for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the fake hosts observed.
#[derive(Default)]
pub struct EchoState {
    resizes: Mutex<Vec<(u16, u16)>>,
    closes: AtomicUsize,
}

impl EchoState {
    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Connector whose remote shells echo their input and print a prompt after
/// every line. Writing `exit` hangs the shell up.
#[derive(Clone, Default)]
pub struct EchoConnector {
    pub state: Arc<EchoState>,
}

impl RemoteConnector for EchoConnector {
    type Shell = EchoShell;
    type Output = EchoOutput;

    async fn connect(
        &self,
        target: &RemoteTarget,
        _pty: &PtyRequest,
    ) -> Result<(EchoShell, EchoOutput), RemoteError> {
        if target.address == UNREACHABLE_ADDRESS {
            std::future::pending::<()>().await;
        }

        let prompt = format!("{}@{}:~$ ", target.user, target.hostname);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(format!("Last login: Sun Oct 18 09:00:00 2026\r\n{prompt}").into_bytes());

        Ok((
            EchoShell {
                tx: Some(tx),
                prompt,
                state: Arc::clone(&self.state),
            },
            EchoOutput { rx },
        ))
    }
}

pub struct EchoShell {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    prompt: String,
    state: Arc<EchoState>,
}

impl RemoteShell for EchoShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), RemoteError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RemoteError::Channel("shell exited".to_string()))?;

        let text = String::from_utf8_lossy(data);
        if text.trim() == "exit" {
            self.tx = None;
            return Ok(());
        }

        let mut echo = text.replace('\n', "\r\n");
        if text.ends_with('\n') {
            echo.push_str(&self.prompt);
        }
        tx.send(echo.into_bytes())
            .map_err(|_| RemoteError::Channel("shell exited".to_string()))
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> Result<(), RemoteError> {
        self.state.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    async fn close(&mut self) {
        self.tx = None;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct EchoOutput {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl RemoteOutput for EchoOutput {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Configuration with ephemeral ports, a private socket and a short connect
/// timeout.
pub fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.daemon.socket_path = Some(temp_dir.path().join("rigterm.sock"));
    config.gateway.listen_addr = "127.0.0.1:0".to_string();
    config.ssh.connect_timeout_secs = 1;
    config.ssh.banner_settle_ms = 20;
    config.directory.allow_unlisted = true;
    config
}

/// A started daemon backed by [`EchoConnector`].
pub struct TestDaemon {
    pub orchestrator: DaemonOrchestrator<EchoConnector>,
    pub connector: EchoConnector,
    pub gateway_addr: SocketAddr,
    _temp_dir: TempDir,
}

impl TestDaemon {
    pub async fn start() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);
        Self::start_with(config, temp_dir).await
    }

    pub async fn start_with(config: Config, temp_dir: TempDir) -> Self {
        let connector = EchoConnector::default();
        let mut orchestrator =
            DaemonOrchestrator::with_connector(config, connector.clone()).unwrap();
        orchestrator.start().await.unwrap();
        let gateway_addr = orchestrator.gateway_addr().unwrap();

        Self {
            orchestrator,
            connector,
            gateway_addr,
            _temp_dir: temp_dir,
        }
    }

    pub fn attach_url(&self, session_id: &str) -> String {
        format!("ws://{}/ssh/ws/{}", self.gateway_addr, session_id)
    }

    pub async fn attach(&self, session_id: &str) -> WsClient {
        let (ws, _response) = tokio_tungstenite::connect_async(self.attach_url(session_id))
            .await
            .unwrap();
        ws
    }
}

/// Send a tagged client frame.
pub async fn send(ws: &mut WsClient, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

/// Next server frame, or `None` once the server has closed the connection.
pub async fn next_message(ws: &mut WsClient) -> Option<ServerMessage> {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Read output frames until their concatenation contains `needle`.
pub async fn read_until(ws: &mut WsClient, needle: &str) -> String {
    let mut seen = String::new();
    while !seen.contains(needle) {
        match next_message(ws).await {
            Some(ServerMessage::Output { data }) => seen.push_str(&data),
            other => panic!("expected output containing {needle:?}, got {other:?} after {seen:?}"),
        }
    }
    seen
}

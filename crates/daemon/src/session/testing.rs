//! In-memory remote connector for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::remote::{
    PtyRequest, RemoteConnector, RemoteError, RemoteOutput, RemoteShell, RemoteTarget,
};
use super::shell::SessionSettings;

const OUTPUT_CAPACITY: usize = 1024;

/// How the mock answers connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Accept,
    Refuse,
    RejectAuth,
    Hang,
}

/// Observable state of the mock remote host.
///
/// Every accepted connection gets its own output channel. The helpers
/// without a connection index act on the most recent one.
#[derive(Default)]
pub(crate) struct MockRemote {
    writes: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    closes: AtomicUsize,
    connects: AtomicUsize,
    outputs: Mutex<Vec<Option<mpsc::Sender<Vec<u8>>>>>,
}

impl MockRemote {
    fn latest(&self) -> Option<usize> {
        self.outputs.lock().unwrap().len().checked_sub(1)
    }

    fn push_to(&self, conn: usize, bytes: &[u8]) -> bool {
        let outputs = self.outputs.lock().unwrap();
        match outputs.get(conn).and_then(Option::as_ref) {
            Some(tx) => tx.try_send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    fn end(&self, conn: usize) {
        if let Some(slot) = self.outputs.lock().unwrap().get_mut(conn) {
            slot.take();
        }
    }

    pub(crate) fn push_output(&self, bytes: &[u8]) -> bool {
        self.latest().is_some_and(|conn| self.push_to(conn, bytes))
    }

    /// Hang up the remote side of the most recent connection.
    pub(crate) fn end_output(&self) {
        if let Some(conn) = self.latest() {
            self.end(conn);
        }
    }

    pub(crate) fn output_drained(&self) -> bool {
        let outputs = self.outputs.lock().unwrap();
        outputs
            .last()
            .and_then(Option::as_ref)
            .map_or(true, |tx| tx.capacity() == tx.max_capacity())
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockConnector {
    behavior: Behavior,
    banner: Vec<u8>,
    echo: bool,
    remote: Arc<MockRemote>,
}

impl MockConnector {
    pub(crate) fn new(behavior: Behavior) -> (Self, Arc<MockRemote>) {
        let remote = Arc::new(MockRemote::default());
        let connector = Self {
            behavior,
            banner: Vec::new(),
            echo: false,
            remote: Arc::clone(&remote),
        };
        (connector, remote)
    }

    pub(crate) fn with_banner(mut self, banner: &[u8]) -> Self {
        self.banner = banner.to_vec();
        self
    }

    /// Echo every write back as output, like a terminal with echo on.
    pub(crate) fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }
}

impl RemoteConnector for MockConnector {
    type Shell = MockShell;
    type Output = MockOutput;

    async fn connect(
        &self,
        target: &RemoteTarget,
        _pty: &PtyRequest,
    ) -> Result<(MockShell, MockOutput), RemoteError> {
        self.remote.connects.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Refuse => Err(RemoteError::Connection(format!(
                "{}:22: connection refused",
                target.address
            ))),
            Behavior::RejectAuth => Err(RemoteError::Authentication(format!(
                "{} rejected 1 key(s)",
                target.user
            ))),
            Behavior::Hang => loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            },
            Behavior::Accept => {
                let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
                if !self.banner.is_empty() {
                    let _ = tx.try_send(self.banner.clone());
                }
                let conn = {
                    let mut outputs = self.remote.outputs.lock().unwrap();
                    outputs.push(Some(tx));
                    outputs.len() - 1
                };

                Ok((
                    MockShell {
                        remote: Arc::clone(&self.remote),
                        conn,
                        echo: self.echo,
                    },
                    MockOutput { rx },
                ))
            }
        }
    }
}

pub(crate) struct MockShell {
    remote: Arc<MockRemote>,
    conn: usize,
    echo: bool,
}

impl RemoteShell for MockShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), RemoteError> {
        self.remote.writes.lock().unwrap().extend_from_slice(data);
        if self.echo {
            self.remote.push_to(self.conn, data);
        }
        Ok(())
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> Result<(), RemoteError> {
        self.remote.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    async fn close(&mut self) {
        self.remote.closes.fetch_add(1, Ordering::SeqCst);
        self.remote.end(self.conn);
    }
}

pub(crate) struct MockOutput {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl RemoteOutput for MockOutput {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

pub(crate) fn test_target() -> RemoteTarget {
    RemoteTarget {
        hostname: "rig-01".to_string(),
        address: "10.0.0.11".to_string(),
        user: "root".to_string(),
    }
}

pub(crate) fn test_settings() -> SessionSettings {
    SessionSettings {
        connect_timeout: Duration::from_secs(2),
        banner_settle: Duration::from_millis(10),
        ..SessionSettings::default()
    }
}

//! Daemon orchestrator for wiring together all components.
//!
//! The `DaemonOrchestrator` owns the session registry and starts the
//! subsystems around it: the WebSocket gateway, the IPC control socket and
//! the session reaper. Stopping it closes every session.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::directory::StaticDirectory;
use crate::gateway::{Gateway, WebSocketServer};
use crate::ipc::{IpcHandler, IpcServer};
use crate::session::{Reaper, RemoteConnector, SessionRegistry, SessionSettings, SshConnector};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding listeners and spawning tasks.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The WebSocket gateway is accepting connections.
    GatewayListening { addr: SocketAddr },
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator<C: RemoteConnector = SshConnector> {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    registry: Arc<SessionRegistry<C>>,
    gateway: Arc<Gateway<C, StaticDirectory>>,
    reaper: Option<Reaper>,
    tasks: Vec<JoinHandle<()>>,
    gateway_addr: Option<SocketAddr>,
    socket_path: PathBuf,
    /// Cancelled to stop every background task.
    shutdown_token: CancellationToken,
    /// Cancelled when a client asks the daemon to stop.
    stop_requested: CancellationToken,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator<SshConnector> {
    /// Creates an orchestrator that opens sessions over SSH.
    pub fn new(config: Config) -> Result<Self> {
        let connector = SshConnector::new(&config.ssh);
        Self::with_connector(config, connector)
    }
}

impl<C: RemoteConnector> DaemonOrchestrator<C> {
    /// Creates an orchestrator that opens sessions with `connector`.
    pub fn with_connector(config: Config, connector: C) -> Result<Self> {
        let directory = StaticDirectory::from_config(&config.directory)
            .context("Failed to load host directory")?;
        info!(
            hosts = directory.len(),
            allow_unlisted = config.directory.allow_unlisted,
            "Host directory loaded"
        );

        let registry = Arc::new(SessionRegistry::new(
            connector,
            SessionSettings::from(&config.ssh),
        ));
        let gateway = Arc::new(
            Gateway::new(Arc::clone(&registry), Arc::new(directory))
                .with_output_queue(config.gateway.output_queue),
        );

        let socket_path = config.socket_path();
        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            registry,
            gateway,
            reaper: None,
            tasks: Vec::new(),
            gateway_addr: None,
            socket_path,
            shutdown_token: CancellationToken::new(),
            stop_requested: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the gateway, the IPC socket and the reaper.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        if let Err(e) = self.start_subsystems().await {
            error!(error = %e, "Startup failed");
            self.emit_event(OrchestratorEvent::Error {
                message: format!("{e:#}"),
            });
            self.shutdown_token.cancel();
            for task in self.tasks.drain(..) {
                let _ = task.await;
            }
            *self.state.write().await = OrchestratorState::Stopped;
            self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
            return Err(e);
        }

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    async fn start_subsystems(&mut self) -> Result<()> {
        // left cancelled by a previous stop or failed start
        if self.shutdown_token.is_cancelled() {
            self.shutdown_token = CancellationToken::new();
        }

        let gateway_config = &self.config.gateway;
        let server = WebSocketServer::bind(&gateway_config.listen_addr, gateway_config.path_prefix.clone())
            .await
            .with_context(|| format!("Failed to bind gateway on {}", gateway_config.listen_addr))?;
        let addr = server.local_addr().context("Failed to read gateway address")?;
        self.gateway_addr = Some(addr);
        self.tasks.push(tokio::spawn(
            server.serve(Arc::clone(&self.gateway), self.shutdown_token.clone()),
        ));
        self.emit_event(OrchestratorEvent::GatewayListening { addr });

        let ipc = IpcServer::bind(&self.socket_path).await.with_context(|| {
            format!("Failed to bind IPC socket at {}", self.socket_path.display())
        })?;
        info!(path = %self.socket_path.display(), "IPC socket listening");

        let handler = Arc::new(IpcHandler::new(
            Arc::clone(&self.gateway),
            addr.to_string(),
            self.stop_requested.clone(),
        ));
        self.tasks.push(tokio::spawn(Self::ipc_accept_loop(
            ipc,
            handler,
            self.shutdown_token.clone(),
            self.event_tx.clone(),
        )));

        let reaper_config = &self.config.reaper;
        self.reaper = Some(Reaper::spawn(
            Arc::clone(&self.registry),
            reaper_config.interval(),
            reaper_config.max_idle(),
        ));
        debug!("Started session reaper");

        Ok(())
    }

    async fn ipc_accept_loop(
        server: IpcServer,
        handler: Arc<IpcHandler<C, StaticDirectory>>,
        shutdown_token: CancellationToken,
        event_tx: broadcast::Sender<OrchestratorEvent>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("IPC accept loop received shutdown signal");
                    break;
                }
                accepted = server.accept() => match accepted {
                    Ok(conn) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { handler.serve_connection(conn).await });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept IPC connection");
                        let _ = event_tx.send(OrchestratorEvent::Error {
                            message: format!("IPC accept failed: {e}"),
                        });
                    }
                },
            }
        }
    }

    /// Stops the daemon gracefully, closing every session.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        self.shutdown_token.cancel();

        if let Some(reaper) = self.reaper.take() {
            reaper.stop().await;
        }

        let closed = self.registry.shutdown().await;
        debug!(closed, "Sessions closed");

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "Failed to remove IPC socket");
            }
        }

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Address the WebSocket gateway is bound to, once started.
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_addr
    }

    /// Path of the IPC control socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry<C>> {
        &self.registry
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &Arc<Gateway<C, StaticDirectory>> {
        &self.gateway
    }

    /// Cancelled when a stop is requested over IPC.
    pub fn stop_requested(&self) -> CancellationToken {
        self.stop_requested.clone()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

//! # rigterm Daemon Library
//!
//! This crate bridges browser terminals to interactive SSH shells on remote
//! rigs.
//!
//! ## Overview
//!
//! The daemon keeps a registry of remote shell sessions. A session is opened
//! by hostname through the control plane (the IPC socket used by the CLI),
//! then a browser attaches to it over a WebSocket at `/ssh/ws/<session-id>`.
//! Keystrokes flow to the remote shell and shell output flows back as JSON
//! frames. Sessions idle for too long are reaped in the background.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                        │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │ WebSocket Server │  │   IPC Handler    │  │    Reaper    │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └──────┬───────┘  │
//! │           └──────────┬──────────┘                   │          │
//! │              ┌───────┴───────┐                      │          │
//! │              │    Gateway    │                      │          │
//! │              └───────┬───────┘                      │          │
//! │  ┌───────────────────┴──────────────────────────────┴───────┐  │
//! │  │                    Session Registry                      │  │
//! │  └───────────────────────────┬──────────────────────────────┘  │
//! │                   ┌──────────┴──────────┐                      │
//! │                   │  Session ── Relay   │ ◄── SSH shell         │
//! │                   └─────────────────────┘                      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rigterm::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Browsers can now attach to sessions created over IPC.
//!     tokio::signal::ctrl_c().await?;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`directory`]: Hostname to address and login user resolution
//! - [`session`]: Remote shell sessions, the registry and the reaper
//! - [`gateway`]: Control operations and the WebSocket terminal transport
//! - [`ipc`]: Unix socket control channel for the CLI
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod directory;
pub mod gateway;
pub mod ipc;
pub mod orchestrator;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export directory types for convenience
pub use directory::{DirectoryError, HostDirectory, StaticDirectory};

// Re-export session types for convenience
pub use session::{
    Reaper, RemoteConnector, RemoteTarget, Session, SessionError, SessionId, SessionRegistry,
    SessionSettings, SshConnector,
};

// Re-export gateway types for convenience
pub use gateway::{Gateway, GatewayError, WebSocketServer};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};

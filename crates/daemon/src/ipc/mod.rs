//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! The CLI uses this channel to create, close and list sessions and to
//! query or stop the daemon. Browsers never talk to it; they only attach to
//! sessions over the WebSocket gateway.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol. Each message is a
//! single JSON object followed by a newline.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/rigterm/daemon.sock`
//! - Fallback: `/tmp/rigterm-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use rigterm::ipc::{get_socket_path, IpcClient};
//! use protocol::CreateSessionRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     let response = client
//!         .create_session(CreateSessionRequest::new("rig-01"))
//!         .await?;
//!     println!("{response:?}");
//!     Ok(())
//! }
//! ```

mod client;
mod handler;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use handler::IpcHandler;
pub use messages::{IpcRequest, IpcResponse};
pub use pidfile::{get_daemon_pid, get_pid_file_path, is_daemon_running, remove_pid_file, write_pid_file};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/rigterm/daemon.sock`
/// 2. Otherwise: `/tmp/rigterm-$UID/daemon.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("rigterm").join("daemon.sock")
    } else {
        // UID of the owner of our own /proc entry
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/rigterm-{}", uid)).join("daemon.sock")
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/rigterm-unsupported/daemon.sock")
}

//! Configuration management for the rigterm daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/rigterm/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("connect_timeout_secs must be between 1 and 300, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("terminal geometry must be at least 1x1, got {cols}x{rows}")]
    InvalidGeometry { cols: u16, rows: u16 },

    #[error("term must not be empty")]
    EmptyTerm,

    #[error("reaper interval_secs must be greater than 0, got {0}")]
    InvalidReaperInterval(u64),

    #[error("reaper max_idle_secs must be greater than 0, got {0}")]
    InvalidMaxIdle(u64),

    #[error("listen_addr must be a socket address like 127.0.0.1:8000, got {0}")]
    InvalidListenAddr(String),

    #[error("path_prefix must start and end with '/', got {0}")]
    InvalidPathPrefix(String),

    #[error("output_queue must be greater than 0, got {0}")]
    InvalidOutputQueue(usize),

    #[error("default_user must not be empty")]
    EmptyDefaultUser,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default address the WebSocket gateway listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";

/// Default URL path prefix for terminal attachments.
pub const DEFAULT_PATH_PREFIX: &str = "/ssh/ws/";

/// Main configuration structure for the rigterm daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// WebSocket gateway configuration.
    pub gateway: GatewayConfig,

    /// Outbound SSH connection settings.
    pub ssh: SshConfig,

    /// Idle session expiry.
    pub reaper: ReaperConfig,

    /// Host directory used to resolve session targets.
    pub directory: DirectoryConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily-rotated log files. Logs go to stderr when unset.
    pub log_dir: Option<PathBuf>,

    /// Control socket path. Defaults to the XDG runtime location.
    pub socket_path: Option<PathBuf>,
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to accept terminal clients on.
    pub listen_addr: String,

    /// URL path prefix; the session id follows it.
    pub path_prefix: String,

    /// Frames buffered per attachment before the relay waits on the client.
    pub output_queue: usize,
}

/// Outbound SSH connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Remote SSH port.
    pub port: u16,

    /// Upper bound on connecting, authenticating and opening the shell.
    pub connect_timeout_secs: u64,

    /// Terminal type requested for the PTY.
    pub term: String,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Quiet period spent discarding the login banner, in milliseconds.
    pub banner_settle_ms: u64,

    /// Offer keys held by the running ssh-agent before the identity files.
    pub use_agent: bool,

    /// Private keys offered in order.
    pub identity_files: Vec<PathBuf>,

    /// SSH keepalive interval (0 disables).
    pub keepalive_secs: u64,
}

/// Idle session expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaperConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,

    /// Sessions unused for longer than this are closed.
    pub max_idle_secs: u64,
}

/// Host directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Login user when nothing else maps one.
    pub default_user: String,

    /// Accept hostnames missing from `hosts` when an address is supplied.
    pub allow_unlisted: bool,

    /// JSON object mapping addresses to login users.
    pub user_mapping_file: Option<PathBuf>,

    /// Known hosts keyed by hostname.
    pub hosts: BTreeMap<String, HostConfig>,
}

/// A single directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HostConfig {
    /// Address to connect to.
    #[serde(default)]
    pub address: Option<String>,

    /// Login user for this host.
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            socket_path: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            output_queue: 256,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout_secs: 10,
            term: "xterm-256color".to_string(),
            cols: 120,
            rows: 30,
            banner_settle_ms: 500,
            use_agent: true,
            identity_files: default_identity_files(),
            keepalive_secs: 30,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,  // 10 minutes
            max_idle_secs: 7200, // 2 hours
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            default_user: "root".to_string(),
            allow_unlisted: false,
            user_mapping_file: None,
            hosts: BTreeMap::new(),
        }
    }
}

impl SshConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Banner settle window as a [`Duration`].
    pub fn banner_settle(&self) -> Duration {
        Duration::from_millis(self.banner_settle_ms)
    }

    /// Keepalive interval, `None` when disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}

impl ReaperConfig {
    /// Sweep interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Idle threshold as a [`Duration`].
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rigterm")
        .join("config.toml")
}

/// Returns the conventional private key locations under `~/.ssh`.
fn default_identity_files() -> Vec<PathBuf> {
    let ssh_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh");
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - RIGTERM_LISTEN_ADDR: Override the gateway listen address
    /// - RIGTERM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RIGTERM_LISTEN_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.gateway.listen_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("RIGTERM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ssh = &self.ssh;
        if ssh.connect_timeout_secs < 1 || ssh.connect_timeout_secs > 300 {
            return Err(ConfigError::InvalidConnectTimeout(ssh.connect_timeout_secs));
        }

        if ssh.cols == 0 || ssh.rows == 0 {
            return Err(ConfigError::InvalidGeometry {
                cols: ssh.cols,
                rows: ssh.rows,
            });
        }

        if ssh.term.trim().is_empty() {
            return Err(ConfigError::EmptyTerm);
        }

        if self.reaper.interval_secs == 0 {
            return Err(ConfigError::InvalidReaperInterval(self.reaper.interval_secs));
        }

        if self.reaper.max_idle_secs == 0 {
            return Err(ConfigError::InvalidMaxIdle(self.reaper.max_idle_secs));
        }

        let gateway = &self.gateway;
        if gateway.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(gateway.listen_addr.clone()));
        }

        if !gateway.path_prefix.starts_with('/') || !gateway.path_prefix.ends_with('/') {
            return Err(ConfigError::InvalidPathPrefix(gateway.path_prefix.clone()));
        }

        if gateway.output_queue == 0 {
            return Err(ConfigError::InvalidOutputQueue(gateway.output_queue));
        }

        if self.directory.default_user.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultUser);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Control socket path, falling back to the XDG runtime location.
    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .clone()
            .unwrap_or_else(crate::ipc::get_socket_path)
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

//! rigterm daemon
//!
//! Bridges browser terminals to SSH shells on remote rigs.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand};
use protocol::{CreateSessionRequest, SessionListing};
use rigterm::config::Config;
use rigterm::ipc::{
    get_daemon_pid, get_pid_file_path, is_daemon_running, remove_pid_file, write_pid_file,
    IpcClient, IpcResponse,
};
use rigterm::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// rigterm - browser terminals for remote rigs.
#[derive(Parser, Debug)]
#[command(name = "rigterm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the daemon in the foreground
    Start,

    /// Stop the running daemon
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// Manage remote shell sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all registered sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Open a session to a host
    Create {
        /// Host name as listed in the directory
        hostname: String,

        /// Address to connect to when the directory has none
        #[arg(long, short)]
        address: Option<String>,

        /// Login user, overriding the directory mapping
        #[arg(long, short)]
        user: Option<String>,
    },

    /// Close a session
    Close {
        /// Session ID to close
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    let log_to_file = matches!(cli.command, Commands::Start);
    let _guard = init_tracing(cli.verbose, &config, log_to_file)?;

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    let socket_path = config.socket_path();

    match cli.command {
        Commands::Start => run_daemon(config).await?,
        Commands::Stop { force, timeout } => {
            tracing::info!("Stopping daemon (force: {})", force);

            let result = if force {
                force_stop_daemon(&socket_path)
            } else {
                graceful_stop_daemon(&socket_path, timeout).await
            };

            match result {
                Ok(()) => println!("Daemon stopped successfully"),
                Err(e) => {
                    eprintln!("Failed to stop daemon: {e:#}");
                    if !force {
                        eprintln!("Try: rigterm stop --force");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => match connect(&socket_path).await?.status().await? {
            IpcResponse::Status {
                running,
                uptime_secs,
                session_count,
                listen_addr,
            } => {
                println!(
                    "Daemon Status: {}",
                    if running { "running" } else { "stopped" }
                );
                println!("  Uptime:   {}", format_duration(uptime_secs));
                println!("  Sessions: {}", session_count);
                println!("  Gateway:  ws://{}", listen_addr);
            }
            other => return Err(unexpected(other)),
        },
        Commands::Sessions(cmd) => run_sessions_command(&socket_path, cmd).await?,
    }

    Ok(())
}

/// Set up logging. `RUST_LOG` wins over `--verbose`, which wins over the
/// configured level.
fn init_tracing(
    verbose: bool,
    config: &Config,
    log_to_file: bool,
) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match config.daemon.log_dir.as_deref().filter(|_| log_to_file) {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "rigterm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

/// Run the daemon until a signal arrives or a client asks it to stop.
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    if is_daemon_running() {
        let pid = get_daemon_pid().unwrap_or(0);
        eprintln!("Error: Daemon already running (PID: {})", pid);
        eprintln!();
        eprintln!("To stop the existing daemon, run:");
        eprintln!("  rigterm stop");
        std::process::exit(1);
    }

    let mut orchestrator = DaemonOrchestrator::new(config)?;
    orchestrator.start().await?;

    if let Err(e) = write_pid_file() {
        orchestrator.stop().await?;
        return Err(e).context("Failed to write PID file");
    }

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::GatewayListening { addr } => {
                    tracing::info!("Terminal gateway listening on ws://{}", addr);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    if let Some(addr) = orchestrator.gateway_addr() {
        tracing::info!("rigterm running, gateway on ws://{}", addr);
    }

    let stop_requested = orchestrator.stop_requested();
    tokio::select! {
        result = wait_for_shutdown_signal() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signals: {}", e);
            }
        }
        _ = stop_requested.cancelled() => {
            tracing::info!("Stop requested by client");
        }
    }

    let stopped = orchestrator.stop().await;
    remove_pid_file();
    stopped
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}

async fn connect(socket_path: &Path) -> anyhow::Result<IpcClient> {
    IpcClient::connect(socket_path)
        .await
        .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))
}

fn unexpected(response: IpcResponse) -> anyhow::Error {
    match response {
        IpcResponse::Error { message } => anyhow::anyhow!("Daemon returned error: {}", message),
        other => anyhow::anyhow!("Unexpected response from daemon: {:?}", other),
    }
}

async fn run_sessions_command(socket_path: &Path, cmd: SessionsCommands) -> anyhow::Result<()> {
    let mut client = connect(socket_path).await?;

    match cmd {
        SessionsCommands::List { json } => match client.list_sessions().await? {
            IpcResponse::Sessions(listing) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                } else {
                    print_sessions_table(&listing);
                }
            }
            other => return Err(unexpected(other)),
        },
        SessionsCommands::Create {
            hostname,
            address,
            user,
        } => {
            let mut request = CreateSessionRequest::new(hostname);
            if let Some(address) = address {
                request = request.with_address(address);
            }
            if let Some(user) = user {
                request = request.with_user(user);
            }

            match client.create_session(request).await? {
                IpcResponse::SessionCreated(created) => {
                    println!("Session {} ({})", created.session_id, created.status);
                    println!(
                        "  {}@{} ({})",
                        created.user, created.address, created.hostname
                    );
                }
                other => return Err(unexpected(other)),
            }
        }
        SessionsCommands::Close { session_id } => match client.close_session(session_id).await? {
            IpcResponse::SessionClosed(closed) => {
                println!("Session {} closed", closed.session_id);
            }
            other => return Err(unexpected(other)),
        },
    }

    Ok(())
}

/// Print sessions in a formatted ASCII table.
fn print_sessions_table(listing: &SessionListing) {
    if listing.sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let id_width = listing.sessions.keys().map(String::len).max().unwrap_or(8).max(8);
    let host_width = listing
        .sessions
        .values()
        .map(|s| s.hostname.len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!(
        "{:<id_width$}  {:<host_width$}  {:<10}  {:<8}  {:>10}",
        "ID", "HOST", "STATUS", "ATTACHED", "LAST USED",
    );
    println!("{}", "-".repeat(id_width + host_width + 38));

    for (id, session) in &listing.sessions {
        println!(
            "{:<id_width$}  {:<host_width$}  {:<10}  {:<8}  {:>10}",
            id,
            session.hostname,
            session.status.as_str(),
            if session.attached { "yes" } else { "no" },
            format_relative_time(session.last_used_at),
        );
    }

    println!();
    println!("Total: {} session(s)", listing.total);
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(timestamp);

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Gracefully stop the daemon via IPC and wait for its socket to go away.
async fn graceful_stop_daemon(socket_path: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    let mut client = connect(socket_path).await?;

    println!("Sending shutdown request...");
    match client.stop().await? {
        IpcResponse::Stopping => {
            println!("Shutdown acknowledged, waiting for daemon to exit...");
        }
        other => return Err(unexpected(other)),
    }

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }

        if IpcClient::connect_with_timeout(socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("Timeout waiting for daemon to exit ({}s)", timeout_secs)
}

/// Force stop the daemon using SIGKILL.
fn force_stop_daemon(socket_path: &Path) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = get_daemon_pid().context("Daemon PID file not found - is the daemon running?")?;
    let raw = i32::try_from(pid).context("PID out of range")?;

    kill(Pid::from_raw(raw), Signal::SIGKILL)
        .with_context(|| format!("Failed to kill daemon (PID {})", pid))?;
    println!("Sent SIGKILL to daemon (PID {})", pid);

    let _ = std::fs::remove_file(get_pid_file_path());
    let _ = std::fs::remove_file(socket_path);

    Ok(())
}

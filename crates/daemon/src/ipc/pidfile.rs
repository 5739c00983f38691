//! PID file handling for daemon running detection.
//!
//! The PID file lives at:
//! - `$XDG_DATA_HOME/rigterm/daemon.pid` if XDG_DATA_HOME is set
//! - `~/.local/share/rigterm/daemon.pid` otherwise
//!
//! ```rust,no_run
//! use rigterm::ipc::pidfile::{get_daemon_pid, is_daemon_running};
//!
//! if is_daemon_running() {
//!     println!("rigterm is running with PID {:?}", get_daemon_pid());
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Path of the daemon PID file.
pub fn get_pid_file_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_dir.join("rigterm").join("daemon.pid")
}

/// Returns true if the PID file names a live process.
pub fn is_daemon_running() -> bool {
    get_daemon_pid().is_some()
}

/// PID of the running daemon, if any. Stale PID files are removed.
pub fn get_daemon_pid() -> Option<u32> {
    read_live_pid(&get_pid_file_path())
}

/// Record the current process as the running daemon.
pub fn write_pid_file() -> io::Result<PathBuf> {
    let path = get_pid_file_path();
    write_pid_at(&path, std::process::id())?;
    Ok(path)
}

/// Remove the PID file if it still names this process.
pub fn remove_pid_file() {
    let path = get_pid_file_path();
    if read_pid_at(&path) == Some(std::process::id()) {
        let _ = fs::remove_file(&path);
    }
}

fn write_pid_at(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{pid}\n"))
}

fn read_pid_at(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_live_pid(path: &Path) -> Option<u32> {
    if !path.exists() {
        return None;
    }

    match read_pid_at(path) {
        Some(pid) if is_process_running(pid) => Some(pid),
        _ => {
            // unreadable, garbage, or the process is gone
            let _ = fs::remove_file(path);
            None
        }
    }
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}/stat", pid)).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid).is_ok_and(|pid| kill(Pid::from_raw(pid), None).is_ok())
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

//! PID file utilities for daemon running detection.
//!
//! Only one daemon may own a data directory at a time: the startup
//! reconciler terminates every bridge process it finds, which would tear
//! down a second instance's bridges. `serve` therefore takes the pidfile
//! at `<data_dir>/termdeck.pid` before touching anything else.
//!
//! ## Example
//!
//! ```rust
//! use daemon::pidfile::{running_pid, PidFile};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("termdeck.pid");
//!
//! let guard = PidFile::acquire(&path).unwrap();
//! assert_eq!(running_pid(&path), Some(std::process::id()));
//! drop(guard);
//! assert!(!path.exists());
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;

/// Errors raised while taking the pidfile.
#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("another termdeck daemon is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to write pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Holds the pidfile for the lifetime of the daemon; removes it on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current pid to `path`.
    ///
    /// Fails with [`PidFileError::AlreadyRunning`] when the file names a
    /// live process. A stale file is replaced.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, PidFileError> {
        let path = path.as_ref().to_path_buf();

        if let Some(pid) = running_pid(&path) {
            if pid != std::process::id() {
                return Err(PidFileError::AlreadyRunning(pid));
            }
        }

        let io_err = |source| PidFileError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, format!("{}\n", std::process::id())).map_err(io_err)?;

        tracing::debug!(path = %path.display(), "pid file written");
        Ok(Self { path })
    }

    /// Location of the held pidfile.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if running_pid(&self.path) == Some(std::process::id()) {
            cleanup_stale_pid_file(&self.path);
        }
    }
}

/// Get the PID of the running daemon, if any.
///
/// Returns `Some(pid)` if the file exists, parses and names a live process.
/// Automatically cleans up stale or unreadable PID files.
pub fn running_pid(path: impl AsRef<Path>) -> Option<u32> {
    let path = path.as_ref();

    let pid_str = fs::read_to_string(path).ok()?;

    let pid: u32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => {
            cleanup_stale_pid_file(path);
            return None;
        }
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

/// Check if a process with the given PID is running.
///
/// Uses `kill(pid, 0)`: no signal is delivered, only existence and
/// permission are checked. `EPERM` means the process exists but belongs
/// to someone else.
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Remove a stale PID file.
fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

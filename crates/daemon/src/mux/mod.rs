//! External terminal multiplexer.
//!
//! The multiplexer owns the real pseudo-terminals and is the only authority
//! on whether a session exists. Everything here is a thin, blocking wrapper
//! around its command-line protocol; callers decide which failures matter.

pub mod tmux;

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub use tmux::TmuxMultiplexer;

/// Failure of a call to an external program.
#[derive(Debug, Error)]
pub enum ExternalError {
    /// The program could not be started (missing binary, permissions).
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program did not finish in time and was killed.
    #[error("{program} {action} timed out after {timeout:?}")]
    Timeout {
        program: String,
        action: String,
        timeout: Duration,
    },

    /// The program ran and reported failure.
    #[error("{program} {action} failed ({status}): {stderr}")]
    Failed {
        program: String,
        action: String,
        status: String,
        stderr: String,
    },
}

/// One row of the multiplexer's session listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSession {
    pub name: String,
    /// Creation time, Unix seconds.
    pub created: Option<u64>,
    pub windows: u32,
    pub attached: bool,
}

/// Command-line protocol of the terminal multiplexer.
///
/// Implementations block the calling thread. They must be shareable across
/// the registry's worker threads.
pub trait Multiplexer: Send + Sync {
    /// All sessions the multiplexer knows about. No running server is an
    /// empty list, not an error.
    fn list_sessions(&self) -> Result<Vec<MuxSession>, ExternalError>;

    /// Whether a session with exactly this name exists.
    fn has_session(&self, name: &str) -> bool;

    /// Create a detached session running the default shell in `workdir`.
    fn new_session(&self, name: &str, workdir: &Path) -> Result<(), ExternalError>;

    /// Toggle mouse support for one session.
    fn set_mouse(&self, name: &str, enabled: bool) -> Result<(), ExternalError>;

    /// Raw title of the session's active pane, if it can be read.
    fn pane_title(&self, name: &str) -> Option<String>;

    fn rename_session(&self, old: &str, new: &str) -> Result<(), ExternalError>;

    fn kill_session(&self, name: &str) -> Result<(), ExternalError>;

    /// Type `text` literally into the session, followed by Enter.
    fn send_line(&self, name: &str, text: &str) -> Result<(), ExternalError>;
}

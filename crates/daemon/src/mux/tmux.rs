//! tmux adapter.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{ExternalError, Multiplexer, MuxSession};
use crate::config::MultiplexerConfig;

/// Interval between `try_wait` polls while a call is in flight.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Format string for `list-sessions`.
const LIST_FORMAT: &str = "#{session_name}|#{session_created}|#{session_windows}|#{session_attached}";

/// Output of a finished call.
#[derive(Debug)]
pub(crate) struct CallOutput {
    pub stdout: String,
}

/// Talks to a tmux server by running the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    program: String,
    socket_name: Option<String>,
    timeout: Duration,
}

impl TmuxMultiplexer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            socket_name: None,
            timeout,
        }
    }

    pub fn from_config(config: &MultiplexerConfig) -> Self {
        Self {
            program: config.program.clone(),
            socket_name: config.socket_name.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Use a dedicated server (`tmux -L <name>`).
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    /// Arguments every invocation starts with.
    fn base_args(&self) -> Vec<String> {
        match &self.socket_name {
            Some(socket) => vec!["-L".to_string(), socket.clone()],
            None => Vec::new(),
        }
    }

    /// Run one tmux command, killing it when it exceeds the timeout.
    pub(crate) fn call(&self, args: &[&str]) -> Result<CallOutput, ExternalError> {
        let action = args.first().copied().unwrap_or_default().to_string();

        let mut child = Command::new(&self.program)
            .args(self.base_args())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExternalError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drained while waiting so a full pipe cannot stall the child
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(program = %self.program, %action, "external call timed out");
                    return Err(ExternalError::Timeout {
                        program: self.program.clone(),
                        action,
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(ExternalError::Spawn {
                        program: self.program.clone(),
                        source,
                    })
                }
            }
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if status.success() {
            Ok(CallOutput { stdout })
        } else {
            Err(ExternalError::Failed {
                program: self.program.clone(),
                action,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

/// Read a pipe to its end on a separate thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<thread::JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Exact-match session target. A bare name is a prefix match in tmux.
fn session_target(name: &str) -> String {
    format!("={name}")
}

/// Active pane of an exactly-named session.
fn pane_target(name: &str) -> String {
    format!("={name}:")
}

/// Whether a failed call just means there is no server to talk to.
fn is_no_server(err: &ExternalError) -> bool {
    match err {
        ExternalError::Failed { stderr, .. } => {
            stderr.contains("no server running")
                || stderr.contains("error connecting to")
                || stderr.contains("No such file or directory")
        }
        _ => false,
    }
}

/// Parse `list-sessions` output produced with [`LIST_FORMAT`].
///
/// Fields are split from the right so a `|` inside a name survives.
pub(crate) fn parse_list_output(output: &str) -> Vec<MuxSession> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.rsplitn(4, '|');
            let attached = fields.next()?;
            let windows = fields.next()?;
            let created = fields.next()?;
            let name = fields.next()?;
            if name.is_empty() {
                return None;
            }
            Some(MuxSession {
                name: name.to_string(),
                created: created.trim().parse().ok(),
                windows: windows.trim().parse().unwrap_or(0),
                attached: attached.trim().parse::<u32>().map(|n| n > 0).unwrap_or(false),
            })
        })
        .collect()
}

impl Multiplexer for TmuxMultiplexer {
    fn list_sessions(&self) -> Result<Vec<MuxSession>, ExternalError> {
        match self.call(&["list-sessions", "-F", LIST_FORMAT]) {
            Ok(out) => Ok(parse_list_output(&out.stdout)),
            Err(e) if is_no_server(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn has_session(&self, name: &str) -> bool {
        self.call(&["has-session", "-t", &session_target(name)])
            .is_ok()
    }

    fn new_session(&self, name: &str, workdir: &Path) -> Result<(), ExternalError> {
        let workdir = workdir.to_string_lossy();
        self.call(&["new-session", "-d", "-s", name, "-c", &workdir])?;
        Ok(())
    }

    fn set_mouse(&self, name: &str, enabled: bool) -> Result<(), ExternalError> {
        let value = if enabled { "on" } else { "off" };
        self.call(&["set-option", "-t", &session_target(name), "mouse", value])?;
        Ok(())
    }

    fn pane_title(&self, name: &str) -> Option<String> {
        self.call(&["display-message", "-t", &pane_target(name), "-p", "#{pane_title}"])
            .ok()
            .map(|out| out.stdout.trim().to_string())
    }

    fn rename_session(&self, old: &str, new: &str) -> Result<(), ExternalError> {
        self.call(&["rename-session", "-t", &session_target(old), new])?;
        Ok(())
    }

    fn kill_session(&self, name: &str) -> Result<(), ExternalError> {
        self.call(&["kill-session", "-t", &session_target(name)])?;
        Ok(())
    }

    fn send_line(&self, name: &str, text: &str) -> Result<(), ExternalError> {
        let target = pane_target(name);
        self.call(&["send-keys", "-t", &target, "-l", text])?;
        self.call(&["send-keys", "-t", &target, "Enter"])?;
        Ok(())
    }
}

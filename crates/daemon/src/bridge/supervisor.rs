//! Supervision of bridge processes.
//!
//! One bridge per visible session exposes that session's terminal on a
//! local TCP port. Each spawned child is owned by a watcher thread that
//! blocks on `wait()` and reports the exit on a channel; the supervisor
//! drains that channel on every access, so dead bridges are forgotten and
//! reaped without polling. A zero-signal probe backs this up for pids that
//! died between the drain and the lookup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use thiserror::Error;

use super::ports::{PortError, PortPool};
use crate::config::{BridgeConfig, MultiplexerConfig};
use crate::pidfile::is_process_running;

/// How long `stop_all` waits for terminated bridges to be reaped.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Errors from [`BridgeSupervisor::ensure`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Capacity(#[from] PortError),

    #[error("failed to start bridge for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Starts the external bridge program for one session.
pub trait BridgeLauncher: Send + Sync {
    /// Executable the launcher runs; the orphan sweep matches on it.
    fn program(&self) -> &str;

    /// Spawn a bridge serving `session` on `port`.
    fn launch(&self, session: &str, port: u16) -> io::Result<Child>;
}

/// Launches ttyd attached to a multiplexer session.
#[derive(Debug, Clone)]
pub struct TtydLauncher {
    program: String,
    bind_address: String,
    writable: bool,
    theme: BTreeMap<String, String>,
    mux_program: String,
    mux_socket: Option<String>,
}

impl TtydLauncher {
    pub fn from_config(bridge: &BridgeConfig, mux: &MultiplexerConfig) -> Self {
        Self {
            program: bridge.program.clone(),
            bind_address: bridge.bind_address.clone(),
            writable: bridge.writable,
            theme: bridge.theme.clone(),
            mux_program: mux.program.clone(),
            mux_socket: mux.socket_name.clone(),
        }
    }

    /// Arguments after the program name.
    pub fn args(&self, session: &str, port: u16) -> Vec<String> {
        let mut args = Vec::new();
        if self.writable {
            args.push("-W".to_string());
        }
        args.extend([
            "-i".to_string(),
            self.bind_address.clone(),
            "-p".to_string(),
            port.to_string(),
        ]);
        for (key, value) in &self.theme {
            args.push("-t".to_string());
            args.push(format!("theme.{key}={value}"));
        }
        args.push(self.mux_program.clone());
        if let Some(socket) = &self.mux_socket {
            args.push("-L".to_string());
            args.push(socket.clone());
        }
        args.extend([
            "attach-session".to_string(),
            "-t".to_string(),
            format!("={session}"),
        ]);
        args
    }
}

impl BridgeLauncher for TtydLauncher {
    fn program(&self) -> &str {
        &self.program
    }

    fn launch(&self, session: &str, port: u16) -> io::Result<Child> {
        Command::new(&self.program)
            .args(self.args(session, port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
    }
}

/// A bridge observed to have exited.
#[derive(Debug)]
pub struct BridgeExit {
    pub name: String,
    pub pid: u32,
    pub port: u16,
    pub status: Option<ExitStatus>,
}

/// Public view of a live bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub name: String,
    pub pid: u32,
    pub port: u16,
    pub started_at: SystemTime,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    pid: u32,
    port: u16,
    started_at: SystemTime,
}

struct State {
    bridges: HashMap<String, Tracked>,
    exits: Receiver<BridgeExit>,
}

impl State {
    /// Forget every bridge whose watcher reported an exit.
    fn drain_exits(&mut self) {
        while let Ok(exit) = self.exits.try_recv() {
            self.forget_pid(exit.pid);
        }
    }

    fn forget_pid(&mut self, pid: u32) {
        self.bridges.retain(|name, tracked| {
            if tracked.pid == pid {
                tracing::debug!(session = %name, pid, port = tracked.port, "dropping exited bridge");
                false
            } else {
                true
            }
        });
    }

    /// Live record for `name`, clearing it if the pid is gone.
    fn live(&mut self, name: &str) -> Option<Tracked> {
        self.drain_exits();
        let tracked = *self.bridges.get(name)?;
        if is_process_running(tracked.pid) {
            Some(tracked)
        } else {
            tracing::debug!(session = %name, pid = tracked.pid, "bridge pid is gone");
            self.bridges.remove(name);
            None
        }
    }

    fn ports_in_use(&mut self) -> HashSet<u16> {
        let names: Vec<String> = self.bridges.keys().cloned().collect();
        names
            .iter()
            .filter_map(|name| self.live(name))
            .map(|tracked| tracked.port)
            .collect()
    }
}

/// Owns every bridge process this daemon started.
pub struct BridgeSupervisor {
    launcher: Arc<dyn BridgeLauncher>,
    pool: PortPool,
    exit_tx: Sender<BridgeExit>,
    state: Mutex<State>,
}

impl BridgeSupervisor {
    pub fn new(launcher: Arc<dyn BridgeLauncher>, pool: PortPool) -> Self {
        let (exit_tx, exits) = mpsc::channel();
        Self {
            launcher,
            pool,
            exit_tx,
            state: Mutex::new(State {
                bridges: HashMap::new(),
                exits,
            }),
        }
    }

    /// Executable of the bridges this supervisor starts.
    pub fn program(&self) -> &str {
        self.launcher.program()
    }

    pub fn pool(&self) -> &PortPool {
        &self.pool
    }

    /// Port of the live bridge for `name`, starting one if needed.
    ///
    /// Idempotent while the bridge lives. The supervisor lock is held across
    /// the spawn, so concurrent callers for the same name get one process.
    pub fn ensure(&self, name: &str) -> Result<u16, BridgeError> {
        let mut state = self.state.lock();

        if let Some(tracked) = state.live(name) {
            return Ok(tracked.port);
        }

        let in_use = state.ports_in_use();
        let port = self.pool.allocate(&in_use)?;

        let mut child = self
            .launcher
            .launch(name, port)
            .map_err(|source| BridgeError::Spawn {
                name: name.to_string(),
                source,
            })?;
        let pid = child.id();

        let tx = self.exit_tx.clone();
        let session = name.to_string();
        let watcher = thread::Builder::new()
            .name(format!("bridge-{port}"))
            .spawn(move || {
                let status = child.wait().ok();
                tracing::info!(session = %session, pid, port, ?status, "bridge exited");
                let _ = tx.send(BridgeExit {
                    name: session,
                    pid,
                    port,
                    status,
                });
            });
        if let Err(source) = watcher {
            terminate(pid);
            return Err(BridgeError::Spawn {
                name: name.to_string(),
                source,
            });
        }

        state.bridges.insert(
            name.to_string(),
            Tracked {
                pid,
                port,
                started_at: SystemTime::now(),
            },
        );
        tracing::info!(session = %name, pid, port, "bridge started");
        Ok(port)
    }

    /// Port of the live bridge for `name`, without starting one.
    pub fn port(&self, name: &str) -> Option<u16> {
        self.state.lock().live(name).map(|tracked| tracked.port)
    }

    /// Terminate the bridge for `name`. A missing bridge is a no-op.
    pub fn stop(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        state.drain_exits();
        match state.bridges.remove(name) {
            Some(tracked) => {
                terminate(tracked.pid);
                tracing::info!(session = %name, pid = tracked.pid, port = tracked.port, "bridge stopped");
                true
            }
            None => false,
        }
    }

    /// Move the record for `old` to `new`. Returns whether one was moved.
    ///
    /// A bridge already recorded under `new` is terminated.
    pub fn rename(&self, old: &str, new: &str) -> bool {
        let mut state = self.state.lock();
        state.drain_exits();
        let Some(tracked) = state.bridges.remove(old) else {
            return false;
        };
        if let Some(displaced) = state.bridges.insert(new.to_string(), tracked) {
            terminate(displaced.pid);
            tracing::info!(
                session = %new,
                pid = displaced.pid,
                port = displaced.port,
                "displaced bridge stopped"
            );
        }
        true
    }

    /// Terminate every tracked bridge and wait briefly for them to be reaped.
    ///
    /// Returns the number of bridges signalled.
    pub fn stop_all(&self) -> usize {
        let mut state = self.state.lock();
        state.drain_exits();

        let mut pending: HashSet<u32> = HashSet::new();
        for (name, tracked) in state.bridges.drain() {
            terminate(tracked.pid);
            tracing::debug!(session = %name, pid = tracked.pid, "bridge terminated");
            pending.insert(tracked.pid);
        }
        let count = pending.len();

        let deadline = Instant::now() + STOP_GRACE;
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match state.exits.recv_timeout(remaining) {
                Ok(exit) => {
                    pending.remove(&exit.pid);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if !pending.is_empty() {
            tracing::warn!(remaining = pending.len(), "bridges still running after stop");
        }

        count
    }

    /// Live bridges, sorted by session name.
    pub fn snapshot(&self) -> Vec<BridgeInfo> {
        let mut state = self.state.lock();
        let names: Vec<String> = state.bridges.keys().cloned().collect();
        let mut bridges: Vec<BridgeInfo> = names
            .into_iter()
            .filter_map(|name| {
                state.live(&name).map(|tracked| BridgeInfo {
                    name,
                    pid: tracked.pid,
                    port: tracked.port,
                    started_at: tracked.started_at,
                })
            })
            .collect();
        bridges.sort_by(|a, b| a.name.cmp(&b.name));
        bridges
    }

    /// Pids of all tracked bridges.
    pub fn tracked_pids(&self) -> HashSet<u32> {
        let mut state = self.state.lock();
        state.drain_exits();
        state.bridges.values().map(|tracked| tracked.pid).collect()
    }
}

impl Drop for BridgeSupervisor {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for tracked in state.bridges.values() {
            terminate(tracked.pid);
        }
    }
}

/// Send SIGTERM, ignoring a pid that is already gone.
pub(crate) fn terminate(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid, error = %e, "could not signal process");
            false
        }
    }
}

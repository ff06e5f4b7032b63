//! In-process doubles for the external programs.
//!
//! Used by the unit tests and by the integration suite in `tests/`.

use std::collections::HashMap;
use std::io;
use std::ops::{Deref, DerefMut, RangeInclusive};
use std::path::{Path, PathBuf};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bridge::{find_processes, BridgeLauncher, PortPool};
use crate::mux::{ExternalError, Multiplexer, MuxSession};

/// A session held by [`FakeMultiplexer`].
#[derive(Debug, Clone)]
pub struct FakeSession {
    pub name: String,
    pub workdir: PathBuf,
    pub title: Option<String>,
    pub created: u64,
    pub windows: u32,
    pub attached: bool,
    pub mouse: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    sessions: Vec<FakeSession>,
    sent: HashMap<String, Vec<String>>,
    fail_new: bool,
    fail_rename: bool,
    fail_send: bool,
    fail_list: bool,
    new_session_calls: usize,
    clock: u64,
}

/// Multiplexer kept entirely in memory.
///
/// Sessions keep creation order, like tmux's listing. Failure switches make
/// individual calls report [`ExternalError::Failed`].
#[derive(Debug, Default)]
pub struct FakeMultiplexer {
    state: Mutex<FakeState>,
}

fn failed(action: &str, stderr: impl Into<String>) -> ExternalError {
    ExternalError::Failed {
        program: "fake-mux".to_string(),
        action: action.to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.into(),
    }
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session behind the registry's back.
    pub fn insert(&self, name: &str, workdir: impl AsRef<Path>) {
        let mut state = self.state.lock();
        state.clock += 1;
        let created = 1_700_000_000 + state.clock;
        state.sessions.push(FakeSession {
            name: name.to_string(),
            workdir: workdir.as_ref().to_path_buf(),
            title: None,
            created,
            windows: 1,
            attached: false,
            mouse: false,
        });
    }

    /// Override the creation time reported for `name`.
    pub fn set_created(&self, name: &str, created: u64) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.iter_mut().find(|s| s.name == name) {
            session.created = created;
        }
    }

    /// Kill a session behind the registry's back.
    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.name != name);
        state.sessions.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn session(&self, name: &str) -> Option<FakeSession> {
        self.state
            .lock()
            .sessions
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn set_title(&self, name: &str, title: &str) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.iter_mut().find(|s| s.name == name) {
            session.title = Some(title.to_string());
        }
    }

    /// Lines typed into `name` so far.
    pub fn sent_lines(&self, name: &str) -> Vec<String> {
        self.state.lock().sent.get(name).cloned().unwrap_or_default()
    }

    pub fn new_session_calls(&self) -> usize {
        self.state.lock().new_session_calls
    }

    pub fn fail_new_session(&self, fail: bool) {
        self.state.lock().fail_new = fail;
    }

    pub fn fail_rename(&self, fail: bool) {
        self.state.lock().fail_rename = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }
}

impl Multiplexer for FakeMultiplexer {
    fn list_sessions(&self) -> Result<Vec<MuxSession>, ExternalError> {
        let state = self.state.lock();
        if state.fail_list {
            return Err(failed("list-sessions", "server not responding"));
        }
        Ok(state
            .sessions
            .iter()
            .map(|s| MuxSession {
                name: s.name.clone(),
                created: Some(s.created),
                windows: s.windows,
                attached: s.attached,
            })
            .collect())
    }

    fn has_session(&self, name: &str) -> bool {
        self.state.lock().sessions.iter().any(|s| s.name == name)
    }

    fn new_session(&self, name: &str, workdir: &Path) -> Result<(), ExternalError> {
        {
            let mut state = self.state.lock();
            state.new_session_calls += 1;
            if state.fail_new {
                return Err(failed("new-session", "create window failed"));
            }
            if state.sessions.iter().any(|s| s.name == name) {
                return Err(failed("new-session", format!("duplicate session: {name}")));
            }
        }
        self.insert(name, workdir);
        Ok(())
    }

    fn set_mouse(&self, name: &str, enabled: bool) -> Result<(), ExternalError> {
        let mut state = self.state.lock();
        match state.sessions.iter_mut().find(|s| s.name == name) {
            Some(session) => {
                session.mouse = enabled;
                Ok(())
            }
            None => Err(failed("set-option", format!("no such session: {name}"))),
        }
    }

    fn pane_title(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.title.clone().unwrap_or_default())
    }

    fn rename_session(&self, old: &str, new: &str) -> Result<(), ExternalError> {
        let mut state = self.state.lock();
        if state.fail_rename {
            return Err(failed("rename-session", "refused"));
        }
        if state.sessions.iter().any(|s| s.name == new) {
            return Err(failed("rename-session", format!("duplicate session: {new}")));
        }
        match state.sessions.iter_mut().find(|s| s.name == old) {
            Some(session) => {
                session.name = new.to_string();
                Ok(())
            }
            None => Err(failed("rename-session", format!("can't find session: {old}"))),
        }
    }

    fn kill_session(&self, name: &str) -> Result<(), ExternalError> {
        if self.remove(name) {
            Ok(())
        } else {
            Err(failed("kill-session", format!("can't find session: {name}")))
        }
    }

    fn send_line(&self, name: &str, text: &str) -> Result<(), ExternalError> {
        let mut state = self.state.lock();
        if state.fail_send {
            return Err(failed("send-keys", "not a terminal"));
        }
        if !state.sessions.iter().any(|s| s.name == name) {
            return Err(failed("send-keys", format!("can't find pane: {name}")));
        }
        state
            .sent
            .entry(name.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}

/// Bridge launcher that runs `sleep` in place of a real bridge.
///
/// The children are real processes, so liveness probes, exit watchers and
/// signals behave as in production. Each launcher gives its children a
/// unique `argv[0]`, which is also what [`BridgeLauncher::program`] reports,
/// so an orphan sweep only ever matches this launcher's processes.
#[derive(Debug)]
pub struct SleepLauncher {
    program: String,
    executable: String,
    launches: AtomicUsize,
}

static NEXT_LAUNCHER: AtomicUsize = AtomicUsize::new(0);

impl SleepLauncher {
    pub fn new() -> Self {
        let n = NEXT_LAUNCHER.fetch_add(1, Ordering::SeqCst);
        Self {
            program: format!("td-bridge-{}-{}", std::process::id(), n),
            executable: "sleep".to_string(),
            launches: AtomicUsize::new(0),
        }
    }

    /// A launcher whose program does not exist.
    pub fn failing() -> Self {
        Self {
            program: "termdeck-missing-bridge".to_string(),
            executable: "/nonexistent/termdeck-bridge".to_string(),
            launches: AtomicUsize::new(0),
        }
    }

    /// Start an untracked process that looks like one of this launcher's
    /// bridges, as if left behind by a previous run.
    ///
    /// Returns once the process shows up under [`BridgeLauncher::program`].
    pub fn spawn_stray(&self) -> io::Result<ChildGuard> {
        let stray = ChildGuard::new(self.command().spawn()?);
        if !await_process(&self.program, stray.id()) {
            return Err(io::Error::other("stray bridge never became visible"));
        }
        Ok(stray)
    }

    /// Number of processes started through [`BridgeLauncher::launch`].
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg0(&self.program)
            .arg("300")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl Default for SleepLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeLauncher for SleepLauncher {
    fn program(&self) -> &str {
        &self.program
    }

    fn launch(&self, _session: &str, _port: u16) -> io::Result<Child> {
        let child = self.command().spawn()?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(child)
    }
}

/// A child process that is killed and reaped when dropped.
#[derive(Debug)]
pub struct ChildGuard(Child);

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        Self(child)
    }
}

impl Deref for ChildGuard {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.0
    }
}

impl DerefMut for ChildGuard {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.0
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Wait until `pid` is listed as running `program`.
///
/// A freshly spawned child can be observed before its new command line is
/// in place, so scans poll for a while.
pub fn await_process(program: &str, pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if find_processes(program).contains(&pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

static NEXT_PORT: AtomicU16 = AtomicU16::new(0);

/// A run of `len` consecutive loopback ports that were free when probed.
///
/// Successive calls in one process hand out disjoint regions.
pub fn free_port_range(len: u16) -> RangeInclusive<u16> {
    let base = 30_000 + (std::process::id() % 200) as u16 * 100;
    let probe = PortPool::new(1..=1, std::net::Ipv4Addr::LOCALHOST.into());

    loop {
        let offset = NEXT_PORT.fetch_add(len, Ordering::SeqCst);
        let start = base.wrapping_add(offset);
        if start < 20_000 || start > 60_000 {
            panic!("ran out of test ports");
        }
        if (start..start + len).all(|port| probe.is_bindable(port)) {
            return start..=start + len - 1;
        }
    }
}

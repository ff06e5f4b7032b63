//! The session registry.
//!
//! Maps a logical session name to its multiplexer session, its bridge process
//! and its stored metadata, and keeps the three consistent with the
//! multiplexer's view of which sessions exist.
//!
//! All in-memory state sits behind one coarse lock. Mutations hold it across
//! their external calls, which serializes name generation. [`SessionRegistry::list`]
//! reads ground truth without the lock and retries when a mutation committed
//! in the meantime.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use protocol::{SessionMode, SessionType, SessionView};
use thiserror::Error;

use super::naming::{generate_name, is_valid_name};
use super::startup::{is_safe_resume_id, StartupCommands};
use crate::bridge::{BridgeError, BridgeSupervisor};
use crate::config::MultiplexerConfig;
use crate::mux::{ExternalError, Multiplexer, MuxSession};
use crate::store::{MetadataStore, SessionRecord, StoreError};

/// Attempts at an unlocked ground-truth read before `list` reads it under the lock.
const LIST_ATTEMPTS: usize = 3;

/// Prefix the agent puts in front of its pane titles.
const TITLE_MARKER: char = '\u{2733}';

/// Pane title the multiplexer reports when none was set.
const PLACEHOLDER_TITLE: &str = "Window Title";

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid session name: {0:?}")]
    InvalidName(String),

    #[error("working directory must be an absolute path: {0:?}")]
    InvalidWorkdir(String),

    #[error("invalid resume id: {0:?}")]
    InvalidResumeId(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of the startup command injection during [`SessionRegistry::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupStatus {
    /// The session type runs nothing at startup.
    NotNeeded,
    /// The command was typed into the session.
    Sent,
    /// The session exists, but the command could not be sent.
    Failed(String),
}

/// A newly created session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub name: String,
    pub startup: StartupStatus,
}

/// A session as shown in the listing: ground truth merged with metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalSession {
    pub name: String,
    /// Pane title, falling back to the last stored one.
    pub title: Option<String>,
    /// Empty when the session was created outside termdeck.
    pub workdir: String,
    pub session_type: SessionType,
    pub mode: SessionMode,
    pub resume_id: Option<String>,
    pub port: Option<u16>,
    pub created: Option<u64>,
    pub windows: u32,
    pub attached: bool,
}

impl LogicalSession {
    fn assemble(mux: &MuxSession, record: Option<&SessionRecord>, port: Option<u16>) -> Self {
        Self {
            name: mux.name.clone(),
            title: record.and_then(|r| r.title.clone()),
            workdir: record.map(|r| r.workdir.clone()).unwrap_or_default(),
            session_type: record.map(|r| r.session_type).unwrap_or_default(),
            mode: record.map(|r| r.mode).unwrap_or_default(),
            resume_id: record.and_then(|r| r.resume_id.clone()),
            port,
            created: mux.created,
            windows: mux.windows,
            attached: mux.attached,
        }
    }
}

impl From<LogicalSession> for SessionView {
    fn from(session: LogicalSession) -> Self {
        Self {
            title: session.title.unwrap_or_else(|| session.name.clone()),
            name: session.name,
            workdir: session.workdir,
            session_type: session.session_type,
            mode: session.mode,
            resume_id: session.resume_id,
            port: session.port,
            created: session.created,
            windows: session.windows,
            attached: session.attached,
        }
    }
}

/// Registry behaviour taken from `[multiplexer]`.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Sessions whose names start with one of these are not ours.
    pub ignore_prefixes: Vec<String>,
    /// Turn on mouse mode in new sessions.
    pub mouse: bool,
}

impl RegistryOptions {
    pub fn from_config(config: &MultiplexerConfig) -> Self {
        Self {
            ignore_prefixes: config.ignore_prefixes.clone(),
            mouse: config.mouse,
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from_config(&MultiplexerConfig::default())
    }
}

#[derive(Debug, Default)]
struct State {
    /// Display order. Authoritative in memory; the store copy may lag.
    order: Vec<String>,
    /// The last write of `order` to the store failed.
    order_dirty: bool,
    /// Names the startup reconciler could not recreate. Their metadata is
    /// kept through listings so a later restart can retry them.
    restore_pending: HashSet<String>,
    /// Bumped by every mutation that changes the set of sessions.
    epoch: u64,
}

/// The single authority for creating, renaming, killing and listing sessions.
pub struct SessionRegistry {
    mux: Arc<dyn Multiplexer>,
    bridges: Arc<BridgeSupervisor>,
    store: Arc<MetadataStore>,
    startup: StartupCommands,
    options: RegistryOptions,
    state: Mutex<State>,
}

impl SessionRegistry {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        bridges: Arc<BridgeSupervisor>,
        store: Arc<MetadataStore>,
        startup: StartupCommands,
        options: RegistryOptions,
    ) -> Self {
        let order = store.get_order().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load session order, starting empty");
            Vec::new()
        });
        Self {
            mux,
            bridges,
            store,
            startup,
            options,
            state: Mutex::new(State {
                order,
                ..State::default()
            }),
        }
    }

    pub fn multiplexer(&self) -> &Arc<dyn Multiplexer> {
        &self.mux
    }

    pub fn bridges(&self) -> &Arc<BridgeSupervisor> {
        &self.bridges
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn startup(&self) -> &StartupCommands {
        &self.startup
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Whether `name` belongs to a session this registry ignores.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.options
            .ignore_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }

    /// Keep the metadata of `names` through listings even though the
    /// multiplexer does not have them.
    pub fn protect_pending_restores(&self, names: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock();
        state.restore_pending.extend(names);
    }

    /// Sessions that exist in the multiplexer, minus ignored ones.
    pub fn ground_truth(&self) -> Result<Vec<MuxSession>, RegistryError> {
        let sessions = self.mux.list_sessions()?;
        Ok(sessions
            .into_iter()
            .filter(|s| !self.is_ignored(&s.name))
            .collect())
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// All live sessions in display order.
    ///
    /// Reconciles as a side effect: the order list becomes exactly the live
    /// names (new ones appended), metadata of vanished sessions is pruned,
    /// bridges of vanished sessions are stopped, and every live session gets
    /// a bridge. A failing multiplexer listing is an error and prunes nothing.
    pub fn list(&self) -> Result<Vec<LogicalSession>, RegistryError> {
        let mut attempt = 1;
        let (truth, mut state) = loop {
            if attempt >= LIST_ATTEMPTS {
                let state = self.state.lock();
                break (self.ground_truth()?, state);
            }
            let epoch = self.state.lock().epoch;
            let truth = self.ground_truth()?;
            let state = self.state.lock();
            if state.epoch == epoch {
                break (truth, state);
            }
            drop(state);
            tracing::debug!(attempt, "sessions changed during listing, retrying");
            attempt += 1;
        };

        let live: HashSet<&str> = truth.iter().map(|s| s.name.as_str()).collect();

        let mut seen: HashSet<&str> = HashSet::with_capacity(truth.len());
        let mut order: Vec<String> = Vec::with_capacity(truth.len());
        for name in &state.order {
            if let Some(&live_name) = live.get(name.as_str()) {
                if seen.insert(live_name) {
                    order.push(name.clone());
                }
            }
        }
        // Untracked sessions join oldest first.
        let mut untracked: Vec<&MuxSession> = truth
            .iter()
            .filter(|s| seen.insert(s.name.as_str()))
            .collect();
        untracked.sort_by_key(|s| s.created.unwrap_or(0));
        order.extend(untracked.into_iter().map(|s| s.name.clone()));
        if order != state.order || state.order_dirty {
            state.order = order;
            self.persist_order(&mut state);
        }

        state.restore_pending.retain(|name| !live.contains(name.as_str()));
        let keep: HashSet<String> = live
            .iter()
            .map(|name| name.to_string())
            .chain(state.restore_pending.iter().cloned())
            .collect();
        match self.store.retain(&keep) {
            Ok(dropped) => {
                for name in dropped {
                    tracing::info!(session = %name, "pruned metadata of vanished session");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to prune session metadata"),
        }

        for bridge in self.bridges.snapshot() {
            if !live.contains(bridge.name.as_str()) {
                self.bridges.stop(&bridge.name);
            }
        }

        let records: HashMap<String, SessionRecord> = match self.store.list() {
            Ok(records) => records.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read session metadata");
                HashMap::new()
            }
        };
        let by_name: HashMap<&str, &MuxSession> =
            truth.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut sessions = Vec::with_capacity(state.order.len());
        for name in &state.order {
            let Some(mux) = by_name.get(name.as_str()) else {
                continue;
            };
            let port = match self.bridges.ensure(name) {
                Ok(port) => Some(port),
                Err(e) => {
                    tracing::warn!(session = %name, error = %e, "no bridge for session");
                    None
                }
            };
            sessions.push(LogicalSession::assemble(mux, records.get(name), port));
        }
        drop(state);

        for session in &mut sessions {
            let Some(title) = self.mux.pane_title(&session.name).and_then(|t| clean_title(&t))
            else {
                continue;
            };
            if session.title.as_deref() != Some(title.as_str()) {
                if let Err(e) = self.store.set_title(&session.name, Some(&title)) {
                    tracing::debug!(session = %session.name, error = %e, "failed to store title");
                }
                session.title = Some(title);
            }
        }

        Ok(sessions)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a session of `session_type` in `workdir`.
    ///
    /// The name is generated from ground truth under the registry lock, so
    /// concurrent creates never pick the same name. Failure to create the
    /// multiplexer session is fatal and leaves nothing behind; failure to
    /// send the startup command is reported in [`CreateOutcome::startup`].
    pub fn create(
        &self,
        session_type: SessionType,
        workdir: &str,
        resume_id: Option<&str>,
    ) -> Result<CreateOutcome, RegistryError> {
        if !Path::new(workdir).is_absolute() {
            return Err(RegistryError::InvalidWorkdir(workdir.to_string()));
        }
        if let Some(id) = resume_id {
            if !is_safe_resume_id(id) {
                return Err(RegistryError::InvalidResumeId(id.to_string()));
            }
        }

        let mut state = self.state.lock();

        // Ignored sessions still occupy names.
        let existing = self.mux.list_sessions()?;
        let name = generate_name(
            workdir,
            session_type,
            existing.iter().map(|s| s.name.as_str()),
        );

        self.mux.new_session(&name, Path::new(workdir))?;

        if self.options.mouse {
            if let Err(e) = self.mux.set_mouse(&name, true) {
                tracing::warn!(session = %name, error = %e, "failed to enable mouse mode");
            }
        }

        let startup = match self.startup.for_create(session_type, resume_id) {
            None => StartupStatus::NotNeeded,
            Some(command) => match self.mux.send_line(&name, &command) {
                Ok(()) => StartupStatus::Sent,
                Err(e) => {
                    tracing::warn!(session = %name, error = %e, "failed to send startup command");
                    StartupStatus::Failed(e.to_string())
                }
            },
        };

        let record = SessionRecord::new(workdir, session_type)
            .with_resume_id(resume_id.map(str::to_string));
        // A vanished session may still have metadata under this name.
        if let Err(e) = self.store.replace(&name, &record) {
            tracing::error!(session = %name, error = %e, "failed to store session metadata");
        }

        state.order.retain(|n| n != &name);
        state.order.push(name.clone());
        state.restore_pending.remove(&name);
        self.persist_order(&mut state);
        state.epoch += 1;

        tracing::info!(session = %name, session_type = %session_type, workdir, "session created");
        Ok(CreateOutcome { name, startup })
    }

    /// Rename `old` to `new`.
    ///
    /// The multiplexer rename runs first; when it is refused nothing else
    /// changes and `Ok(false)` is returned. Otherwise the bridge record, the
    /// order slot and the metadata all move to `new`.
    pub fn rename(&self, old: &str, new: &str) -> Result<bool, RegistryError> {
        if !is_valid_name(new) || self.is_ignored(new) {
            return Err(RegistryError::InvalidName(new.to_string()));
        }

        let mut state = self.state.lock();

        if old == new {
            return Ok(self.mux.has_session(old));
        }

        if let Err(e) = self.mux.rename_session(old, new) {
            tracing::warn!(old, new, error = %e, "rename refused");
            return Ok(false);
        }

        self.bridges.rename(old, new);

        state.order.retain(|n| n != new);
        for slot in state.order.iter_mut() {
            if slot == old {
                *slot = new.to_string();
            }
        }
        if state.restore_pending.remove(old) {
            state.restore_pending.insert(new.to_string());
        }

        match self.store.rename(old, new) {
            Ok(_) if !state.order_dirty => {}
            Ok(_) => self.persist_order(&mut state),
            Err(e) => {
                tracing::error!(old, new, error = %e, "failed to move session metadata");
                self.persist_order(&mut state);
            }
        }
        state.epoch += 1;

        tracing::info!(old, new, "session renamed");
        Ok(true)
    }

    /// Stop the bridge, destroy the multiplexer session, and forget `name`.
    ///
    /// Idempotent. Returns whether the multiplexer still had the session.
    pub fn kill(&self, name: &str) -> bool {
        let mut state = self.state.lock();

        self.bridges.stop(name);

        let existed = match self.mux.kill_session(name) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(session = %name, error = %e, "kill-session failed");
                false
            }
        };

        if let Err(e) = self.store.delete(name) {
            tracing::warn!(session = %name, error = %e, "failed to delete session metadata");
        }

        let before = state.order.len();
        state.order.retain(|n| n != name);
        state.restore_pending.remove(name);
        if state.order_dirty || state.order.len() != before {
            self.persist_order(&mut state);
        }
        state.epoch += 1;

        tracing::info!(session = %name, existed, "session killed");
        existed
    }

    /// Replace the display order verbatim. Duplicates keep their first slot.
    ///
    /// Names are not checked against ground truth; the next listing does that.
    pub fn set_order(&self, order: Vec<String>) {
        let mut state = self.state.lock();
        let mut seen = HashSet::new();
        state.order = order
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect();
        self.persist_order(&mut state);
    }

    /// Current display order, as last listed or set.
    pub fn order(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    fn persist_order(&self, state: &mut State) {
        match self.store.set_order(&state.order) {
            Ok(()) => state.order_dirty = false,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist session order, keeping it in memory");
                state.order_dirty = true;
            }
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn get(&self, name: &str) -> Result<Option<SessionRecord>, RegistryError> {
        Ok(self.store.get(name)?)
    }

    /// Returns `false` when `name` has no metadata.
    pub fn set_mode(&self, name: &str, mode: SessionMode) -> Result<bool, RegistryError> {
        Ok(self.store.set_mode(name, mode)?)
    }

    /// Returns `false` when `name` has no metadata.
    pub fn set_resume_id(&self, name: &str, resume_id: Option<&str>) -> Result<bool, RegistryError> {
        if let Some(id) = resume_id {
            if !is_safe_resume_id(id) {
                return Err(RegistryError::InvalidResumeId(id.to_string()));
            }
        }
        Ok(self.store.set_resume_id(name, resume_id)?)
    }

    // =========================================================================
    // Bridges
    // =========================================================================

    /// Port of the live bridge for `name`, without starting one.
    pub fn bridge_port(&self, name: &str) -> Option<u16> {
        self.bridges.port(name)
    }

    /// Port of the bridge for `name`, starting one if needed.
    pub fn ensure_bridge(&self, name: &str) -> Result<u16, RegistryError> {
        let _state = self.state.lock();
        if self.is_ignored(name) || !self.mux.has_session(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(self.bridges.ensure(name)?)
    }
}

/// Human-readable title from a raw pane title, if it carries one.
pub fn clean_title(raw: &str) -> Option<String> {
    let title = raw.trim();
    let title = title.strip_prefix(TITLE_MARKER).unwrap_or(title).trim();
    (!title.is_empty() && title != PLACEHOLDER_TITLE).then(|| title.to_string())
}

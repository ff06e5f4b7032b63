//! Integration tests for the session registry.
//!
//! These tests drive the registry through its public API with an in-memory
//! multiplexer and `sleep` processes standing in for bridges:
//! - Name and port uniqueness
//! - Display order closure over ground truth
//! - Rename atomicity
//! - Bridge reuse, including under concurrent requests
//! - Pruning of sessions removed behind the registry's back
//! - Restart recovery through the startup reconciler

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use daemon::bridge::{find_processes, BridgeLauncher, BridgeSupervisor, PortPool};
use daemon::config::{CommandsConfig, RestorePolicy};
use daemon::session::{reconcile, RegistryOptions, SessionRegistry, StartupCommands};
use daemon::store::{MetadataStore, SessionRecord};
use daemon::testing::{free_port_range, FakeMultiplexer, SleepLauncher};
use protocol::{SessionMode, SessionType};
use tempfile::TempDir;

struct Harness {
    mux: Arc<FakeMultiplexer>,
    launcher: Arc<SleepLauncher>,
    registry: Arc<SessionRegistry>,
}

impl Harness {
    fn new(ports: u16) -> Self {
        Self::with_parts(
            ports,
            MetadataStore::open_in_memory().unwrap(),
            Arc::new(SleepLauncher::new()),
        )
    }

    fn with_parts(ports: u16, store: MetadataStore, launcher: Arc<SleepLauncher>) -> Self {
        let mux = Arc::new(FakeMultiplexer::new());
        let pool = PortPool::new(free_port_range(ports), IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut commands = CommandsConfig::default();
        commands.claude = "claude".to_string();
        commands.claude_resume = "claude --resume {resume_id}".to_string();

        let registry = Arc::new(SessionRegistry::new(
            mux.clone(),
            Arc::new(BridgeSupervisor::new(launcher.clone(), pool)),
            Arc::new(store),
            StartupCommands::new(commands),
            RegistryOptions::default(),
        ));
        Self {
            mux,
            launcher,
            registry,
        }
    }

    fn create(&self, session_type: SessionType, workdir: &str) -> String {
        self.registry.create(session_type, workdir, None).unwrap().name
    }

    fn listed_names(&self) -> Vec<String> {
        self.registry
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }
}

fn wait_for_exit(child: &mut std::process::Child) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while child.try_wait().unwrap().is_none() {
        assert!(Instant::now() < deadline, "process survived the sweep");
        std::thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Uniqueness
// =============================================================================

#[test]
fn test_names_and_ports_are_unique() {
    let h = Harness::new(8);
    let plan = [
        (SessionType::Shell, "/work/app"),
        (SessionType::Shell, "/work/app"),
        (SessionType::Claude, "/work/app"),
        (SessionType::Shell, "/srv/app"),
        (SessionType::Lazygit, "/work/site"),
        (SessionType::Shell, "/work/app/"),
    ];
    let names: Vec<String> = plan.iter().map(|(t, w)| h.create(*t, w)).collect();

    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(unique.len(), names.len(), "duplicate names: {names:?}");

    let sessions = h.registry.list().unwrap();
    let ports: Vec<u16> = sessions.iter().filter_map(|s| s.port).collect();
    assert_eq!(ports.len(), names.len());
    let unique_ports: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(unique_ports.len(), ports.len(), "duplicate ports: {ports:?}");
}

// =============================================================================
// Order closure
// =============================================================================

#[test]
fn test_order_matches_ground_truth_after_list() {
    let h = Harness::new(8);
    let a = h.create(SessionType::Shell, "/work/a");
    let b = h.create(SessionType::Shell, "/work/b");
    let c = h.create(SessionType::Shell, "/work/c");

    h.registry.set_order(vec![
        c.clone(),
        "gone".to_string(),
        a.clone(),
        c.clone(),
        b.clone(),
    ]);

    // Appears and disappears behind the registry's back
    h.mux.insert("external", "/tmp");
    h.mux.remove(&a);

    let listed = h.listed_names();
    let order = h.registry.order();
    assert_eq!(order, listed);
    assert_eq!(order, vec![c.clone(), b.clone(), "external".to_string()]);

    let live: HashSet<String> = h.mux.names().into_iter().collect();
    let ordered: HashSet<String> = order.iter().cloned().collect();
    assert_eq!(ordered, live);
}

// =============================================================================
// Rename atomicity
// =============================================================================

#[test]
fn test_failed_rename_changes_nothing() {
    let h = Harness::new(4);
    let name = h.create(SessionType::Claude, "/work/app");
    h.registry.set_mode(&name, SessionMode::Chat).unwrap();
    let before = h.registry.get(&name).unwrap();

    h.mux.fail_rename(true);
    assert!(!h.registry.rename(&name, "renamed").unwrap());

    assert_eq!(h.registry.get(&name).unwrap(), before);
    assert_eq!(h.registry.get("renamed").unwrap(), None);
    assert_eq!(h.registry.order(), vec![name]);
}

#[test]
fn test_successful_rename_moves_record() {
    let h = Harness::new(4);
    let name = h.create(SessionType::Claude, "/work/app");
    h.registry.set_resume_id(&name, Some("conv-1")).unwrap();
    let before = h.registry.get(&name).unwrap().unwrap();
    let port = h.registry.ensure_bridge(&name).unwrap();

    assert!(h.registry.rename(&name, "renamed").unwrap());

    assert_eq!(h.registry.get(&name).unwrap(), None);
    let after = h.registry.get("renamed").unwrap().unwrap();
    assert_eq!(after.workdir, before.workdir);
    assert_eq!(after.session_type, before.session_type);
    assert_eq!(after.mode, before.mode);
    assert_eq!(after.resume_id.as_deref(), Some("conv-1"));

    assert_eq!(h.registry.order(), vec!["renamed".to_string()]);
    assert_eq!(h.registry.bridge_port("renamed"), Some(port));
    assert_eq!(h.registry.bridge_port(&name), None);
}

// =============================================================================
// Bridge reuse
// =============================================================================

#[test]
fn test_ensure_is_idempotent() {
    let h = Harness::new(4);
    let name = h.create(SessionType::Shell, "/work/app");

    let first = h.registry.ensure_bridge(&name).unwrap();
    let second = h.registry.ensure_bridge(&name).unwrap();
    assert_eq!(first, second);
    assert_eq!(h.launcher.launches(), 1);
}

#[test]
fn test_concurrent_ensure_spawns_one_bridge() {
    let h = Harness::new(4);
    let name = h.create(SessionType::Shell, "/work/app");
    assert_eq!(name, "app-shell-1");

    let ports: Vec<u16> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&h.registry);
                let name = name.clone();
                scope.spawn(move || registry.ensure_bridge(&name).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(ports[0], ports[1]);
    assert_eq!(h.launcher.launches(), 1);
    assert_eq!(h.registry.bridges().snapshot().len(), 1);
}

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn test_external_deletion_is_pruned_on_list() {
    let h = Harness::new(4);
    let keep = h.create(SessionType::Shell, "/work/app");
    let doomed = h.create(SessionType::Claude, "/work/app");
    h.registry.ensure_bridge(&doomed).unwrap();

    // Closed directly in the multiplexer
    h.mux.remove(&doomed);

    assert_eq!(h.listed_names(), vec![keep.clone()]);
    assert_eq!(h.registry.order(), vec![keep.clone()]);
    assert_eq!(h.registry.get(&doomed).unwrap(), None);
    assert!(h.registry.get(&keep).unwrap().is_some());
    assert_eq!(h.registry.bridge_port(&doomed), None);
}

#[test]
fn test_names_come_from_ground_truth() {
    let h = Harness::new(4);
    assert_eq!(h.create(SessionType::Shell, "/work/app"), "app-shell-1");
    assert_eq!(h.create(SessionType::Shell, "/work/app"), "app-shell-2");

    assert!(h.registry.kill("app-shell-1"));
    assert_eq!(h.listed_names(), vec!["app-shell-2".to_string()]);

    assert_eq!(h.create(SessionType::Shell, "/work/app"), "app-shell-3");

    // With every session gone the numbering starts over
    h.registry.kill("app-shell-2");
    h.registry.kill("app-shell-3");
    assert_eq!(h.create(SessionType::Shell, "/work/app"), "app-shell-1");
}

// =============================================================================
// Restart recovery
// =============================================================================

#[test]
fn test_reconcile_restores_sessions_and_sweeps_orphans() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("termdeck.db");
    let launcher = Arc::new(SleepLauncher::new());
    let program = launcher.program().to_string();

    // First run: create a session, then exit leaving a bridge behind.
    let mut stray = {
        let h = Harness::with_parts(4, MetadataStore::open(&db).unwrap(), launcher.clone());
        let name = h.create(SessionType::Claude, "/work/app");
        h.registry.set_resume_id(&name, Some("conv-42")).unwrap();
        launcher.spawn_stray().unwrap()
    };
    assert_eq!(find_processes(&program), vec![stray.id()]);

    // Second run: same database and bridge program, empty multiplexer.
    let h = Harness::with_parts(4, MetadataStore::open(&db).unwrap(), launcher.clone());
    assert!(h.mux.names().is_empty());

    let report = reconcile(&h.registry, RestorePolicy::Resume).unwrap();
    assert_eq!(report.restored, vec!["app-claude-1".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(report.orphans_killed, 1);

    let session = h.mux.session("app-claude-1").unwrap();
    assert_eq!(session.workdir, PathBuf::from("/work/app"));
    assert_eq!(
        h.mux.sent_lines("app-claude-1"),
        vec!["claude --resume conv-42".to_string()]
    );

    wait_for_exit(&mut stray);
    assert!(find_processes(&program).is_empty());

    // A second pass has nothing left to do.
    let again = reconcile(&h.registry, RestorePolicy::Resume).unwrap();
    assert!(again.restored.is_empty());
    assert_eq!(again.orphans_killed, 0);
}

#[test]
fn test_reused_name_does_not_resume_old_conversation() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("termdeck.db");
    let launcher = Arc::new(SleepLauncher::new());

    {
        let h = Harness::with_parts(4, MetadataStore::open(&db).unwrap(), launcher.clone());
        let old = h.create(SessionType::Claude, "/work/app");
        h.registry.set_resume_id(&old, Some("conv-old")).unwrap();
        h.registry.store().set_title(&old, Some("Old task")).unwrap();

        // The agent exits and the same name is handed out again
        h.mux.remove(&old);
        assert_eq!(h.create(SessionType::Claude, "/work/app"), old);
    }

    let h = Harness::with_parts(4, MetadataStore::open(&db).unwrap(), launcher);
    let report = reconcile(&h.registry, RestorePolicy::Resume).unwrap();
    assert_eq!(report.restored, vec!["app-claude-1".to_string()]);

    let record = h.registry.get("app-claude-1").unwrap().unwrap();
    assert_eq!(record.resume_id, None);
    assert_eq!(record.title, None);
    assert_eq!(h.mux.sent_lines("app-claude-1"), vec!["claude".to_string()]);
}

#[test]
fn test_failed_restore_keeps_metadata() {
    let h = Harness::new(4);
    h.registry
        .store()
        .upsert("lost", &SessionRecord::new("/work/lost", SessionType::Shell))
        .unwrap();

    h.mux.fail_new_session(true);
    let report = reconcile(&h.registry, RestorePolicy::Resume).unwrap();
    assert_eq!(report.failed.len(), 1);

    // Not in ground truth, but protected from pruning until the next start.
    assert!(h.listed_names().is_empty());
    assert!(h.registry.get("lost").unwrap().is_some());
}

//! Startup reconciliation.
//!
//! Runs once, before the HTTP server accepts requests:
//!
//! 1. Every process running the bridge program is terminated. At cold start
//!    the supervisor tracks nothing, so any such process is left over from a
//!    previous run and may be holding a port.
//! 2. Every stored session missing from the multiplexer is recreated in its
//!    recorded working directory, and the startup command chosen by the
//!    restore policy is typed into it.

use std::collections::HashSet;
use std::path::Path;

use crate::bridge::sweep_orphans;
use crate::config::RestorePolicy;

use super::registry::{RegistryError, SessionRegistry};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Stray bridge processes terminated.
    pub orphans_killed: usize,
    /// Sessions recreated.
    pub restored: Vec<String>,
    /// Sessions that could not be recreated, with the reason.
    pub failed: Vec<(String, String)>,
    /// Stored sessions that were already running.
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn summary(&self) -> String {
        format!(
            "{} orphaned bridges killed, {} sessions restored, {} failed, {} already running",
            self.orphans_killed,
            self.restored.len(),
            self.failed.len(),
            self.skipped
        )
    }
}

/// Run the orphan sweep, then restore missing sessions.
///
/// A failed recreation leaves the metadata in place and is protected from
/// pruning for the life of the registry, so the next start tries again.
pub fn reconcile(
    registry: &SessionRegistry,
    policy: RestorePolicy,
) -> Result<ReconcileReport, RegistryError> {
    let mut report = ReconcileReport {
        orphans_killed: sweep_orphans(
            registry.bridges().program(),
            &registry.bridges().tracked_pids(),
        ),
        ..ReconcileReport::default()
    };

    let live: HashSet<String> = registry
        .multiplexer()
        .list_sessions()?
        .into_iter()
        .map(|s| s.name)
        .collect();
    let records = registry.store().list()?;
    let mux = registry.multiplexer();

    for (name, record) in records {
        if live.contains(&name) {
            report.skipped += 1;
            continue;
        }
        if registry.is_ignored(&name) {
            tracing::debug!(session = %name, "not restoring ignored session");
            report.skipped += 1;
            continue;
        }

        if let Err(e) = mux.new_session(&name, Path::new(&record.workdir)) {
            tracing::warn!(session = %name, workdir = %record.workdir, error = %e, "failed to restore session");
            report.failed.push((name, e.to_string()));
            continue;
        }
        if registry.options().mouse {
            if let Err(e) = mux.set_mouse(&name, true) {
                tracing::debug!(session = %name, error = %e, "failed to enable mouse mode");
            }
        }
        if let Some(command) = registry.startup().for_restore(&record, policy) {
            if let Err(e) = mux.send_line(&name, &command) {
                tracing::warn!(session = %name, error = %e, "restored session without its startup command");
            }
        }

        tracing::info!(session = %name, workdir = %record.workdir, ?policy, "session restored");
        report.restored.push(name);
    }

    registry.protect_pending_restores(report.failed.iter().map(|(name, _)| name.clone()));

    tracing::info!(
        orphans_killed = report.orphans_killed,
        restored = report.restored.len(),
        failed = report.failed.len(),
        skipped = report.skipped,
        "startup reconciliation finished"
    );
    Ok(report)
}

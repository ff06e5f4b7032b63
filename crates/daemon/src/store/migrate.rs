//! One-time import of the JSON files older releases kept in the data dir.
//!
//! Each file that imports cleanly is renamed to `<file>.migrated`, so the
//! import runs once. A file that fails to parse stays where it is and is
//! retried on the next start.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use protocol::{SessionMode, SessionType};
use serde::Deserialize;

use super::{unix_now, MetadataStore, SessionRecord, StoreError, StoreResult};

/// Legacy per-session files, in the order they are tried.
const SESSION_FILES: [&str; 2] = ["session_meta.json", "sessions.json"];

const ORDER_FILE: &str = "order.json";

/// Shape of one entry in the legacy session map.
#[derive(Debug, Deserialize)]
struct LegacySession {
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default, rename = "type")]
    session_type: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "resume_id")]
    claude_session_id: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}

impl LegacySession {
    fn into_record(self) -> SessionRecord {
        let session_type = self
            .session_type
            .as_deref()
            .and_then(|t| t.parse::<SessionType>().ok())
            .unwrap_or_default()
            .persisted();
        let mode = self
            .mode
            .as_deref()
            .and_then(|m| m.parse::<SessionMode>().ok())
            .unwrap_or_else(|| session_type.default_mode());
        let now = unix_now();

        SessionRecord {
            workdir: self.workdir.unwrap_or_else(default_workdir),
            session_type,
            mode,
            resume_id: self.claude_session_id.filter(|id| !id.is_empty()),
            title: self.title.filter(|t| !t.is_empty()),
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
        }
    }
}

fn default_workdir() -> String {
    dirs::home_dir()
        .map(|home| home.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

/// What [`import_legacy`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LegacyImport {
    /// Session records written to the store.
    pub sessions: usize,
    /// Names appended to the order list.
    pub ordered: usize,
    /// Files renamed to `.migrated`.
    pub files: Vec<PathBuf>,
}

impl LegacyImport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Import any legacy JSON files found in `data_dir` into `store`.
///
/// Records already in the store are overwritten by the imported ones, except
/// that a stored title or resume id survives an import that lacks one.
pub fn import_legacy(store: &MetadataStore, data_dir: &Path) -> StoreResult<LegacyImport> {
    let mut report = LegacyImport::default();

    for file in SESSION_FILES {
        let path = data_dir.join(file);
        if !path.exists() {
            continue;
        }
        let Some(sessions) = read_json::<BTreeMap<String, LegacySession>>(&path)? else {
            continue;
        };

        let records: Vec<(String, SessionRecord)> = sessions
            .into_iter()
            .map(|(name, legacy)| (name, legacy.into_record()))
            .collect();
        store.upsert_many(&records)?;
        report.sessions += records.len();

        mark_migrated(&path)?;
        tracing::info!(path = %path.display(), count = records.len(), "imported legacy session metadata");
        report.files.push(path);
    }

    let order_path = data_dir.join(ORDER_FILE);
    if order_path.exists() {
        if let Some(legacy_order) = read_json::<Vec<String>>(&order_path)? {
            let mut order = store.get_order()?;
            let before = order.len();
            for name in legacy_order {
                if !order.contains(&name) {
                    order.push(name);
                }
            }
            report.ordered = order.len() - before;
            store.set_order(&order)?;

            mark_migrated(&order_path)?;
            tracing::info!(path = %order_path.display(), count = report.ordered, "imported legacy session order");
            report.files.push(order_path);
        }
    }

    Ok(report)
}

/// Parse a JSON file. A parse failure is logged and yields `None`.
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str(&contents) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "legacy file is not valid, leaving it in place");
            Ok(None)
        }
    }
}

fn mark_migrated(path: &Path) -> StoreResult<()> {
    let mut target = path.as_os_str().to_owned();
    target.push(".migrated");
    fs::rename(path, &target).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

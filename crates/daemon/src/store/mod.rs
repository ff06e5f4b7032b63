//! Durable session metadata.
//!
//! This module provides:
//! - Schema management and migrations (`PRAGMA user_version`)
//! - Per-session records keyed by session name
//! - The display order of sessions
//! - A small key/value settings table
//! - One-time import of the legacy JSON files ([`migrate`])
//!
//! All access goes through a single connection behind a mutex, so writes are
//! serialized. Each public write is one statement or one transaction.

pub mod migrate;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use protocol::{SessionMode, SessionType};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use thiserror::Error;

pub use migrate::{import_legacy, LegacyImport};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error around the database or legacy files.
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Schema version written by the latest migration.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Metadata kept for one logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub workdir: String,
    pub session_type: SessionType,
    pub mode: SessionMode,
    pub resume_id: Option<String>,
    pub title: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
}

impl SessionRecord {
    /// Fresh record for a session of `session_type` in `workdir`.
    ///
    /// The type is stored in its persisted form, so a transient resume
    /// session is recorded as the agent it resumes.
    pub fn new(workdir: impl Into<String>, session_type: SessionType) -> Self {
        let now = unix_now();
        Self {
            workdir: workdir.into(),
            session_type: session_type.persisted(),
            mode: session_type.default_mode(),
            resume_id: None,
            title: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_resume_id(mut self, resume_id: Option<String>) -> Self {
        self.resume_id = resume_id;
        self
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let session_type: String = row.get("type")?;
        let mode: String = row.get("mode")?;
        Ok(Self {
            workdir: row.get("workdir")?,
            session_type: session_type
                .parse::<SessionType>()
                .map(SessionType::persisted)
                .unwrap_or_default(),
            mode: mode.parse().unwrap_or_default(),
            resume_id: row.get("resume_id")?,
            title: row.get("title")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// SQLite-backed metadata store.
pub struct MetadataStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open or create the database at `path`, applying pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.run_migrations()?;
        tracing::debug!(path = %path.display(), "metadata store opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> StoreResult<i32> {
        let conn = self.conn.lock();
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Reject every write until switched back.
    #[cfg(test)]
    pub(crate) fn set_read_only(&self, read_only: bool) {
        self.conn
            .lock()
            .pragma_update(None, "query_only", read_only)
            .unwrap();
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if current < 1 {
            migrate_v1(&mut conn)?;
        }

        debug_assert!(current <= CURRENT_SCHEMA_VERSION);
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn get(&self, name: &str) -> StoreResult<Option<SessionRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT * FROM sessions WHERE name = ?1",
                params![name],
                SessionRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace the record for `name`.
    ///
    /// An existing `resume_id` or `title` survives when the new record leaves
    /// it unset; `created_at` is never overwritten.
    pub fn upsert(&self, name: &str, record: &SessionRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        upsert_on(&conn, name, record)?;
        Ok(())
    }

    /// Store `record` under `name`, discarding whatever was there before.
    pub fn replace(&self, name: &str, record: &SessionRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions
                (name, workdir, type, mode, resume_id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                name,
                record.workdir,
                record.session_type.persisted().as_str(),
                record.mode.as_str(),
                record.resume_id,
                record.title,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Upsert many records in one transaction.
    pub fn upsert_many(&self, records: &[(String, SessionRecord)]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (name, record) in records {
            upsert_on(&tx, name, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove the record for `name` and its place in the order.
    pub fn delete(&self, name: &str) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM sessions WHERE name = ?1", params![name])?;
        let mut order = read_order(&tx)?;
        let before = order.len();
        order.retain(|n| n != name);
        if order.len() != before {
            write_order(&tx, &order)?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    /// All records, sorted by name.
    pub fn list(&self) -> StoreResult<Vec<(String, SessionRecord)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get("name")?;
                Ok((name, SessionRecord::from_row(row)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Move the record and order slot of `old` to `new` in one transaction.
    ///
    /// A record already stored under `new` is replaced.
    pub fn rename(&self, old: &str, new: &str) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM sessions WHERE name = ?1",
                params![old],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if exists {
            tx.execute("DELETE FROM sessions WHERE name = ?1", params![new])?;
            tx.execute(
                "UPDATE sessions SET name = ?1, updated_at = ?2 WHERE name = ?3",
                params![new, unix_now(), old],
            )?;
        }

        let mut order = read_order(&tx)?;
        let mut moved = false;
        order.retain(|n| n != new);
        for slot in order.iter_mut() {
            if slot == old {
                *slot = new.to_string();
                moved = true;
            }
        }
        write_order(&tx, &order)?;
        tx.commit()?;
        Ok(exists || moved)
    }

    /// Drop every record whose name is not in `keep`. Returns the names dropped.
    pub fn retain(&self, keep: &HashSet<String>) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let names: Vec<String> = {
            let mut stmt = tx.prepare("SELECT name FROM sessions ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            names
        };
        let stale: Vec<String> = names.into_iter().filter(|n| !keep.contains(n)).collect();
        for name in &stale {
            tx.execute("DELETE FROM sessions WHERE name = ?1", params![name])?;
        }
        tx.commit()?;
        Ok(stale)
    }

    fn update_field(&self, name: &str, sql: &str, value: Option<&str>) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(sql, params![value, unix_now(), name])?;
        Ok(rows > 0)
    }

    /// Returns `false` when `name` has no record.
    pub fn set_mode(&self, name: &str, mode: SessionMode) -> StoreResult<bool> {
        self.update_field(
            name,
            "UPDATE sessions SET mode = ?1, updated_at = ?2 WHERE name = ?3",
            Some(mode.as_str()),
        )
    }

    /// Returns `false` when `name` has no record.
    pub fn set_resume_id(&self, name: &str, resume_id: Option<&str>) -> StoreResult<bool> {
        self.update_field(
            name,
            "UPDATE sessions SET resume_id = ?1, updated_at = ?2 WHERE name = ?3",
            resume_id,
        )
    }

    /// Returns `false` when `name` has no record.
    pub fn set_title(&self, name: &str, title: Option<&str>) -> StoreResult<bool> {
        self.update_field(
            name,
            "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE name = ?3",
            title,
        )
    }

    // =========================================================================
    // Order
    // =========================================================================

    pub fn get_order(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        read_order(&conn)
    }

    /// Replace the order. Duplicates keep their first position.
    pub fn set_order(&self, order: &[String]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        write_order(&tx, order)?;
        tx.commit()?;
        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}

/// Migration to version 1: initial schema.
fn migrate_v1(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            name TEXT PRIMARY KEY,
            workdir TEXT NOT NULL,
            type TEXT NOT NULL,
            mode TEXT NOT NULL DEFAULT 'cli',
            resume_id TEXT,
            title TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS session_order (
            position INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(&format!("PRAGMA user_version = {}", 1), [])?;

    tx.commit()?;
    Ok(())
}

fn upsert_on(conn: &Connection, name: &str, record: &SessionRecord) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO sessions (name, workdir, type, mode, resume_id, title, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(name) DO UPDATE SET
            workdir = excluded.workdir,
            type = excluded.type,
            mode = excluded.mode,
            resume_id = COALESCE(excluded.resume_id, sessions.resume_id),
            title = COALESCE(excluded.title, sessions.title),
            updated_at = excluded.updated_at
        "#,
        params![
            name,
            record.workdir,
            record.session_type.persisted().as_str(),
            record.mode.as_str(),
            record.resume_id,
            record.title,
            record.created_at,
            record.updated_at,
        ],
    )
}

fn read_order(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM session_order ORDER BY position")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

fn write_order(tx: &Transaction<'_>, order: &[String]) -> StoreResult<()> {
    tx.execute("DELETE FROM session_order", [])?;
    let mut seen = HashSet::new();
    let mut stmt = tx.prepare("INSERT INTO session_order (position, name) VALUES (?1, ?2)")?;
    for name in order {
        if seen.insert(name.as_str()) {
            stmt.execute(params![seen.len() as i64 - 1, name])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_in_memory_database() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(store.path().is_none());
        assert!(store.list().unwrap().is_empty());
        assert!(store.get_order().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_get() {
        let store = MetadataStore::open_in_memory().unwrap();
        let record = SessionRecord::new("/work/app", SessionType::Shell);
        store.upsert("app-shell-1", &record).unwrap();

        let loaded = store.get("app-shell-1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_resume_type_is_normalized() {
        let store = MetadataStore::open_in_memory().unwrap();
        let record = SessionRecord::new("/work/app", SessionType::Resume)
            .with_resume_id(Some("abc".to_string()));
        assert_eq!(record.session_type, SessionType::Claude);

        store.upsert("app-resume-1", &record).unwrap();
        let loaded = store.get("app-resume-1").unwrap().unwrap();
        assert_eq!(loaded.session_type, SessionType::Claude);
        assert_eq!(loaded.resume_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_chat_type_defaults_to_chat_mode() {
        let record = SessionRecord::new("/w", SessionType::Chat);
        assert_eq!(record.mode, SessionMode::Chat);
    }

    #[test]
    fn test_upsert_coalesces_optional_fields() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut record = SessionRecord::new("/work/app", SessionType::Claude);
        record.title = Some("Refactor".to_string());
        record.resume_id = Some("conv-1".to_string());
        store.upsert("a", &record).unwrap();

        let mut replacement = SessionRecord::new("/work/other", SessionType::Claude);
        replacement.created_at = 1;
        store.upsert("a", &replacement).unwrap();

        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.workdir, "/work/other");
        assert_eq!(loaded.title.as_deref(), Some("Refactor"));
        assert_eq!(loaded.resume_id.as_deref(), Some("conv-1"));
        assert_eq!(loaded.created_at, record.created_at);
    }

    #[test]
    fn test_replace_discards_previous_fields() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut old = SessionRecord::new("/work/app", SessionType::Claude)
            .with_resume_id(Some("conv-old".to_string()));
        old.title = Some("Old task".to_string());
        old.mode = SessionMode::Chat;
        store.upsert("app-claude-1", &old).unwrap();

        let fresh = SessionRecord::new("/work/app", SessionType::Claude);
        store.replace("app-claude-1", &fresh).unwrap();

        let loaded = store.get("app-claude-1").unwrap().unwrap();
        assert_eq!(loaded, fresh);
        assert_eq!(loaded.resume_id, None);
        assert_eq!(loaded.title, None);
    }

    #[test]
    fn test_io_error_names_path_once() {
        let err = StoreError::Io {
            path: PathBuf::from("/data/session_meta.json"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(err.to_string(), "I/O error on /data/session_meta.json");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk full");
    }

    #[test]
    fn test_field_updates() {
        let store = MetadataStore::open_in_memory().unwrap();
        store
            .upsert("a", &SessionRecord::new("/w", SessionType::Claude))
            .unwrap();

        assert!(store.set_mode("a", SessionMode::Chat).unwrap());
        assert!(store.set_resume_id("a", Some("r-1")).unwrap());
        assert!(store.set_title("a", Some("Title")).unwrap());

        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.mode, SessionMode::Chat);
        assert_eq!(loaded.resume_id.as_deref(), Some("r-1"));
        assert_eq!(loaded.title.as_deref(), Some("Title"));

        assert!(store.set_resume_id("a", None).unwrap());
        assert!(store.get("a").unwrap().unwrap().resume_id.is_none());

        assert!(!store.set_mode("missing", SessionMode::Cli).unwrap());
        assert!(!store.set_resume_id("missing", Some("x")).unwrap());
        assert!(!store.set_title("missing", None).unwrap());
    }

    #[test]
    fn test_delete_removes_record_and_order_slot() {
        let store = MetadataStore::open_in_memory().unwrap();
        store
            .upsert("a", &SessionRecord::new("/w", SessionType::Shell))
            .unwrap();
        store.set_order(&names(&["b", "a", "c"])).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.get_order().unwrap(), names(&["b", "c"]));

        // Idempotent
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn test_order_roundtrip_dedups() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.set_order(&names(&["c", "a", "c", "b", "a"])).unwrap();
        assert_eq!(store.get_order().unwrap(), names(&["c", "a", "b"]));

        store.set_order(&[]).unwrap();
        assert!(store.get_order().unwrap().is_empty());
    }

    #[test]
    fn test_rename_moves_record_and_order() {
        let store = MetadataStore::open_in_memory().unwrap();
        let record = SessionRecord::new("/work/app", SessionType::Gemini);
        store.upsert("old", &record).unwrap();
        store.set_order(&names(&["x", "old", "y"])).unwrap();

        assert!(store.rename("old", "new").unwrap());
        assert!(store.get("old").unwrap().is_none());
        let moved = store.get("new").unwrap().unwrap();
        assert_eq!(moved.workdir, "/work/app");
        assert_eq!(moved.session_type, SessionType::Gemini);
        assert_eq!(store.get_order().unwrap(), names(&["x", "new", "y"]));
    }

    #[test]
    fn test_rename_unknown_is_noop() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.set_order(&names(&["a"])).unwrap();
        assert!(!store.rename("ghost", "other").unwrap());
        assert_eq!(store.get_order().unwrap(), names(&["a"]));
    }

    #[test]
    fn test_retain() {
        let store = MetadataStore::open_in_memory().unwrap();
        for name in ["a", "b", "c"] {
            store
                .upsert(name, &SessionRecord::new("/w", SessionType::Shell))
                .unwrap();
        }
        let keep: HashSet<String> = ["b".to_string()].into_iter().collect();

        let dropped = store.retain(&keep).unwrap();
        assert_eq!(dropped, names(&["a", "c"]));
        let left: Vec<String> = store.list().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(left, names(&["b"]));
    }

    #[test]
    fn test_settings() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(store.get_setting("selected_folder").unwrap().is_none());

        store.set_setting("selected_folder", "/work").unwrap();
        store.set_setting("selected_folder", "/work/app").unwrap();
        assert_eq!(
            store.get_setting("selected_folder").unwrap().as_deref(),
            Some("/work/app")
        );
    }

    #[test]
    fn test_unknown_stored_type_reads_as_shell() {
        let store = MetadataStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO sessions (name, workdir, type, mode, created_at, updated_at)
                 VALUES ('old', '/w', 'bash', 'weird', 0, 0)",
                [],
            )
            .unwrap();
        }
        let record = store.get("old").unwrap().unwrap();
        assert_eq!(record.session_type, SessionType::Shell);
        assert_eq!(record.mode, SessionMode::Cli);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("termdeck.db");

        {
            let store = MetadataStore::open(&path).unwrap();
            store
                .upsert("app-shell-1", &SessionRecord::new("/work/app", SessionType::Shell))
                .unwrap();
            store.set_order(&names(&["app-shell-1"])).unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.schema_version().unwrap(), 1);
        assert!(store.get("app-shell-1").unwrap().is_some());
        assert_eq!(store.get_order().unwrap(), names(&["app-shell-1"]));
    }
}

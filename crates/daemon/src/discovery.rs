//! Filesystem discovery for the dashboard.
//!
//! - Candidate working directories for new sessions
//! - Previous agent conversations that can be resumed in a directory

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use protocol::ResumableConversation;
use serde_json::Value;

/// Longest summary reported for a conversation, in characters.
const SUMMARY_LEN: usize = 80;

/// `/` followed by every visible subdirectory of `projects_dir`, sorted.
///
/// A missing or unreadable `projects_dir` yields just `/`.
pub fn directories(projects_dir: &Path) -> Vec<String> {
    let mut found: Vec<String> = match fs::read_dir(projects_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                !hidden && entry.path().is_dir()
            })
            .map(|entry| entry.path().to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            tracing::debug!(dir = %projects_dir.display(), error = %e, "cannot list projects directory");
            Vec::new()
        }
    };
    found.sort();

    let mut dirs = Vec::with_capacity(found.len() + 1);
    dirs.push("/".to_string());
    dirs.extend(found);
    dirs
}

/// Directory holding the agent's transcripts for `workdir`.
///
/// The agent names it after the working directory with every `/` turned
/// into `-`.
pub fn transcript_dir(agent_projects_dir: &Path, workdir: &str) -> PathBuf {
    agent_projects_dir.join(workdir.replace('/', "-"))
}

/// Conversations recorded for `workdir`, newest first.
///
/// Sub-agent transcripts (`agent-*`) and empty files are skipped.
pub fn resumable_conversations(agent_projects_dir: &Path, workdir: &str) -> Vec<ResumableConversation> {
    let dir = transcript_dir(agent_projects_dir, workdir);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut conversations: Vec<ResumableConversation> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let id = file_name.strip_suffix(".jsonl")?;
            if id.is_empty() || file_name.starts_with("agent-") {
                return None;
            }
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() || metadata.len() == 0 {
                return None;
            }
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Some(scan_transcript(&entry.path(), id, metadata.len(), mtime))
        })
        .collect();

    conversations.sort_by(|a, b| b.mtime.total_cmp(&a.mtime));
    conversations
}

/// Read one transcript, one JSON record per line. Unparseable lines are skipped.
fn scan_transcript(path: &Path, id: &str, size: u64, mtime: f64) -> ResumableConversation {
    let mut summary: Option<String> = None;
    let mut first_prompt: Option<String> = None;
    let mut message_count = 0;
    let mut branch: Option<String> = None;

    match fs::File::open(path) {
        Ok(file) => {
            for line in BufReader::new(file).lines() {
                let Ok(line) = line else { break };
                let Ok(record) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let kind = record.get("type").and_then(Value::as_str).unwrap_or_default();

                if matches!(kind, "user" | "assistant" | "human") {
                    message_count += 1;
                }
                if kind == "summary" {
                    if let Some(text) = record.get("summary").and_then(Value::as_str) {
                        summary = Some(truncate(text));
                    }
                }
                if branch.is_none() {
                    branch = record
                        .get("gitBranch")
                        .and_then(Value::as_str)
                        .filter(|b| !b.is_empty())
                        .map(str::to_string);
                }
                if first_prompt.is_none() && matches!(kind, "user" | "human") {
                    first_prompt = first_text(&record);
                }
            }
        }
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "cannot read transcript"),
    }

    let summary = summary
        .or(first_prompt)
        .unwrap_or_else(|| format!("{}...", id.chars().take(8).collect::<String>()));

    ResumableConversation {
        id: id.to_string(),
        size,
        summary,
        mtime,
        message_count,
        branch,
    }
}

/// First text of a user message, flattened to one line.
fn first_text(record: &Value) -> Option<String> {
    let content = record.get("message")?.get("content")?;
    let text = match content {
        Value::String(text) => text.as_str(),
        Value::Array(items) => items
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))?
            .get("text")?
            .as_str()?,
        _ => return None,
    };
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    (!flat.is_empty()).then(|| truncate(flat))
}

fn truncate(text: &str) -> String {
    text.chars().take(SUMMARY_LEN).collect()
}

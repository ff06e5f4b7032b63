//! Request and response bodies for the termdeck HTTP control surface.
//!
//! Every endpoint speaks JSON. The daemon's handlers and the CLI client both
//! build on these types so the two sides cannot drift apart.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Current API version, reported by the health endpoint.
pub const API_VERSION: u8 = 1;

// ============================================================================
// Session kinds
// ============================================================================

/// Kind of program a session runs.
///
/// `Resume` is transient: it only exists at creation time and is stored as
/// [`SessionType::Claude`]. See [`SessionType::persisted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Plain interactive shell.
    #[default]
    #[serde(alias = "bash")]
    Shell,
    /// Claude coding agent.
    Claude,
    /// Gemini coding agent.
    Gemini,
    /// lazygit TUI.
    Lazygit,
    /// One-shot resume of a previous Claude conversation.
    Resume,
    /// Chat-mode agent session.
    Chat,
}

impl SessionType {
    /// All variants, in the order the dashboard groups them.
    pub const ALL: [SessionType; 6] = [
        SessionType::Claude,
        SessionType::Resume,
        SessionType::Chat,
        SessionType::Gemini,
        SessionType::Lazygit,
        SessionType::Shell,
    ];

    /// Wire name, also used as the middle segment of generated session names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Shell => "shell",
            SessionType::Claude => "claude",
            SessionType::Gemini => "gemini",
            SessionType::Lazygit => "lazygit",
            SessionType::Resume => "resume",
            SessionType::Chat => "chat",
        }
    }

    /// The type written to durable storage.
    pub fn persisted(self) -> SessionType {
        match self {
            SessionType::Resume => SessionType::Claude,
            other => other,
        }
    }

    /// Whether the session hosts an AI agent conversation.
    pub fn is_agent(&self) -> bool {
        matches!(
            self,
            SessionType::Claude | SessionType::Resume | SessionType::Chat | SessionType::Gemini
        )
    }

    /// Mode a freshly created session of this type starts in.
    pub fn default_mode(&self) -> SessionMode {
        match self {
            SessionType::Chat => SessionMode::Chat,
            _ => SessionMode::Cli,
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shell" | "bash" => Ok(SessionType::Shell),
            "claude" => Ok(SessionType::Claude),
            "gemini" => Ok(SessionType::Gemini),
            "lazygit" => Ok(SessionType::Lazygit),
            "resume" => Ok(SessionType::Resume),
            "chat" => Ok(SessionType::Chat),
            _ => Err(ParseError::UnknownSessionType(s.to_string())),
        }
    }
}

/// How the operator interacts with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Raw terminal through the bridge.
    #[default]
    Cli,
    /// Structured chat view.
    Chat,
}

impl SessionMode {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Cli => "cli",
            SessionMode::Chat => "chat",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cli" => Ok(SessionMode::Cli),
            "chat" => Ok(SessionMode::Chat),
            _ => Err(ParseError::UnknownMode(s.to_string())),
        }
    }
}

// ============================================================================
// Session endpoints
// ============================================================================

/// One entry of the session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    /// Unique session name.
    pub name: String,
    /// Pane title, or the name when the pane has none.
    pub title: String,
    /// Working directory; empty for sessions created outside termdeck.
    pub workdir: String,
    /// Stored session type.
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Current interaction mode.
    pub mode: SessionMode,
    /// External conversation id, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    /// Bridge port, when a bridge is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Multiplexer creation time (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    /// Window count reported by the multiplexer.
    pub windows: u32,
    /// Whether a client is attached to the multiplexer session.
    pub attached: bool,
}

/// Response body for `GET /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionView>,
}

/// Request body for `POST /api/sessions`.
///
/// The type travels as a string so unknown values can be rejected with a
/// readable message instead of a generic decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "type")]
    pub session_type: String,
    pub workdir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
}

/// What happened to the startup command of a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    /// The type has no startup command.
    NotNeeded,
    /// The command was typed into the session.
    Sent,
    /// The session exists but the command could not be sent.
    Failed,
}

/// Response body for `POST /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub name: String,
    pub startup: StartupState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_error: Option<String>,
}

/// Response body for `GET /api/sessions/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecordResponse {
    pub name: String,
    pub workdir: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Request body for `PATCH /api/sessions/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub resume_id: Option<String>,
}

/// Request body for `POST /api/sessions/{name}/rename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSessionRequest {
    pub new_name: String,
}

/// Request body for `PUT /api/order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOrderRequest {
    pub order: Vec<String>,
}

/// Response body for `GET /api/sessions/{name}/bridge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgePortResponse {
    pub name: String,
    pub port: u16,
}

// ============================================================================
// Discovery endpoints
// ============================================================================

/// Response body for `GET /api/directories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoriesResponse {
    pub directories: Vec<String>,
}

/// A previous agent conversation that can be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumableConversation {
    /// Conversation id, passed back as `resume_id`.
    pub id: String,
    /// Transcript size in bytes.
    pub size: u64,
    /// Short human-readable summary.
    pub summary: String,
    /// Last modification time (Unix seconds, fractional).
    pub mtime: f64,
    /// Number of user and assistant messages.
    pub message_count: usize,
    /// Git branch recorded in the transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Response body for `GET /api/resumable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumableResponse {
    pub conversations: Vec<ResumableConversation>,
}

/// Body of `GET/PUT /api/selected-folder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFolder {
    pub path: String,
}

/// Response body for `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub api: u8,
}

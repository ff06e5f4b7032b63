//! Commands typed into a session right after it is created.

use protocol::SessionType;

use crate::config::{CommandsConfig, RestorePolicy};
use crate::store::SessionRecord;

/// Builds startup command lines from `[commands]`.
#[derive(Debug, Clone)]
pub struct StartupCommands {
    commands: CommandsConfig,
}

impl StartupCommands {
    pub fn new(commands: CommandsConfig) -> Self {
        Self { commands }
    }

    /// Command for a freshly created session, or `None` when the type has
    /// nothing to run (a shell is left at its prompt).
    ///
    /// A Claude-family session given a `resume_id` resumes that conversation.
    /// A `Resume` session without one opens the conversation picker.
    pub fn for_create(&self, session_type: SessionType, resume_id: Option<&str>) -> Option<String> {
        let command = match session_type {
            SessionType::Shell => return None,
            SessionType::Claude | SessionType::Chat => match resume_id {
                Some(id) => self.resume(id),
                None => self.commands.claude.clone(),
            },
            SessionType::Resume => match resume_id {
                Some(id) => self.resume(id),
                None => self.commands.claude_resume_picker.clone(),
            },
            SessionType::Gemini => return non_empty(&self.commands.gemini),
            SessionType::Lazygit => return non_empty(&self.commands.lazygit),
        };
        non_empty(&self.with_system_prompt(command))
    }

    /// Command for a session recreated from its stored record.
    pub fn for_restore(&self, record: &SessionRecord, policy: RestorePolicy) -> Option<String> {
        match policy {
            RestorePolicy::Reattach => None,
            RestorePolicy::Replay => self.for_create(record.session_type, None),
            RestorePolicy::Resume => {
                self.for_create(record.session_type, record.resume_id.as_deref())
            }
        }
    }

    fn resume(&self, resume_id: &str) -> String {
        self.commands.claude_resume.replace("{resume_id}", resume_id)
    }

    fn with_system_prompt(&self, command: String) -> String {
        match &self.commands.system_prompt {
            Some(path) => format!("{} --system-prompt {}", command, path.display()),
            None => command,
        }
    }
}

fn non_empty(command: &str) -> Option<String> {
    let command = command.trim();
    (!command.is_empty()).then(|| command.to_string())
}

/// Whether `id` is safe to splice into a command line.
///
/// Conversation ids are UUID-like; anything outside `[A-Za-z0-9_-]` is
/// refused so it can never reach the shell as syntax.
pub fn is_safe_resume_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

//! Configuration management for the termdeck daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termdeck/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bridge port range is invalid: {min}..={max}")]
    InvalidPortRange { min: u16, max: u16 },

    #[error("http port must be greater than 0")]
    InvalidHttpPort,

    #[error("multiplexer timeout_ms must be greater than 0")]
    InvalidTimeout,

    #[error("bind_address is not an IP address: {0}")]
    InvalidBindAddress(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("program not found in PATH: {0}")]
    ProgramNotFound(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the termdeck daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// HTTP control surface.
    pub http: HttpConfig,

    /// External terminal multiplexer.
    pub multiplexer: MultiplexerConfig,

    /// Browser bridge processes and their port range.
    pub bridge: BridgeConfig,

    /// Startup commands typed into new sessions.
    pub commands: CommandsConfig,

    /// Behaviour of the startup reconciler.
    pub restore: RestoreConfig,

    /// Directory and conversation discovery for the dashboard.
    pub dashboard: DashboardConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for the metadata database and pidfile.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional directory for daily-rolling log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Address to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,
}

/// Terminal multiplexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Multiplexer executable.
    pub program: String,

    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Sessions whose names start with one of these are ignored.
    pub ignore_prefixes: Vec<String>,

    /// Enable mouse mode in new sessions.
    pub mouse: bool,

    /// Dedicated server socket name (`tmux -L`); the default server when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_name: Option<String>,
}

/// Bridge process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge executable.
    pub program: String,

    /// Address the bridge listens on, also used for the port probe.
    pub bind_address: String,

    /// First port of the pool (inclusive).
    pub port_min: u16,

    /// Last port of the pool (inclusive).
    pub port_max: u16,

    /// Allow the browser to write to the terminal.
    pub writable: bool,

    /// xterm.js theme options passed as `-t theme.<key>=<value>`.
    pub theme: BTreeMap<String, String>,
}

/// Startup commands per session type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    /// Fresh Claude session.
    pub claude: String,

    /// Resume a specific conversation; `{resume_id}` is substituted.
    pub claude_resume: String,

    /// Resume without an id (opens the conversation picker).
    pub claude_resume_picker: String,

    /// Fresh Gemini session.
    pub gemini: String,

    /// Git TUI.
    pub lazygit: String,

    /// System prompt file appended to Claude commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<PathBuf>,
}

/// What the startup reconciler types into recreated sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestorePolicy {
    /// Agents with a known conversation resume it; others get their startup command.
    #[default]
    Resume,
    /// Always the type's normal startup command.
    Replay,
    /// Recreate the session and send nothing.
    Reattach,
}

/// Startup reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RestoreConfig {
    pub policy: RestorePolicy,
}

/// Dashboard discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    /// Directory whose subdirectories are offered as working directories.
    pub projects_dir: PathBuf,

    /// Where the agent keeps per-project conversation transcripts.
    pub agent_projects_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            program: "tmux".to_string(),
            timeout_ms: 5000,
            ignore_prefixes: vec!["split-".to_string()],
            mouse: true,
            socket_name: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "ttyd".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port_min: 7700,
            port_max: 7799,
            writable: true,
            theme: default_theme(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let claude = "IS_SANDBOX=1 claude --dangerously-skip-permissions";
        Self {
            claude: claude.to_string(),
            claude_resume: format!("{claude} --resume {{resume_id}}"),
            claude_resume_picker: format!("{claude} --resume"),
            gemini: "gemini".to_string(),
            lazygit: "lazygit".to_string(),
            system_prompt: None,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self {
            projects_dir: home.join("git"),
            agent_projects_dir: home.join(".claude").join("projects"),
        }
    }
}

/// Catppuccin Mocha.
fn default_theme() -> BTreeMap<String, String> {
    [
        ("background", "#1e1e2e"),
        ("foreground", "#cdd6f4"),
        ("cursor", "#f5e0dc"),
        ("cursorAccent", "#1e1e2e"),
        ("selectionBackground", "#585b70"),
        ("black", "#45475a"),
        ("red", "#f38ba8"),
        ("green", "#a6e3a1"),
        ("yellow", "#f9e2af"),
        ("blue", "#89b4fa"),
        ("magenta", "#f5c2e7"),
        ("cyan", "#94e2d5"),
        ("white", "#bac2de"),
        ("brightBlack", "#585b70"),
        ("brightRed", "#f38ba8"),
        ("brightGreen", "#a6e3a1"),
        ("brightYellow", "#f9e2af"),
        ("brightBlue", "#89b4fa"),
        ("brightMagenta", "#f5c2e7"),
        ("brightCyan", "#94e2d5"),
        ("brightWhite", "#a6adc8"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termdeck")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termdeck")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMDECK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - TERMDECK_HTTP_PORT: Override the HTTP listen port
    /// - TERMDECK_DATA_DIR: Override the data directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TERMDECK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(port) = std::env::var("TERMDECK_HTTP_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding http.port from environment: {}", port);
                    self.http.port = port;
                }
                Err(_) if port.is_empty() => {}
                Err(e) => tracing::warn!("Ignoring TERMDECK_HTTP_PORT={:?}: {}", port, e),
            }
        }

        if let Ok(dir) = std::env::var("TERMDECK_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.daemon.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    /// External programs are checked separately by [`Config::validate_programs`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.bridge.port_min, self.bridge.port_max);
        if min == 0 || min > max {
            return Err(ConfigError::InvalidPortRange { min, max });
        }

        if self.http.port == 0 {
            return Err(ConfigError::InvalidHttpPort);
        }

        if self.multiplexer.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        if self.bridge.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.bridge.bind_address.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Check that the multiplexer and bridge executables can be found.
    pub fn validate_programs(&self) -> Result<(), ConfigError> {
        for program in [&self.multiplexer.program, &self.bridge.program] {
            let path = Path::new(program);
            let found = if path.is_absolute() {
                path.exists()
            } else {
                which::which(program).is_ok()
            };
            if !found {
                return Err(ConfigError::ProgramNotFound(program.clone()));
            }
        }
        Ok(())
    }

    /// Path of the metadata database.
    pub fn database_path(&self) -> PathBuf {
        self.daemon.data_dir.join("termdeck.db")
    }

    /// Path of the daemon pidfile.
    pub fn pid_file_path(&self) -> PathBuf {
        self.daemon.data_dir.join("termdeck.pid")
    }

    /// Base URL of the HTTP API, as seen from this host.
    pub fn api_base_url(&self) -> String {
        let host = match self.http.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.http.port)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.http.port, 8081);
        assert_eq!(config.multiplexer.program, "tmux");
        assert_eq!(config.bridge.program, "ttyd");
        assert_eq!(config.bridge.port_min, 7700);
        assert_eq!(config.bridge.port_max, 7799);
        assert_eq!(config.bridge.theme.len(), 21);
        assert_eq!(config.restore.policy, RestorePolicy::Resume);
        assert!(config.daemon.data_dir.to_string_lossy().contains("termdeck"));
    }

    #[test]
    fn test_default_commands() {
        let commands = CommandsConfig::default();
        assert!(commands.claude.contains("claude"));
        assert!(commands.claude_resume.ends_with("--resume {resume_id}"));
        assert!(commands.claude_resume_picker.ends_with("--resume"));
        assert!(commands.system_prompt.is_none());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[bridge]
port_min = 9000
port_max = 9009
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.bridge.port_min, 9000);
        assert_eq!(config.bridge.port_max, 9009);
        // Other values should be defaults
        assert_eq!(config.bridge.program, "ttyd");
        assert_eq!(config.http.port, 8081);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r##"
[daemon]
data_dir = "/custom/data"
log_level = "trace"
log_dir = "/var/log/termdeck"

[http]
host = "0.0.0.0"
port = 9090

[multiplexer]
program = "/usr/local/bin/tmux"
timeout_ms = 250
ignore_prefixes = []
mouse = false
socket_name = "dash"

[bridge]
program = "ttyd"
bind_address = "127.0.0.1"
port_min = 7000
port_max = 7001
writable = false
theme = { background = "#000000" }

[commands]
claude = "claude"
claude_resume = "claude --resume {resume_id}"
claude_resume_picker = "claude --resume"
gemini = "gemini --yolo"
lazygit = "lazygit"
system_prompt = "/etc/termdeck/prompt.txt"

[restore]
policy = "reattach"

[dashboard]
projects_dir = "/srv/git"
agent_projects_dir = "/srv/claude"
"##;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.daemon.log_dir, Some(PathBuf::from("/var/log/termdeck")));
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.multiplexer.timeout_ms, 250);
        assert!(config.multiplexer.ignore_prefixes.is_empty());
        assert!(!config.multiplexer.mouse);
        assert_eq!(config.multiplexer.socket_name.as_deref(), Some("dash"));
        assert!(!config.bridge.writable);
        assert_eq!(config.bridge.theme.len(), 1);
        assert_eq!(config.commands.gemini, "gemini --yolo");
        assert_eq!(
            config.commands.system_prompt,
            Some(PathBuf::from("/etc/termdeck/prompt.txt"))
        );
        assert_eq!(config.restore.policy, RestorePolicy::Reattach);
        assert_eq!(config.dashboard.projects_dir, PathBuf::from("/srv/git"));
        assert_eq!(config.api_base_url(), "http://127.0.0.1:9090");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[daemon
log_level = "debug"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[bridge]
port_min = "seven thousand"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_restore_policy_rejected() {
        let toml = r#"
[restore]
policy = "sometimes"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.daemon.log_level = "warn".to_string();
        original.bridge.port_max = 7710;
        original.restore.policy = RestorePolicy::Replay;
        original.commands.system_prompt = Some(PathBuf::from("/tmp/prompt.txt"));

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/termdeck/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.http.port = 18081;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.http.port, 18081);
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("termdeck/config.toml"));
    }

    #[test]
    fn test_derived_paths() {
        let mut config = Config::default();
        config.daemon.data_dir = PathBuf::from("/data");
        assert_eq!(config.database_path(), PathBuf::from("/data/termdeck.db"));
        assert_eq!(config.pid_file_path(), PathBuf::from("/data/termdeck.pid"));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_port_range() {
        let mut config = Config::default();
        config.bridge.port_min = 7800;
        config.bridge.port_max = 7700;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPortRange { min: 7800, max: 7700 })
        );

        config.bridge.port_min = 0;
        config.bridge.port_max = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPortRange { .. })
        ));

        // A single-port pool is allowed
        config.bridge.port_min = 7700;
        config.bridge.port_max = 7700;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.multiplexer.timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout));
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = Config::default();
        config.bridge.bind_address = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_programs_missing() {
        let mut config = Config::default();
        config.multiplexer.program = "/nonexistent/tmux-binary".to_string();
        assert_eq!(
            config.validate_programs(),
            Err(ConfigError::ProgramNotFound(
                "/nonexistent/tmux-binary".to_string()
            ))
        );

        config.multiplexer.program = "sh".to_string();
        config.bridge.program = "definitely-not-a-real-bridge-binary".to_string();
        assert!(matches!(
            config.validate_programs(),
            Err(ConfigError::ProgramNotFound(_))
        ));
    }

    #[test]
    fn test_validate_programs_present() {
        let mut config = Config::default();
        config.multiplexer.program = "sh".to_string();
        config.bridge.program = "/bin/sh".to_string();
        assert!(config.validate_programs().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("TERMDECK_LOG_LEVEL");
        std::env::set_var("TERMDECK_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "debug");

        std::env::remove_var("TERMDECK_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("TERMDECK_LOG_LEVEL", "");
        std::env::set_var("TERMDECK_DATA_DIR", "");

        let mut config = Config::default();
        let original = config.clone();
        config.apply_env_overrides();
        assert_eq!(config, original);

        std::env::remove_var("TERMDECK_LOG_LEVEL");
        std::env::remove_var("TERMDECK_DATA_DIR");
    }

    #[test]
    #[serial]
    fn test_env_override_http_port_and_data_dir() {
        std::env::set_var("TERMDECK_HTTP_PORT", "9191");
        std::env::set_var("TERMDECK_DATA_DIR", "/tmp/termdeck-env");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.http.port, 9191);
        assert_eq!(config.daemon.data_dir, PathBuf::from("/tmp/termdeck-env"));

        std::env::remove_var("TERMDECK_HTTP_PORT");
        std::env::remove_var("TERMDECK_DATA_DIR");
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        std::env::set_var("TERMDECK_HTTP_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.http.port, 8081);

        std::env::remove_var("TERMDECK_HTTP_PORT");
    }
}

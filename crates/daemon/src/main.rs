//! termdeck
//!
//! Browser dashboard daemon for multiplexer terminal sessions.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daemon::client::DaemonClient;
use daemon::config::{default_config_path, Config};
use daemon::orchestrator::DaemonOrchestrator;
use daemon::pidfile::{is_process_running, running_pid, PidFile};
use daemon::systemd::{generate_unit_file, is_systemd, notify_ready, notify_status, notify_stopping};
use protocol::SessionView;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// termdeck - browser dashboard for multiplexer terminal sessions.
#[derive(Parser, Debug)]
#[command(name = "termdeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve {
        /// Run as a systemd notify service
        #[arg(long)]
        systemd: bool,
    },

    /// Stop the running daemon
    Stop {
        /// Seconds to wait for the daemon to exit (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Sweep orphan bridges and restore missing sessions, then exit
    Reconcile,

    /// Show daemon status
    Status,

    /// Manage sessions of the running daemon
    #[command(subcommand)]
    Sessions(SessionsCommands),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Print a systemd user unit for the daemon
    UnitFile {
        /// Path of the termdeck executable (defaults to /usr/bin/termdeck)
        #[arg(long, value_name = "PATH")]
        exec_path: Option<String>,
    },
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List sessions in display order
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Kill a session
    Kill {
        /// Session name
        name: String,
    },
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Load configuration
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let _log_guard = init_logging(&config, cli.verbose)?;
    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Serve { systemd } => {
            run_serve(config, systemd || is_systemd()).await?;
        }
        Commands::Stop { timeout } => {
            stop_daemon(&config, Duration::from_secs(timeout)).await?;
        }
        Commands::Reconcile => {
            run_reconcile(config).await?;
        }
        Commands::Status => {
            let client = DaemonClient::new(config.api_base_url())?;
            let pid = running_pid(config.pid_file_path());

            let health = match client.health().await {
                Ok(health) => health,
                Err(e) => {
                    eprintln!("Daemon is not running: {}", e);
                    std::process::exit(1);
                }
            };
            let sessions = client.list_sessions().await?;
            let bridges = sessions.iter().filter(|s| s.port.is_some()).count();

            println!("Daemon Status: {}", health.status);
            println!("  Version:  {}", health.version);
            match pid {
                Some(pid) => println!("  PID:      {}", pid),
                None => println!("  PID:      -"),
            }
            println!("  API:      {}", client.base_url());
            println!("  Sessions: {}", sessions.len());
            println!("  Bridges:  {}", bridges);
        }
        Commands::Sessions(cmd) => {
            let client = DaemonClient::new(config.api_base_url())?;
            match cmd {
                SessionsCommands::List { json } => {
                    let sessions = match client.list_sessions().await {
                        Ok(sessions) => sessions,
                        Err(e) => {
                            eprintln!("Failed to list sessions: {}", e);
                            std::process::exit(1);
                        }
                    };
                    if json {
                        println!("{}", serde_json::to_string_pretty(&sessions)?);
                    } else {
                        print_sessions_table(&sessions);
                    }
                }
                SessionsCommands::Kill { name } => {
                    if let Err(e) = client.kill_session(&name).await {
                        eprintln!("Failed to kill session {}: {}", name, e);
                        std::process::exit(1);
                    }
                    println!("Session {} killed", name);
                }
            }
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
            }
            ConfigCommands::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "Config file already exists: {} (use --force to overwrite)",
                        config_path.display()
                    );
                }
                Config::default().save(&config_path)?;
                println!("Wrote default configuration to {}", config_path.display());
            }
        },
        Commands::UnitFile { exec_path } => {
            print!("{}", generate_unit_file(exec_path.as_deref()));
        }
    }

    Ok(())
}

/// Install the tracing subscriber.
///
/// Logs go to stderr, and also to a daily-rolling file when `log_dir` is
/// set. The returned guard flushes the file writer and must be held until
/// exit.
fn init_logging(config: &Config, verbose: bool) -> Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_new(&level)
        .with_context(|| format!("Invalid log level: {}", level))?;

    let (file_layer, guard) = match &config.daemon.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "termdeck.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

/// Run the daemon until SIGTERM or SIGINT.
async fn run_serve(config: Config, systemd: bool) -> Result<()> {
    config.validate_programs()?;

    // Taken before anything else: the orphan sweep would kill another
    // instance's bridges.
    let pid_file = PidFile::acquire(config.pid_file_path())?;
    tracing::debug!("Holding pid file {}", pid_file.path().display());

    let orchestrator = DaemonOrchestrator::new(config)?;

    if systemd {
        notify_status("Reconciling sessions");
    }
    let addr = orchestrator.start().await?;
    if systemd {
        notify_ready();
        notify_status(&format!("Serving on http://{}", addr));
    }

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            signal?;
            tracing::info!("Received shutdown signal");
        }
        _ = orchestrator.wait() => {
            tracing::warn!("HTTP server exited");
        }
    }

    if systemd {
        notify_stopping();
    }
    orchestrator.stop().await?;

    drop(pid_file);
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// One-shot startup reconciliation without serving.
async fn run_reconcile(config: Config) -> Result<()> {
    config.validate_programs()?;
    let pid_file = PidFile::acquire(config.pid_file_path())
        .context("Refusing to reconcile while the daemon is running")?;

    let orchestrator = DaemonOrchestrator::new(config)?;
    let report = orchestrator.reconcile().await?;

    println!("{}", report.summary());
    for name in &report.restored {
        println!("  restored  {}", name);
    }
    for (name, reason) in &report.failed {
        println!("  failed    {} ({})", name, reason);
    }

    drop(orchestrator);
    drop(pid_file);
    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Send SIGTERM to the daemon named in the pid file and wait for it to exit.
async fn stop_daemon(config: &Config, timeout: Duration) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid_path = config.pid_file_path();
    let Some(pid) = running_pid(&pid_path) else {
        eprintln!("Daemon is not running");
        std::process::exit(1);
    };

    let raw = i32::try_from(pid).with_context(|| format!("Invalid PID in file: {}", pid))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .with_context(|| format!("Failed to signal daemon (PID {})", pid))?;
    println!("Sent SIGTERM to daemon (PID {}), waiting for it to exit...", pid);

    let start = Instant::now();
    while start.elapsed() < timeout {
        if !is_process_running(pid) {
            println!("Daemon stopped successfully");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    anyhow::bail!(
        "Timeout waiting for daemon to exit ({}s)",
        timeout.as_secs()
    )
}

/// Print sessions in a formatted ASCII table.
fn print_sessions_table(sessions: &[SessionView]) {
    if sessions.is_empty() {
        println!("No sessions.");
        return;
    }

    let name_width = sessions
        .iter()
        .map(|s| s.name.chars().count())
        .max()
        .unwrap_or(4)
        .clamp(4, 32);

    println!(
        "{:<name_width$}  {:<8}  {:<4}  {:>5}  {:<8}  {}",
        "NAME",
        "TYPE",
        "MODE",
        "PORT",
        "CLIENTS",
        "WORKDIR",
        name_width = name_width
    );
    println!("{}", "-".repeat(name_width + 45));

    for session in sessions {
        let port = session
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let attached = if session.attached { "attached" } else { "-" };
        let workdir = if session.workdir.is_empty() {
            "-"
        } else {
            session.workdir.as_str()
        };

        println!(
            "{:<name_width$}  {:<8}  {:<4}  {:>5}  {:<8}  {}",
            truncate_str(&session.name, name_width),
            session.session_type.as_str(),
            session.mode.as_str(),
            port,
            attached,
            workdir,
            name_width = name_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Truncate a string to a maximum length in characters, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

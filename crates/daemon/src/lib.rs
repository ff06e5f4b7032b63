//! # termdeck Daemon Library
//!
//! This crate provides the daemon behind the termdeck browser dashboard: it
//! maps named terminal sessions onto an external multiplexer, exposes each
//! one to the browser through a bridge process, and keeps their metadata
//! across restarts.
//!
//! ## Overview
//!
//! - **Session Registry**: create, rename, kill, list and reorder sessions
//!   against the multiplexer's ground truth
//! - **Bridge Supervisor**: one bridge process per session on a port from a
//!   fixed pool, with exit notification
//! - **Metadata Store**: SQLite-backed session records, display order and
//!   settings
//! - **Startup Reconciler**: orphan sweep and session restore at start
//! - **HTTP API**: the JSON surface the dashboard talks to
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Daemon Orchestrator                     │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                 HTTP API (axum)                      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │     Session Registry   ◄──   Startup Reconciler      │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────┐   │
//! │  │ Multiplexer  │  │     Bridge     │  │   Metadata   │   │
//! │  │    (tmux)    │  │   Supervisor   │  │    Store     │   │
//! │  └──────────────┘  └────────────────┘  └──────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serving until something cancels the shutdown token...
//!     orchestrator.wait().await;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`mux`]: External multiplexer adapter
//! - [`bridge`]: Port pool, bridge supervision and orphan sweep
//! - [`store`]: Metadata store and legacy import
//! - [`session`]: Session registry, naming, startup commands, reconciler
//! - [`web`]: HTTP API
//! - [`discovery`]: Working directories and resumable conversations
//! - [`client`]: HTTP client for the CLI
//! - [`orchestrator`]: Main daemon coordinator

pub mod bridge;
pub mod client;
pub mod config;
pub mod discovery;
pub mod mux;
pub mod orchestrator;
pub mod pidfile;
pub mod session;
pub mod store;
pub mod systemd;
pub mod web;

#[doc(hidden)]
pub mod testing;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, RestorePolicy};

// Re-export session types for convenience
pub use session::{
    reconcile, LogicalSession, ReconcileReport, RegistryError, RegistryOptions, SessionRegistry,
    StartupCommands,
};

// Re-export component types for convenience
pub use bridge::{BridgeError, BridgeLauncher, BridgeSupervisor, PortPool, TtydLauncher};
pub use mux::{ExternalError, Multiplexer, MuxSession, TmuxMultiplexer};
pub use store::{MetadataStore, SessionRecord, StoreError};

pub use client::{ClientError, DaemonClient};
pub use pidfile::PidFile;
pub use systemd::{generate_unit_file, is_systemd, notify_ready, notify_status, notify_stopping};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorState};

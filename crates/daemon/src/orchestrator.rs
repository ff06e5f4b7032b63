//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that builds the multiplexer
//! adapter, the bridge supervisor, the metadata store and the session
//! registry from configuration, runs the startup reconciler, and serves the
//! HTTP API until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeLauncher, BridgeSupervisor, PortPool, TtydLauncher};
use crate::config::Config;
use crate::mux::{Multiplexer, TmuxMultiplexer};
use crate::session::{self, ReconcileReport, RegistryOptions, SessionRegistry, StartupCommands};
use crate::store::{import_legacy, MetadataStore};
use crate::web::{self, AppState};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, reconciling sessions.
    Starting,
    /// Running and serving the HTTP API.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// The session registry every request goes through.
    registry: Arc<SessionRegistry>,
    /// HTTP server task, while running.
    server: Mutex<Option<JoinHandle<Result<()>>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl DaemonOrchestrator {
    /// Creates an orchestrator driving tmux and ttyd.
    pub fn new(config: Config) -> Result<Self> {
        let mux = Arc::new(TmuxMultiplexer::from_config(&config.multiplexer));
        let launcher = Arc::new(TtydLauncher::from_config(
            &config.bridge,
            &config.multiplexer,
        ));
        Self::with_components(config, mux, launcher)
    }

    /// Creates an orchestrator around the given multiplexer and bridge launcher.
    ///
    /// Opens the metadata database under the data directory and imports any
    /// JSON files left by older releases.
    pub fn with_components(
        config: Config,
        mux: Arc<dyn Multiplexer>,
        launcher: Arc<dyn BridgeLauncher>,
    ) -> Result<Self> {
        let db_path = config.database_path();
        let store = MetadataStore::open(&db_path)
            .with_context(|| format!("Failed to open metadata store {}", db_path.display()))?;

        // Retried on the next start
        match import_legacy(&store, &config.daemon.data_dir) {
            Ok(imported) if !imported.is_empty() => info!(
                sessions = imported.sessions,
                ordered = imported.ordered,
                "Imported legacy session metadata"
            ),
            Ok(_) => {}
            Err(e) => warn!(
                "Failed to import legacy session metadata: {:#}",
                anyhow::Error::new(e)
            ),
        }

        let pool = PortPool::from_config(&config.bridge);
        debug!(
            "Bridge port pool {:?} ({} ports)",
            pool.range(),
            pool.capacity()
        );
        let bridges = Arc::new(BridgeSupervisor::new(launcher, pool));

        let registry = Arc::new(SessionRegistry::new(
            mux,
            bridges,
            Arc::new(store),
            StartupCommands::new(config.commands.clone()),
            RegistryOptions::from_config(&config.multiplexer),
        ));

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            registry,
            server: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the startup reconciler with the configured restore policy.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let registry = Arc::clone(&self.registry);
        let policy = self.config.restore.policy;
        let report = tokio::task::spawn_blocking(move || session::reconcile(&registry, policy))
            .await
            .context("Reconciler task failed")??;
        Ok(report)
    }

    /// Reconciles, then binds the configured HTTP address and serves on it.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = web::bind(&self.config.http.host, self.config.http.port)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind HTTP API on {}:{}",
                    self.config.http.host, self.config.http.port
                )
            })?;
        self.start_with_listener(listener).await
    }

    /// Reconciles, then serves the HTTP API on an already bound listener.
    ///
    /// A failed reconciliation is logged and the daemon still starts; the
    /// sessions it could not restore are retried on the next start.
    pub async fn start_with_listener(&self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr().context("Listener has no address")?;
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }

        info!("Starting termdeck daemon...");

        match self.reconcile().await {
            Ok(report) => info!("Startup reconciliation: {}", report.summary()),
            Err(e) => warn!("Startup reconciliation failed: {:#}", e),
        }

        let app = AppState::new(Arc::clone(&self.registry), self.config.dashboard.clone());
        let token = self.shutdown_token.clone();
        let handle = tokio::spawn(async move {
            let result = web::serve(listener, app, token.clone()).await;
            token.cancel();
            result
        });
        *self.server.lock().await = Some(handle);

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }

        info!("termdeck daemon started on http://{}", addr);
        Ok(addr)
    }

    /// Resolves once shutdown is requested or the HTTP server exits.
    pub async fn wait(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// Stops the daemon gracefully.
    ///
    /// Stops accepting requests, waits for the HTTP server to drain, then
    /// terminates every bridge this process started.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }

        info!("Stopping termdeck daemon...");

        self.shutdown_token.cancel();

        if let Some(handle) = self.server.lock().await.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("HTTP server error: {:#}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }

        let bridges = Arc::clone(self.registry.bridges());
        match tokio::task::spawn_blocking(move || bridges.stop_all()).await {
            Ok(stopped) => debug!("Stopped {} bridge(s)", stopped),
            Err(e) => warn!("Failed to stop bridges: {}", e),
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }

        info!("termdeck daemon stopped");
        Ok(())
    }
}

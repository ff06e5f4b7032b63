//! Handlers for the JSON API.
//!
//! Registry calls block on external programs, so every handler moves its
//! work onto the blocking pool with [`blocking`].

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use protocol::{
    BridgePortResponse, CreateSessionRequest, CreateSessionResponse, DirectoriesResponse,
    HealthResponse, ListSessionsResponse, RenameSessionRequest, ResumableResponse,
    SelectedFolder, SessionRecordResponse, SessionType, SessionView, SetOrderRequest,
    StartupState, UpdateSessionRequest, API_VERSION,
};
use serde::Deserialize;

use super::error::WebError;
use crate::config::DashboardConfig;
use crate::discovery;
use crate::session::{SessionRegistry, StartupStatus};

/// Settings key of the dashboard's selected folder.
pub const SELECTED_FOLDER_KEY: &str = "selected_folder";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dashboard: Arc<DashboardConfig>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, dashboard: DashboardConfig) -> Self {
        Self {
            registry,
            dashboard: Arc::new(dashboard),
        }
    }
}

/// Run `f` on the blocking thread pool.
async fn blocking<T, F>(f: F) -> Result<T, WebError>
where
    F: FnOnce() -> Result<T, WebError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WebError::Internal(format!("worker task failed: {e}")))?
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        api: API_VERSION,
    })
}

// ============================================================================
// Sessions
// ============================================================================

/// List sessions in display order.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, WebError> {
    let sessions = blocking(move || Ok(state.registry.list()?)).await?;
    Ok(Json(ListSessionsResponse {
        sessions: sessions.into_iter().map(SessionView::from).collect(),
    }))
}

/// Create a session.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), WebError> {
    let session_type: SessionType = req
        .session_type
        .parse()
        .map_err(|e: protocol::ParseError| WebError::BadRequest(e.to_string()))?;
    let resume_id = req.resume_id.filter(|id| !id.is_empty());

    let outcome = blocking(move || {
        Ok(state
            .registry
            .create(session_type, &req.workdir, resume_id.as_deref())?)
    })
    .await?;

    let (startup, startup_error) = match outcome.startup {
        StartupStatus::NotNeeded => (StartupState::NotNeeded, None),
        StartupStatus::Sent => (StartupState::Sent, None),
        StartupStatus::Failed(reason) => (StartupState::Failed, Some(reason)),
    };
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            name: outcome.name,
            startup,
            startup_error,
        }),
    ))
}

/// Stored metadata of one session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SessionRecordResponse>, WebError> {
    blocking(move || {
        let record = state
            .registry
            .get(&name)?
            .ok_or_else(|| WebError::NotFound(format!("session {name}")))?;
        let port = state.registry.bridge_port(&name);
        Ok(Json(SessionRecordResponse {
            name,
            workdir: record.workdir,
            session_type: record.session_type,
            mode: record.mode,
            resume_id: record.resume_id,
            title: record.title,
            port,
        }))
    })
    .await
}

/// Change the mode and/or resume id. An empty resume id clears it.
pub async fn update_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<StatusCode, WebError> {
    blocking(move || {
        if state.registry.get(&name)?.is_none() {
            return Err(WebError::NotFound(format!("session {name}")));
        }
        if let Some(mode) = req.mode {
            state.registry.set_mode(&name, mode)?;
        }
        if let Some(resume_id) = req.resume_id {
            let resume_id = Some(resume_id.as_str()).filter(|id| !id.is_empty());
            state.registry.set_resume_id(&name, resume_id)?;
        }
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

/// Rename a session. 409 when the multiplexer refuses.
pub async fn rename_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RenameSessionRequest>,
) -> Result<StatusCode, WebError> {
    blocking(move || {
        if state.registry.rename(&name, &req.new_name)? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(WebError::Conflict(format!(
                "cannot rename {} to {}",
                name, req.new_name
            )))
        }
    })
    .await
}

/// Kill a session. Killing an unknown session succeeds.
pub async fn kill_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, WebError> {
    blocking(move || {
        state.registry.kill(&name);
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

/// Port of the session's bridge, starting one if needed.
pub async fn bridge_port(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BridgePortResponse>, WebError> {
    blocking(move || {
        let port = state.registry.ensure_bridge(&name)?;
        Ok(Json(BridgePortResponse { name, port }))
    })
    .await
}

/// Replace the display order.
pub async fn set_order(
    State(state): State<AppState>,
    Json(req): Json<SetOrderRequest>,
) -> Result<StatusCode, WebError> {
    blocking(move || {
        state.registry.set_order(req.order);
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

// ============================================================================
// Discovery and settings
// ============================================================================

pub async fn list_directories(
    State(state): State<AppState>,
) -> Result<Json<DirectoriesResponse>, WebError> {
    blocking(move || {
        Ok(Json(DirectoriesResponse {
            directories: discovery::directories(&state.dashboard.projects_dir),
        }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ResumableQuery {
    pub workdir: String,
}

/// Agent conversations that can be resumed in `workdir`.
pub async fn list_resumable(
    State(state): State<AppState>,
    Query(query): Query<ResumableQuery>,
) -> Result<Json<ResumableResponse>, WebError> {
    blocking(move || {
        Ok(Json(ResumableResponse {
            conversations: discovery::resumable_conversations(
                &state.dashboard.agent_projects_dir,
                &query.workdir,
            ),
        }))
    })
    .await
}

/// The folder new sessions default to. Falls back to the projects directory.
pub async fn get_selected_folder(
    State(state): State<AppState>,
) -> Result<Json<SelectedFolder>, WebError> {
    blocking(move || {
        let stored = state
            .registry
            .store()
            .get_setting(SELECTED_FOLDER_KEY)
            .map_err(|e| WebError::Internal(e.to_string()))?;
        let path = stored
            .unwrap_or_else(|| state.dashboard.projects_dir.to_string_lossy().into_owned());
        Ok(Json(SelectedFolder { path }))
    })
    .await
}

pub async fn set_selected_folder(
    State(state): State<AppState>,
    Json(folder): Json<SelectedFolder>,
) -> Result<StatusCode, WebError> {
    if !FsPath::new(&folder.path).is_absolute() {
        return Err(WebError::BadRequest(format!(
            "folder must be an absolute path: {}",
            folder.path
        )));
    }
    blocking(move || {
        state
            .registry
            .store()
            .set_setting(SELECTED_FOLDER_KEY, &folder.path)
            .map_err(|e| WebError::Internal(e.to_string()))?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

//! Axum server for the JSON API.

use std::net::SocketAddr;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

/// Build the router with every API route.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        // Sessions
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{name}",
            get(handlers::get_session)
                .patch(handlers::update_session)
                .delete(handlers::kill_session),
        )
        .route("/sessions/{name}/rename", post(handlers::rename_session))
        .route("/sessions/{name}/bridge", get(handlers::bridge_port))
        .route("/order", put(handlers::set_order))
        // Discovery
        .route("/directories", get(handlers::list_directories))
        .route("/resumable", get(handlers::list_resumable))
        .route(
            "/selected-folder",
            get(handlers::get_selected_folder).put(handlers::set_selected_folder),
        );

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the HTTP listener.
pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    Ok(listener)
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);
    tracing::info!("HTTP API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("HTTP API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeSupervisor, PortPool};
    use crate::config::{CommandsConfig, DashboardConfig};
    use crate::session::{RegistryOptions, SessionRegistry, StartupCommands};
    use crate::store::MetadataStore;
    use crate::testing::{free_port_range, FakeMultiplexer, SleepLauncher};
    use axum::body::{Body, Bytes};
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use protocol::{
        ApiErrorBody, BridgePortResponse, CreateSessionResponse, DirectoriesResponse,
        HealthResponse, ListSessionsResponse, SelectedFolder, SessionMode,
        SessionRecordResponse, SessionType, StartupState,
    };
    use serde::de::DeserializeOwned;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        mux: Arc<FakeMultiplexer>,
        _dirs: TempDir,
    }

    fn test_app_with_ports(ports: u16) -> TestApp {
        let dirs = TempDir::new().unwrap();
        std::fs::create_dir(dirs.path().join("app")).unwrap();

        let mux = Arc::new(FakeMultiplexer::new());
        let pool = PortPool::new(free_port_range(ports), IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut commands = CommandsConfig::default();
        commands.claude = "claude".to_string();
        let registry = SessionRegistry::new(
            mux.clone(),
            Arc::new(BridgeSupervisor::new(Arc::new(SleepLauncher::new()), pool)),
            Arc::new(MetadataStore::open_in_memory().unwrap()),
            StartupCommands::new(commands),
            RegistryOptions::default(),
        );
        let dashboard = DashboardConfig {
            projects_dir: dirs.path().to_path_buf(),
            agent_projects_dir: dirs.path().join("agents"),
        };
        TestApp {
            router: build_router(AppState::new(Arc::new(registry), dashboard)),
            mux,
            _dirs: dirs,
        }
    }

    fn test_app() -> TestApp {
        test_app_with_ports(4)
    }

    async fn send(
        app: &TestApp,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Bytes) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
        serde_json::from_slice(body).unwrap()
    }

    async fn create(app: &TestApp, session_type: &str, workdir: &str) -> CreateSessionResponse {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({"type": session_type, "workdir": workdir})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        parse(&body)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app();
        let (status, body) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = parse(&body);
        assert_eq!(health.status, "ok");
        assert_eq!(health.api, protocol::API_VERSION);
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let app = test_app();

        let created = create(&app, "claude", "/work/app").await;
        assert_eq!(created.name, "app-claude-1");
        assert_eq!(created.startup, StartupState::Sent);
        assert_eq!(create(&app, "shell", "/work/app").await.startup, StartupState::NotNeeded);
        app.mux.set_title("app-claude-1", "\u{2733} Tests");

        let (status, body) = send(&app, Method::GET, "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        let listed: ListSessionsResponse = parse(&body);
        let names: Vec<&str> = listed.sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app-claude-1", "app-shell-1"]);
        assert_eq!(listed.sessions[0].title, "Tests");
        assert_eq!(listed.sessions[1].title, "app-shell-1");
        assert_eq!(listed.sessions[0].session_type, SessionType::Claude);
        assert!(listed.sessions.iter().all(|s| s.port.is_some()));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_type() {
        let app = test_app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({"type": "emacs", "workdir": "/work"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ApiErrorBody = parse(&body);
        assert_eq!(error.error, "Bad Request");
        assert!(error.details.unwrap().contains("emacs"));
    }

    #[tokio::test]
    async fn test_create_multiplexer_failure() {
        let app = test_app();
        app.mux.fail_new_session(true);
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/sessions",
            Some(serde_json::json!({"type": "shell", "workdir": "/work"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_startup_failure_is_reported() {
        let app = test_app();
        app.mux.fail_send(true);
        let created = create(&app, "claude", "/work/app").await;
        assert_eq!(created.startup, StartupState::Failed);
        assert!(created.startup_error.is_some());
    }

    #[tokio::test]
    async fn test_get_and_update_session() {
        let app = test_app();
        let name = create(&app, "claude", "/work/app").await.name;
        let uri = format!("/api/sessions/{name}");

        let (status, _) = send(
            &app,
            Method::PATCH,
            &uri,
            Some(serde_json::json!({"mode": "chat", "resume_id": "conv-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let record: SessionRecordResponse = parse(&body);
        assert_eq!(record.workdir, "/work/app");
        assert_eq!(record.mode, SessionMode::Chat);
        assert_eq!(record.resume_id.as_deref(), Some("conv-1"));

        let (status, _) = send(&app, Method::GET, "/api/sessions/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app,
            Method::PATCH,
            "/api/sessions/ghost",
            Some(serde_json::json!({"mode": "cli"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rename_and_kill() {
        let app = test_app();
        let name = create(&app, "shell", "/work/app").await.name;

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/sessions/{name}/rename"),
            Some(serde_json::json!({"new_name": "notes"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(app.mux.names(), vec!["notes"]);

        app.mux.fail_rename(true);
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/sessions/notes/rename",
            Some(serde_json::json!({"new_name": "other"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/sessions/notes/rename",
            Some(serde_json::json!({"new_name": "bad:name"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::DELETE, "/api/sessions/notes", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(app.mux.names().is_empty());

        // Idempotent
        let (status, _) = send(&app, Method::DELETE, "/api/sessions/notes", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_bridge_port() {
        let app = test_app_with_ports(1);
        let first = create(&app, "shell", "/work/a").await.name;
        let second = create(&app, "shell", "/work/b").await.name;

        let (status, body) = send(&app, Method::GET, &format!("/api/sessions/{first}/bridge"), None).await;
        assert_eq!(status, StatusCode::OK);
        let bridge: BridgePortResponse = parse(&body);
        assert_eq!(bridge.name, first);

        let (status, _) = send(&app, Method::GET, &format!("/api/sessions/{second}/bridge"), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(&app, Method::GET, "/api/sessions/ghost/bridge", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_order() {
        let app = test_app();
        create(&app, "shell", "/w/a").await;
        create(&app, "shell", "/w/b").await;

        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/order",
            Some(serde_json::json!({"order": ["b-shell-1", "a-shell-1"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, Method::GET, "/api/sessions", None).await;
        let listed: ListSessionsResponse = parse(&body);
        let names: Vec<&str> = listed.sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b-shell-1", "a-shell-1"]);
    }

    #[tokio::test]
    async fn test_list_failure_is_bad_gateway() {
        let app = test_app();
        app.mux.fail_list(true);
        let (status, _) = send(&app, Method::GET, "/api/sessions", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_discovery_and_selected_folder() {
        let app = test_app();

        let (status, body) = send(&app, Method::GET, "/api/directories", None).await;
        assert_eq!(status, StatusCode::OK);
        let dirs: DirectoriesResponse = parse(&body);
        assert_eq!(dirs.directories[0], "/");
        assert!(dirs.directories.iter().any(|d| d.ends_with("/app")));

        let (status, body) = send(&app, Method::GET, "/api/resumable?workdir=/work/app", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = parse(&body);
        assert_eq!(json["conversations"], serde_json::json!([]));

        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/selected-folder",
            Some(serde_json::json!({"path": "/work/app"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&app, Method::GET, "/api/selected-folder", None).await;
        let folder: SelectedFolder = parse(&body);
        assert_eq!(folder.path, "/work/app");

        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/selected-folder",
            Some(serde_json::json!({"path": "relative"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

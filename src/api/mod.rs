// REST API endpoints for the app server

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Reported by `GET /`.
pub const SERVER_VERSION: f64 = 0.1;

/// Script written by `/submit` when the request names no file.
pub const DEFAULT_SCRIPT_NAME: &str = "script.py";

/// Requests forwarded from the HTTP handlers to the serve loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Run the plan stored at `script`.
    Start { script: PathBuf },
    /// Interrupt the active run, if any.
    Stop,
}

#[derive(Clone)]
pub struct AppState {
    pub script_dir: PathBuf,
    pub commands: mpsc::Sender<ServerCommand>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptPayload {
    pub filename: Option<String>,
    pub script: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/write", post(write_script))
        .route("/submit", post(submit_script))
        .route("/stop", get(stop_run))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(serde_json::json!({ "CoSimServer": SERVER_VERSION }))
}

async fn write_script(
    State(state): State<AppState>,
    Json(payload): Json<ScriptPayload>,
) -> Result<Json<bool>, StatusCode> {
    let filename = payload.filename.as_deref().ok_or(StatusCode::BAD_REQUEST)?;
    persist(&state.script_dir, filename, payload.script.as_deref()).await?;
    Ok(Json(true))
}

async fn submit_script(
    State(state): State<AppState>,
    Json(payload): Json<ScriptPayload>,
) -> Result<Json<bool>, StatusCode> {
    let filename = payload.filename.as_deref().unwrap_or(DEFAULT_SCRIPT_NAME);
    let script = persist(&state.script_dir, filename, payload.script.as_deref()).await?;

    info!("submitting {}", script.display());
    state
        .commands
        .send(ServerCommand::Start { script })
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(true))
}

async fn stop_run(State(state): State<AppState>) -> Result<Json<bool>, StatusCode> {
    state
        .commands
        .send(ServerCommand::Stop)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(true))
}

/// Writes `content` (empty when absent) below `dir`. Only plain relative
/// names are accepted.
async fn persist(dir: &Path, filename: &str, content: Option<&str>) -> Result<PathBuf, StatusCode> {
    let relative = Path::new(filename);
    let is_plain = !filename.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !is_plain {
        return Err(StatusCode::BAD_REQUEST);
    }

    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            error!("could not create {}: {e}", parent.display());
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    }
    tokio::fs::write(&path, content.unwrap_or_default())
        .await
        .map_err(|e| {
            error!("could not write {}: {e}", path.display());
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(path)
}

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{config::StabilizerConfig, protocol::PROTOCOL_VERSION, session::InputEvent, AppState};

/// API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub server_id: String,
    pub protocol_version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}

/// Get server status
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let server = &state.control_server;
    let status = StatusResponse {
        server_id: server.server_id().to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        uptime_seconds: server.uptime_seconds(),
        active_sessions: server.active_sessions(),
    };

    (StatusCode::OK, Json(ApiResponse::success(status)))
}

/// List live WebSocket sessions
pub async fn sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.control_server.sessions();
    (StatusCode::OK, Json(ApiResponse::success(sessions)))
}

/// Default stabilizer config applied to new sessions
pub async fn config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.control_server.default_config().clone();
    (StatusCode::OK, Json(ApiResponse::success(config)))
}

/// Batch stabilize request
#[derive(Debug, Deserialize)]
pub struct StabilizeRequest {
    #[serde(default)]
    pub config: Option<StabilizerConfig>,
    pub events: Vec<InputEvent>,
}

/// Replay a recorded event stream through a fresh session
pub async fn stabilize(
    State(state): State<AppState>,
    Json(req): Json<StabilizeRequest>,
) -> impl IntoResponse {
    match state.control_server.replay(req.config, req.events) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(outcome)),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics exporter not installed".to_string(),
        ),
    }
}

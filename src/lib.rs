//! Adaptive pointer stroke stabilizer.
//!
//! The [`filter`] module holds the constant-velocity Kalman core, adaptive
//! process noise and lookahead extrapolation; [`session`] drives them once
//! per sample and arbitrates between normal and fast-response output. The
//! [`control`] and [`protocol`] modules expose sessions over WebSocket and
//! REST.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod control;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod session;

pub use config::{AppConfig, ProcessNoiseModel, StabilizerConfig};
pub use error::{ConfigError, SingularMatrix};
pub use session::{
    InputEvent, Mode, OutputPoint, PointSink, Position, Sample, SampleSource, SessionController,
    StepStatus,
};

use crate::control::{handlers, ControlServer};

#[derive(Clone)]
pub struct AppState {
    pub control_server: Arc<ControlServer>,
    pub metrics: Option<PrometheusHandle>,
}

/// HTTP/WebSocket routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(websocket_handler))
        .route("/metrics", get(handlers::metrics))
        .route("/api/status", get(handlers::status))
        .route("/api/sessions", get(handlers::sessions))
        .route("/api/config", get(handlers::config))
        .route("/api/stabilize", post(handlers::stabilize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, addr))
}

async fn handle_websocket(socket: axum::extract::ws::WebSocket, state: AppState, addr: SocketAddr) {
    if let Err(e) = state
        .control_server
        .handle_connection(socket, Some(addr))
        .await
    {
        tracing::error!("WebSocket error: {}", e);
    }
}

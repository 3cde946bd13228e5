use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod handlers;

use crate::{
    config::StabilizerConfig,
    error::ConfigError,
    protocol::{
        get_current_time, ClientMessage, ErrorCode, ErrorMessage, HeartbeatMessage, HelloMessage,
        PointMessage, ServerMessage, WelcomeMessage, PROTOCOL_VERSION,
    },
    session::{InputEvent, Mode, OutputPoint, PointSink, SessionController, SessionStats},
};

/// Control server: one stabilizer session per WebSocket connection
pub struct ControlServer {
    /// Server ID
    server_id: Uuid,

    /// Config used for sessions that do not send their own
    default_config: StabilizerConfig,

    /// Read-only summaries of live sessions
    sessions: Arc<RwLock<HashMap<Uuid, SessionInfo>>>,

    started_at: Instant,
}

/// Summary of a live session, refreshed after every message
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub client_name: Option<String>,
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub mode: Mode,
    pub stats: SessionStats,
}

/// Connection-local state; never shared between tasks
pub struct Connection {
    id: Uuid,
    session: SessionController,
    sequence: u64,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }
}

/// Turns emitted points into outgoing messages
struct MessageSink<'a> {
    out: &'a mut Vec<ServerMessage>,
    sequence: &'a mut u64,
}

impl PointSink for MessageSink<'_> {
    fn emit(&mut self, point: OutputPoint) {
        self.out
            .push(ServerMessage::Point(PointMessage::new(*self.sequence, point)));
        *self.sequence += 1;
    }

    fn clear_path(&mut self) {
        self.out.push(ServerMessage::ClearPath);
    }
}

/// Result of a batch replay
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayOutcome {
    pub points: Vec<OutputPoint>,
    /// Number of clear-path signals; `points` holds only what followed the last one
    pub cleared: u32,
    pub stats: SessionStats,
}

impl PointSink for ReplayOutcome {
    fn emit(&mut self, point: OutputPoint) {
        self.points.push(point);
    }

    fn clear_path(&mut self) {
        self.points.clear();
        self.cleared += 1;
    }
}

impl ControlServer {
    pub fn new(default_config: StabilizerConfig) -> Result<Self, ConfigError> {
        default_config.validate()?;

        Ok(Self {
            server_id: Uuid::new_v4(),
            default_config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            started_at: Instant::now(),
        })
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn default_config(&self) -> &StabilizerConfig {
        &self.default_config
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    /// Register a new connection with a default-configured session
    pub fn open_connection(&self, remote_addr: Option<SocketAddr>) -> Result<Connection> {
        let session = SessionController::new(self.default_config.clone())?;
        let id = Uuid::new_v4();

        self.sessions.write().insert(
            id,
            SessionInfo {
                session_id: id,
                client_name: None,
                remote_addr: remote_addr.map(|a| a.to_string()),
                connected_at: Utc::now(),
                mode: session.mode(),
                stats: session.stats().clone(),
            },
        );
        metrics::gauge!("stabilizer_active_sessions").increment(1.0);
        info!("Opened session {} from {:?}", id, remote_addr);

        Ok(Connection {
            id,
            session,
            sequence: 0,
        })
    }

    pub fn close_connection(&self, connection: &Connection) {
        if self.sessions.write().remove(&connection.id).is_some() {
            metrics::gauge!("stabilizer_active_sessions").decrement(1.0);
        }
        info!(
            "Closed session {} after {} samples",
            connection.id,
            connection.session.stats().samples
        );
    }

    pub fn welcome(&self, connection: &Connection) -> ServerMessage {
        ServerMessage::Welcome(WelcomeMessage {
            session_id: connection.id,
            protocol_version: PROTOCOL_VERSION.to_string(),
            config: connection.session.config().clone(),
        })
    }

    /// Handle one text frame, returning the replies in order
    pub fn handle_text(&self, connection: &mut Connection, text: &str) -> Vec<ServerMessage> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message on session {}: {}", connection.id, e);
                return vec![error_message(ErrorCode::ProtocolError, e.to_string())];
            }
        };

        let mut replies = Vec::new();

        match message {
            ClientMessage::Hello(hello) => {
                replies.push(self.handle_hello(connection, hello));
            }
            ClientMessage::Heartbeat(heartbeat) => {
                replies.push(ServerMessage::Heartbeat(HeartbeatMessage {
                    client_time: heartbeat.client_time,
                    server_time: Some(get_current_time()),
                }));
            }
            other => {
                if let Some(event) = other.into_input_event() {
                    self.handle_event(connection, event, &mut replies);
                }
            }
        }

        self.refresh_info(connection);
        replies
    }

    fn handle_hello(&self, connection: &mut Connection, hello: HelloMessage) -> ServerMessage {
        if let Some(config) = hello.config {
            match SessionController::new(config) {
                Ok(session) => {
                    connection.session = session;
                    connection.sequence = 0;
                }
                Err(e) => {
                    warn!("Rejected config for session {}: {}", connection.id, e);
                    return error_message(ErrorCode::InvalidConfig, e.to_string());
                }
            }
        }

        if let Some(name) = hello.client_name {
            info!("Session {} is client {:?}", connection.id, name);
            if let Some(info) = self.sessions.write().get_mut(&connection.id) {
                info.client_name = Some(name);
            }
        }

        self.welcome(connection)
    }

    fn handle_event(
        &self,
        connection: &mut Connection,
        event: InputEvent,
        replies: &mut Vec<ServerMessage>,
    ) {
        let before = connection.session.stats().clone();

        let mut sink = MessageSink {
            out: replies,
            sequence: &mut connection.sequence,
        };
        connection.session.handle(event, &mut sink);

        record_metrics(&before, connection.session.stats());
    }

    fn refresh_info(&self, connection: &Connection) {
        if let Some(info) = self.sessions.write().get_mut(&connection.id) {
            info.mode = connection.session.mode();
            info.stats = connection.session.stats().clone();
        }
    }

    /// Run a batch of events through a throwaway session
    pub fn replay(
        &self,
        config: Option<StabilizerConfig>,
        events: Vec<InputEvent>,
    ) -> Result<ReplayOutcome, ConfigError> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let mut session = SessionController::new(config)?;
        let mut outcome = ReplayOutcome::default();

        session.run(&mut events.into_iter(), &mut outcome);
        record_metrics(&SessionStats::default(), session.stats());
        outcome.stats = session.stats().clone();

        Ok(outcome)
    }

    /// Handle new WebSocket connection
    pub async fn handle_connection(
        &self,
        websocket: WebSocket,
        remote_addr: Option<SocketAddr>,
    ) -> Result<()> {
        let (mut ws_sender, mut ws_receiver) = websocket.split();
        let (tx, mut rx) = mpsc::channel::<ServerMessage>(256);

        let mut connection = self.open_connection(remote_addr)?;
        let session_id = connection.id;

        // Spawn task to forward messages to WebSocket
        let tx_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        tx.send(self.welcome(&connection)).await?;

        // Handle incoming messages
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let replies = self.handle_text(&mut connection, &text);
                    let mut closed = false;
                    for reply in replies {
                        if tx.send(reply).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Session {} disconnected", session_id);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", session_id, e);
                    break;
                }
                _ => {}
            }
        }

        // Cleanup
        self.close_connection(&connection);
        drop(tx);
        if let Err(e) = tx_task.await {
            warn!("Forwarding task for {} ended abnormally: {}", session_id, e);
        }

        Ok(())
    }
}

fn error_message(code: ErrorCode, message: String) -> ServerMessage {
    ServerMessage::Error(ErrorMessage { code, message })
}

fn record_metrics(before: &SessionStats, after: &SessionStats) {
    metrics::counter!("stabilizer_samples_total").increment(after.samples - before.samples);
    metrics::counter!("stabilizer_singular_fallbacks_total")
        .increment(after.singular_fallbacks - before.singular_fallbacks);
    metrics::counter!("stabilizer_recoveries_total")
        .increment(after.recoveries - before.recoveries);
    metrics::counter!("stabilizer_mode_transitions_total")
        .increment(after.mode_transitions - before.mode_transitions);
}

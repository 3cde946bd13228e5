use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ErrorCode;
use crate::{
    config::StabilizerConfig,
    session::{InputEvent, Mode, OutputPoint, Position, Sample, StepStatus},
};

/// Messages sent by a pointer client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Session setup
    Hello(HelloMessage),

    // Stroke input
    Sample(Sample),
    BeginStroke,
    EndStroke,
    Reset,

    // Connection
    Heartbeat(HeartbeatMessage),
}

impl ClientMessage {
    /// Stroke input carried by this message, if any
    pub fn into_input_event(self) -> Option<InputEvent> {
        match self {
            Self::Sample(sample) => Some(InputEvent::Sample(sample)),
            Self::BeginStroke => Some(InputEvent::BeginStroke),
            Self::EndStroke => Some(InputEvent::EndStroke),
            Self::Reset => Some(InputEvent::Reset),
            Self::Hello(_) | Self::Heartbeat(_) => None,
        }
    }
}

/// Messages sent back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomeMessage),
    Point(PointMessage),
    /// Drop the rendered path; sent on reset
    ClearPath,
    Heartbeat(HeartbeatMessage),
    Error(ErrorMessage),
}

/// Optional handshake; a config here replaces the session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloMessage {
    pub client_name: Option<String>,
    pub config: Option<StabilizerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub session_id: Uuid,
    pub protocol_version: String,
    pub config: StabilizerConfig,
}

/// One stabilized point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointMessage {
    pub sequence: u64,
    pub position: Position,
    pub mode: Mode,
    pub status: StepStatus,
}

impl PointMessage {
    pub fn new(sequence: u64, point: OutputPoint) -> Self {
        Self {
            sequence,
            position: point.position,
            mode: point.mode,
            status: point.status,
        }
    }
}

/// Heartbeat to keep connection alive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub client_time: f64,
    #[serde(default)]
    pub server_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        let sample: ClientMessage =
            serde_json::from_str(r#"{"type":"sample","t":0.016,"x":10.0,"y":0.0}"#).unwrap();
        assert!(matches!(
            sample.into_input_event(),
            Some(InputEvent::Sample(Sample { x, .. })) if x == 10.0
        ));

        let begin: ClientMessage = serde_json::from_str(r#"{"type":"begin_stroke"}"#).unwrap();
        assert!(matches!(begin.into_input_event(), Some(InputEvent::BeginStroke)));

        let hello: ClientMessage =
            serde_json::from_str(r#"{"type":"hello","config":{"measurement_noise":4.0}}"#)
                .unwrap();
        match hello {
            ClientMessage::Hello(hello) => {
                assert_eq!(hello.config.unwrap().measurement_noise, 4.0);
                assert!(hello.client_name.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_point_message_shape() {
        let point = OutputPoint {
            position: Position { x: 1.5, y: -2.0 },
            mode: Mode::FastResponse,
            status: StepStatus::Filtered,
        };
        let json = serde_json::to_value(ServerMessage::Point(PointMessage::new(7, point))).unwrap();

        assert_eq!(json["type"], "point");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["position"]["x"], 1.5);
        assert_eq!(json["mode"], "fast_response");
        assert_eq!(json["status"], "filtered");
    }

    #[test]
    fn test_clear_path_shape() {
        let json = serde_json::to_string(&ServerMessage::ClearPath).unwrap();
        assert_eq!(json, r#"{"type":"clear_path"}"#);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
    }
}

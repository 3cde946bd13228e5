use serde::{Deserialize, Serialize};

pub mod messages;

pub use messages::*;

/// Protocol revision announced in the welcome message
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Error codes carried by `error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidConfig = 400,
    ProtocolError = 501,
}

/// Get current time in seconds with microsecond precision
pub fn get_current_time() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

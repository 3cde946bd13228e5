use thiserror::Error;

/// Raised by the 2x2 inverse when the input has no usable inverse
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("singular matrix (determinant {determinant:e})")]
pub struct SingularMatrix {
    pub determinant: f64,
}

/// Configuration rejected at session construction or load time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("lookahead horizon must be positive, got {0}s")]
    NonPositiveLookahead(f64),

    #[error("exit threshold {exit} must be below enter threshold {enter}")]
    InvalidHysteresis { enter: f64, exit: f64 },

    #[error("fast blend must lie in [0, 1], got {0}")]
    InvalidBlend(f64),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
}

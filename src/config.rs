use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path};
use tracing::info;

use crate::error::ConfigError;

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_ENV: &str = "STABILIZER_CONFIG";

/// Environment variable overriding the listen address
pub const BIND_ENV: &str = "STABILIZER_BIND";

const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// How the adaptive noise level is spread over the 4x4 process noise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessNoiseModel {
    /// `level * I`, independent of the step length
    #[default]
    Uniform,
    /// Piecewise white acceleration, scales with dt
    WhiteAcceleration,
}

/// Tuning of one stabilizer session. Fixed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Measurement noise variance per axis (R diagonal). Large = smoother.
    pub measurement_noise: f64,

    /// Process noise level assumed while motion is smooth
    pub noise_base: f64,

    /// Scale from squared innovation norm to extra process noise
    pub noise_gain: f64,

    /// Upper bound on the extra process noise
    pub noise_cap: f64,

    pub process_noise_model: ProcessNoiseModel,

    /// Extrapolation horizon in seconds
    pub lookahead_secs: f64,

    /// Innovation norm above which fast-response mode is entered
    pub enter_threshold: f64,

    /// Innovation norm below which normal mode is restored
    pub exit_threshold: f64,

    /// Weight of the raw measurement in fast-response output
    pub fast_blend: f64,

    pub initial_position_variance: f64,
    pub initial_velocity_variance: f64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            measurement_noise: 100.0,
            noise_base: 0.001,
            noise_gain: 0.2,
            noise_cap: 80.0,
            process_noise_model: ProcessNoiseModel::Uniform,
            lookahead_secs: 0.08,
            enter_threshold: 7.0,
            exit_threshold: 3.0,
            fast_blend: 0.5,
            initial_position_variance: 100.0,
            initial_velocity_variance: 1000.0,
        }
    }
}

impl StabilizerConfig {
    /// Reject configurations the filter cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("measurement_noise", self.measurement_noise),
            ("noise_base", self.noise_base),
            ("noise_gain", self.noise_gain),
            ("noise_cap", self.noise_cap),
            ("lookahead_secs", self.lookahead_secs),
            ("enter_threshold", self.enter_threshold),
            ("exit_threshold", self.exit_threshold),
            ("fast_blend", self.fast_blend),
            ("initial_position_variance", self.initial_position_variance),
            ("initial_velocity_variance", self.initial_velocity_variance),
        ];

        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }

        for (name, value) in [
            ("measurement_noise", self.measurement_noise),
            ("noise_base", self.noise_base),
            ("noise_gain", self.noise_gain),
            ("noise_cap", self.noise_cap),
            ("exit_threshold", self.exit_threshold),
            ("initial_position_variance", self.initial_position_variance),
            ("initial_velocity_variance", self.initial_velocity_variance),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Negative { name, value });
            }
        }

        if self.lookahead_secs <= 0.0 {
            return Err(ConfigError::NonPositiveLookahead(self.lookahead_secs));
        }

        if self.exit_threshold >= self.enter_threshold {
            return Err(ConfigError::InvalidHysteresis {
                enter: self.enter_threshold,
                exit: self.exit_threshold,
            });
        }

        if !(0.0..=1.0).contains(&self.fast_blend) {
            return Err(ConfigError::InvalidBlend(self.fast_blend));
        }

        Ok(())
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Service configuration assembled by the binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub stabilizer: StabilizerConfig,
}

impl AppConfig {
    /// Load from the file named by `STABILIZER_CONFIG`, then apply `STABILIZER_BIND`
    pub fn from_env() -> Result<Self, ConfigError> {
        let stabilizer = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => load_file(&path)?,
            Err(_) => StabilizerConfig::default(),
        };

        let bind_text = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
        let bind = bind_text
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_text.clone()))?;

        Ok(Self { bind, stabilizer })
    }
}

fn load_file(path: impl AsRef<Path>) -> Result<StabilizerConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = StabilizerConfig::from_json(&text)?;
    info!("Loaded stabilizer config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StabilizerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_lookahead() {
        let config = StabilizerConfig {
            lookahead_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveLookahead(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_hysteresis() {
        let config = StabilizerConfig {
            enter_threshold: 5.0,
            exit_threshold: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHysteresis { .. })
        ));
    }

    #[test]
    fn test_rejects_nan_and_negative_values() {
        let nan = StabilizerConfig {
            noise_gain: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            nan.validate(),
            Err(ConfigError::NonFinite { name: "noise_gain", .. })
        ));

        let negative = StabilizerConfig {
            measurement_noise: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::Negative { name: "measurement_noise", .. })
        ));
    }

    #[test]
    fn test_rejects_blend_out_of_range() {
        let config = StabilizerConfig {
            fast_blend: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBlend(_))));
    }

    #[test]
    fn test_zero_noise_is_allowed() {
        let config = StabilizerConfig {
            measurement_noise: 0.0,
            noise_base: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = StabilizerConfig::from_json(
            r#"{"measurement_noise": 25.0, "process_noise_model": "white_acceleration"}"#,
        )
        .unwrap();

        assert_eq!(config.measurement_noise, 25.0);
        assert_eq!(config.process_noise_model, ProcessNoiseModel::WhiteAcceleration);
        assert_eq!(config.lookahead_secs, 0.08);
    }

    #[test]
    fn test_from_json_validates() {
        let result = StabilizerConfig::from_json(r#"{"enter_threshold": 1.0}"#);
        assert!(matches!(result, Err(ConfigError::InvalidHysteresis { .. })));
    }
}

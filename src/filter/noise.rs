use nalgebra::Matrix4;

use super::matrix::{MeasurementVector, StateMatrix};
use crate::config::{ProcessNoiseModel, StabilizerConfig};

/// Innovation-driven process noise level
///
/// Large residuals raise the level so the next predict trusts the
/// measurement more; small residuals let it fall back to `base` so the
/// motion model dominates. The increase is clamped at `cap`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveNoise {
    base: f64,
    gain: f64,
    cap: f64,
    model: ProcessNoiseModel,
    level: f64,
}

impl AdaptiveNoise {
    pub fn new(config: &StabilizerConfig) -> Self {
        Self {
            base: config.noise_base,
            gain: config.noise_gain,
            cap: config.noise_cap,
            model: config.process_noise_model,
            level: config.noise_base,
        }
    }

    /// Current process noise level
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Recompute the level from the innovation of a successful update
    pub fn observe(&mut self, innovation: &MeasurementVector) {
        let squared = innovation.norm_squared();
        if squared.is_nan() {
            return;
        }

        // An overflowed norm saturates at the cap; inf * 0 would be NaN
        let raised = if self.gain == 0.0 {
            0.0
        } else {
            (squared * self.gain).min(self.cap)
        };
        self.level = self.base + raised;
    }

    /// Q for the next predict step
    pub fn process_noise(&self, dt: f64) -> StateMatrix {
        match self.model {
            ProcessNoiseModel::Uniform => Matrix4::identity() * self.level,
            ProcessNoiseModel::WhiteAcceleration => {
                let q_pp = dt.powi(4) / 4.0;
                let q_pv = dt.powi(3) / 2.0;
                let q_vv = dt * dt;

                #[rustfmt::skip]
                let blocks = Matrix4::new(
                    q_pp, q_pv, 0.0,  0.0,
                    q_pv, q_vv, 0.0,  0.0,
                    0.0,  0.0,  q_pp, q_pv,
                    0.0,  0.0,  q_pv, q_vv,
                );
                blocks * self.level
            }
        }
    }

    pub fn reset(&mut self) {
        self.level = self.base;
    }
}

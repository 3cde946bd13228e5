use nalgebra::Vector2;

use super::matrix::{MeasurementVector, StateVector};

/// Linear extrapolation of the filtered state by a fixed horizon
///
/// The filtered position trails the pointer by pipeline and render latency;
/// projecting along the estimated velocity cancels that under the
/// constant-velocity assumption. No clamping is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lookahead {
    horizon: f64,
}

impl Lookahead {
    pub fn new(horizon_secs: f64) -> Self {
        Self {
            horizon: horizon_secs,
        }
    }

    /// `(px + vx * T, py + vy * T)`
    pub fn project(&self, state: &StateVector) -> MeasurementVector {
        Vector2::new(
            state[0] + state[1] * self.horizon,
            state[2] + state[3] * self.horizon,
        )
    }
}

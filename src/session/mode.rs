use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::matrix::MeasurementVector;

/// Output regime, tagged on every emitted point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Smoothed, latency-compensated path
    #[default]
    Normal,
    /// Abrupt intentional motion; output leans toward the raw sample
    FastResponse,
}

/// Hysteretic switch between normal and fast-response output
#[derive(Debug, Clone, PartialEq)]
pub struct ModeArbiter {
    enter_threshold: f64,
    exit_threshold: f64,
    fast_blend: f64,
    mode: Mode,
    transitions: u64,
}

impl ModeArbiter {
    /// `exit_threshold` must be below `enter_threshold`; the config validates this
    pub fn new(enter_threshold: f64, exit_threshold: f64, fast_blend: f64) -> Self {
        Self {
            enter_threshold,
            exit_threshold,
            fast_blend,
            mode: Mode::Normal,
            transitions: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of mode changes since construction
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Evaluate one innovation norm and return the resulting mode
    pub fn observe(&mut self, innovation_norm: f64) -> Mode {
        let next = match self.mode {
            Mode::Normal if innovation_norm > self.enter_threshold => Mode::FastResponse,
            Mode::FastResponse if innovation_norm < self.exit_threshold => Mode::Normal,
            current => current,
        };

        if next != self.mode {
            debug!(
                "Mode {:?} -> {:?} (innovation {:.2})",
                self.mode, next, innovation_norm
            );
            self.mode = next;
            self.transitions += 1;
        }

        self.mode
    }

    /// Point exposed to the renderer for the current mode
    pub fn select(
        &self,
        lookahead: MeasurementVector,
        measurement: MeasurementVector,
    ) -> MeasurementVector {
        match self.mode {
            Mode::Normal => lookahead,
            Mode::FastResponse => lookahead + (measurement - lookahead) * self.fast_blend,
        }
    }

    /// Back to normal mode. The transition counter survives.
    pub fn reset(&mut self) {
        self.mode = Mode::Normal;
    }
}

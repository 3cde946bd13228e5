use nalgebra::{Matrix2, Matrix4, Vector2, Vector4};
use tracing::warn;

use super::matrix::{
    self, MeasurementMatrix, MeasurementVector, ObservationMatrix, StateMatrix, StateVector,
};
use crate::config::StabilizerConfig;

/// Small negative covariance diagonals from round-off are tolerated
const DIAGONAL_TOLERANCE: f64 = -1e-9;

/// Outcome of a predict step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Applied,
    /// `dt` was not a finite positive number; state untouched
    Skipped,
    /// Propagation diverged and the estimator reinitialized itself
    Recovered,
}

/// Outcome of a measurement update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Applied { innovation: MeasurementVector },
    /// Innovation covariance was not invertible; state left at the prediction
    Singular { innovation: MeasurementVector },
    /// Update diverged and the estimator reinitialized itself
    Recovered,
}

impl Correction {
    pub fn innovation(&self) -> Option<MeasurementVector> {
        match self {
            Self::Applied { innovation } | Self::Singular { innovation } => Some(*innovation),
            Self::Recovered => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Read-only copy of the estimator state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    /// `[px, vx, py, vy]`
    pub x: StateVector,
    pub p: StateMatrix,
}

/// Linear Kalman filter under a constant-velocity model
///
/// State vector: [px, vx, py, vy]
/// Measurement: [px, py]
#[derive(Debug, Clone)]
pub struct StateEstimator {
    /// State estimate
    state: StateVector,

    /// Error covariance matrix
    covariance: StateMatrix,

    /// Covariance assigned on initialize/reset
    initial_covariance: StateMatrix,

    /// Measurement noise covariance
    measurement_noise: MeasurementMatrix,

    /// Observation matrix
    observation: ObservationMatrix,

    /// Position after the last step that left the filter healthy
    last_good_position: Option<MeasurementVector>,
}

impl StateEstimator {
    pub fn new(config: &StabilizerConfig) -> Self {
        let initial_covariance = Matrix4::from_diagonal(&Vector4::new(
            config.initial_position_variance,
            config.initial_velocity_variance,
            config.initial_position_variance,
            config.initial_velocity_variance,
        ));

        Self {
            state: Vector4::zeros(),
            covariance: initial_covariance,
            initial_covariance,
            measurement_noise: Matrix2::identity() * config.measurement_noise,
            observation: matrix::observation(),
            last_good_position: None,
        }
    }

    /// Start tracking at `position` with zero velocity
    pub fn initialize(&mut self, position: MeasurementVector) {
        self.state = Vector4::new(position.x, 0.0, position.y, 0.0);
        self.covariance = self.initial_covariance;
        self.last_good_position = Some(position);
    }

    /// Return to the default state, forgetting all history
    pub fn reset(&mut self) {
        self.state = Vector4::zeros();
        self.covariance = self.initial_covariance;
        self.last_good_position = None;
    }

    /// Predict step: `x = F x`, `P = F P Fᵀ + Q`
    pub fn predict(&mut self, dt: f64, process_noise: &StateMatrix) -> Prediction {
        if !dt.is_finite() || dt <= 0.0 {
            return Prediction::Skipped;
        }

        let f = matrix::transition(dt);
        self.state = f * self.state;
        self.covariance = matrix::propagate(&f, &self.covariance) + process_noise;

        if self.check_health() {
            Prediction::Applied
        } else {
            Prediction::Recovered
        }
    }

    /// Correction step against a position measurement
    pub fn update(&mut self, measurement: MeasurementVector) -> Correction {
        let h = self.observation;

        // Innovation (measurement residual)
        let innovation = measurement - h * self.state;

        // Innovation covariance
        let s = matrix::project(&h, &self.covariance) + self.measurement_noise;

        let s_inv = match matrix::invert_2x2(&s) {
            Ok(inv) => inv,
            Err(_) => return Correction::Singular { innovation },
        };

        // Kalman gain
        let k = self.covariance * h.transpose() * s_inv;

        self.state += k * innovation;
        self.covariance = (Matrix4::identity() - k * h) * self.covariance;
        matrix::symmetrize(&mut self.covariance);

        if self.check_health() {
            Correction::Applied { innovation }
        } else {
            Correction::Recovered
        }
    }

    pub fn state(&self) -> StateSnapshot {
        StateSnapshot {
            x: self.state,
            p: self.covariance,
        }
    }

    pub fn position(&self) -> MeasurementVector {
        matrix::position_of(&self.state)
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.state[1], self.state[3])
    }

    fn is_healthy(&self) -> bool {
        matrix::all_finite(self.state.iter())
            && matrix::all_finite(self.covariance.iter())
            && self.covariance.diagonal().iter().all(|&d| d >= DIAGONAL_TOLERANCE)
    }

    /// Record a healthy step, or reinitialize at the last good position
    fn check_health(&mut self) -> bool {
        if self.is_healthy() {
            self.last_good_position = Some(self.position());
            return true;
        }

        let fallback = self.last_good_position.unwrap_or_else(Vector2::zeros);
        warn!(
            "Estimator diverged, reinitializing at ({:.2}, {:.2})",
            fallback.x, fallback.y
        );
        self.initialize(fallback);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> StateEstimator {
        StateEstimator::new(&StabilizerConfig::default())
    }

    #[test]
    fn test_initialize_sets_position_and_zero_velocity() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(12.0, -4.0));

        let snapshot = filter.state();
        assert_eq!(snapshot.x, Vector4::new(12.0, 0.0, -4.0, 0.0));
        assert_eq!(snapshot.p[(0, 0)], 100.0);
        assert_eq!(snapshot.p[(1, 1)], 1000.0);
        assert_eq!(snapshot.p[(0, 1)], 0.0);
    }

    #[test]
    fn test_predict_skips_invalid_dt() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(1.0, 1.0));
        let before = filter.state();
        let q = Matrix4::identity();

        assert_eq!(filter.predict(0.0, &q), Prediction::Skipped);
        assert_eq!(filter.predict(-0.016, &q), Prediction::Skipped);
        assert_eq!(filter.predict(f64::NAN, &q), Prediction::Skipped);
        assert_eq!(filter.predict(f64::INFINITY, &q), Prediction::Skipped);
        assert_eq!(filter.state(), before);
    }

    #[test]
    fn test_predict_grows_uncertainty() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(0.0, 0.0));

        let q = Matrix4::identity() * 0.5;
        assert_eq!(filter.predict(0.016, &q), Prediction::Applied);

        let p = filter.state().p;
        assert!(p[(0, 0)] > 100.0);
        assert!((p[(0, 1)] - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_moves_toward_measurement() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(0.0, 0.0));
        filter.predict(0.016, &Matrix4::identity());

        let correction = filter.update(Vector2::new(10.0, 0.0));
        let innovation = correction.innovation().unwrap();

        assert!(correction.is_applied());
        assert!((innovation.x - 10.0).abs() < 1e-12);
        let position = filter.position();
        assert!(position.x > 0.0 && position.x < 10.0);
        assert!(filter.velocity().x > 0.0);
        assert!(filter.state().p[(0, 0)] < 100.0);
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(0.0, 0.0));

        for step in 1..50 {
            filter.predict(0.016, &(Matrix4::identity() * 0.01));
            filter.update(Vector2::new(step as f64 * 3.0, (step % 3) as f64));
        }

        let p = filter.state().p;
        assert_eq!(p, p.transpose());
        assert!(p.diagonal().iter().all(|&d| d >= 0.0));
    }

    #[test]
    fn test_singular_update_keeps_prediction() {
        let config = StabilizerConfig {
            measurement_noise: 0.0,
            initial_position_variance: 0.0,
            initial_velocity_variance: 0.0,
            ..Default::default()
        };
        let mut filter = StateEstimator::new(&config);
        filter.initialize(Vector2::new(5.0, 5.0));
        filter.predict(0.016, &Matrix4::zeros());
        let predicted = filter.state();

        let correction = filter.update(Vector2::new(6.0, 5.0));
        assert!(matches!(correction, Correction::Singular { .. }));
        assert_eq!(filter.state(), predicted);
    }

    #[test]
    fn test_nan_measurement_recovers_at_last_good_position() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(5.0, 7.0));
        filter.predict(0.016, &Matrix4::identity());

        let correction = filter.update(Vector2::new(f64::NAN, 7.0));
        assert_eq!(correction, Correction::Recovered);
        assert_eq!(filter.position(), Vector2::new(5.0, 7.0));
        assert_eq!(filter.velocity(), Vector2::zeros());
    }

    #[test]
    fn test_overflowing_predict_recovers() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(1.0, 2.0));

        assert_eq!(filter.predict(1e300, &Matrix4::identity()), Prediction::Recovered);
        let snapshot = filter.state();
        assert_eq!(snapshot.x, Vector4::new(1.0, 0.0, 2.0, 0.0));
        assert!(snapshot.p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_reset_restores_default() {
        let mut filter = estimator();
        filter.initialize(Vector2::new(40.0, 40.0));
        filter.predict(0.016, &Matrix4::identity());
        filter.update(Vector2::new(45.0, 41.0));

        filter.reset();
        assert_eq!(filter.state(), estimator().state());
    }
}

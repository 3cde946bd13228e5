//! Fixed-size matrix helpers for the 4-state constant-velocity model.
//!
//! Multiplication and transposition come from `nalgebra`; this module adds
//! the model matrices and an inverse that reports degeneracy instead of
//! returning garbage.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

use crate::error::SingularMatrix;

/// State `[px, vx, py, vy]`
pub type StateVector = Vector4<f64>;
/// 4x4 state covariance / transition / process noise
pub type StateMatrix = Matrix4<f64>;
/// Position measurement `[mx, my]`
pub type MeasurementVector = Vector2<f64>;
/// 2x2 measurement-space covariance
pub type MeasurementMatrix = Matrix2<f64>;
/// Observation matrix H
pub type ObservationMatrix = Matrix2x4<f64>;

/// Determinants with a smaller magnitude are treated as singular
pub const SINGULARITY_EPSILON: f64 = 1e-12;

/// Constant-velocity transition for elapsed time `dt`
///
/// ```text
/// | 1 dt 0  0 |
/// | 0 1  0  0 |
/// | 0 0  1 dt |
/// | 0 0  0  1 |
/// ```
#[rustfmt::skip]
pub fn transition(dt: f64) -> StateMatrix {
    Matrix4::new(
        1.0, dt,  0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, dt,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// H selects the two position components; velocity is never observed
#[rustfmt::skip]
pub fn observation() -> ObservationMatrix {
    Matrix2x4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    )
}

/// `a * p * aᵀ`
pub fn propagate(a: &StateMatrix, p: &StateMatrix) -> StateMatrix {
    a * p * a.transpose()
}

/// `h * p * hᵀ`
pub fn project(h: &ObservationMatrix, p: &StateMatrix) -> MeasurementMatrix {
    h * p * h.transpose()
}

/// Closed-form 2x2 inverse with degeneracy detection
pub fn invert_2x2(m: &MeasurementMatrix) -> Result<MeasurementMatrix, SingularMatrix> {
    let (a, b, c, d) = (m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]);
    let determinant = a * d - b * c;

    if !determinant.is_finite() || determinant.abs() < SINGULARITY_EPSILON {
        return Err(SingularMatrix { determinant });
    }

    let inverse = Matrix2::new(d, -b, -c, a) / determinant;
    if !all_finite(inverse.iter()) {
        return Err(SingularMatrix { determinant });
    }

    Ok(inverse)
}

/// Replace `p` with `(p + pᵀ) / 2` to stop round-off asymmetry accumulating
pub fn symmetrize(p: &mut StateMatrix) {
    *p = (*p + p.transpose()) * 0.5;
}

pub fn all_finite<'a>(values: impl IntoIterator<Item = &'a f64>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

/// Position part of a state vector
pub fn position_of(state: &StateVector) -> MeasurementVector {
    Vector2::new(state[0], state[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_moves_position_by_velocity() {
        let state = Vector4::new(10.0, 100.0, -5.0, -50.0);
        let next = transition(0.1) * state;

        assert!((next[0] - 20.0).abs() < 1e-12);
        assert!((next[1] - 100.0).abs() < 1e-12);
        assert!((next[2] + 10.0).abs() < 1e-12);
        assert!((next[3] + 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_observation_selects_positions() {
        let state = Vector4::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(observation() * state, Vector2::new(1.0, 3.0));
    }

    #[test]
    fn test_invert_2x2() {
        let m = Matrix2::new(4.0, 7.0, 2.0, 6.0);
        let inv = invert_2x2(&m).unwrap();
        let product = m * inv;

        assert!((product - Matrix2::identity()).norm() < 1e-12);
    }

    #[test]
    fn test_invert_2x2_detects_singular() {
        let m = Matrix2::new(1.0, 2.0, 2.0, 4.0);
        assert!(invert_2x2(&m).is_err());

        let tiny = Matrix2::identity() * 1e-8;
        assert!(invert_2x2(&tiny).is_err());
    }

    #[test]
    fn test_invert_2x2_rejects_non_finite() {
        let m = Matrix2::new(f64::NAN, 0.0, 0.0, 1.0);
        assert!(invert_2x2(&m).is_err());

        let huge = Matrix2::new(f64::INFINITY, 0.0, 0.0, 1.0);
        assert!(invert_2x2(&huge).is_err());
    }

    #[test]
    fn test_propagate_keeps_symmetry() {
        let p = Matrix4::from_diagonal(&Vector4::new(100.0, 1000.0, 100.0, 1000.0));
        let propagated = propagate(&transition(0.016), &p);

        assert!((propagated - propagated.transpose()).norm() < 1e-9);
        assert!((propagated[(0, 0)] - (100.0 + 0.016 * 0.016 * 1000.0)).abs() < 1e-9);
        assert!((propagated[(0, 1)] - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_symmetrize() {
        let mut p = Matrix4::identity();
        p[(0, 1)] = 2.0;
        symmetrize(&mut p);

        assert_eq!(p[(0, 1)], 1.0);
        assert_eq!(p[(1, 0)], 1.0);
    }
}

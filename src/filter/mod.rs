pub mod estimator;
pub mod lookahead;
pub mod matrix;
pub mod noise;

pub use estimator::{Correction, Prediction, StateEstimator, StateSnapshot};
pub use lookahead::Lookahead;
pub use noise::AdaptiveNoise;

//! Per-stroke orchestration of the stabilizer pipeline.
//!
//! A [`SessionController`] owns one estimator, one noise controller and one
//! mode arbiter. Each input event is processed to completion before the next
//! one is accepted, and every sample produces exactly one [`OutputPoint`]
//! within the same call.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod mode;

pub use mode::{Mode, ModeArbiter};

use crate::{
    config::StabilizerConfig,
    error::ConfigError,
    filter::{
        matrix::MeasurementVector, AdaptiveNoise, Correction, Lookahead, Prediction,
        StateEstimator, StateSnapshot,
    },
};

/// Raw pointer sample; `t` in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: f64,
    pub x: f64,
    pub y: f64,
}

impl Sample {
    pub fn new(t: f64, x: f64, y: f64) -> Self {
        Self { t, x, y }
    }
}

/// Events accepted from the input collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Sample(Sample),
    BeginStroke,
    EndStroke,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl From<MeasurementVector> for Position {
    fn from(v: MeasurementVector) -> Self {
        Self { x: v.x, y: v.y }
    }
}

/// Which path produced an output point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// First sample of a session, passed through
    Initialized,
    Filtered,
    /// Update skipped; point is the unblended lookahead of the prediction.
    /// `mode` still reports the arbiter state, which this step did not change.
    SingularFallback,
    /// Estimator state was corrupt and has been reinitialized
    Recovered,
}

/// Record handed to the rendering collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputPoint {
    pub position: Position,
    pub mode: Mode,
    pub status: StepStatus,
}

/// Source of input events
pub trait SampleSource {
    fn next_event(&mut self) -> Option<InputEvent>;
}

impl<I> SampleSource for I
where
    I: Iterator<Item = InputEvent>,
{
    fn next_event(&mut self) -> Option<InputEvent> {
        self.next()
    }
}

/// Receiver of output points
pub trait PointSink {
    fn emit(&mut self, point: OutputPoint);

    /// Discard any buffered path. Signaled on reset.
    fn clear_path(&mut self) {}
}

impl PointSink for Vec<OutputPoint> {
    fn emit(&mut self, point: OutputPoint) {
        self.push(point);
    }

    fn clear_path(&mut self) {
        self.clear();
    }
}

/// Cumulative counters; not affected by reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub samples: u64,
    pub strokes: u64,
    pub resets: u64,
    pub skipped_predictions: u64,
    pub singular_fallbacks: u64,
    pub recoveries: u64,
    pub mode_transitions: u64,
}

/// Resettable part of the session, for equality checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub estimator: StateSnapshot,
    pub noise_level: f64,
    pub mode: Mode,
    pub last_timestamp: Option<f64>,
    pub active: bool,
}

pub struct SessionController {
    config: StabilizerConfig,
    estimator: StateEstimator,
    noise: AdaptiveNoise,
    lookahead: Lookahead,
    arbiter: ModeArbiter,

    /// Timestamp of the last sample that advanced the model
    last_timestamp: Option<f64>,

    /// Set once the first sample of a stroke has initialized the estimator
    active: bool,

    stats: SessionStats,
}

impl SessionController {
    pub fn new(config: StabilizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            estimator: StateEstimator::new(&config),
            noise: AdaptiveNoise::new(&config),
            lookahead: Lookahead::new(config.lookahead_secs),
            arbiter: ModeArbiter::new(
                config.enter_threshold,
                config.exit_threshold,
                config.fast_blend,
            ),
            config,
            last_timestamp: None,
            active: false,
            stats: SessionStats::default(),
        })
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn mode(&self) -> Mode {
        self.arbiter.mode()
    }

    pub fn noise_level(&self) -> f64 {
        self.noise.level()
    }

    pub fn estimator(&self) -> &StateEstimator {
        &self.estimator
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            estimator: self.estimator.state(),
            noise_level: self.noise.level(),
            mode: self.arbiter.mode(),
            last_timestamp: self.last_timestamp,
            active: self.active,
        }
    }

    /// Dispatch one event; samples are emitted to `sink` before returning
    pub fn handle<S: PointSink + ?Sized>(&mut self, event: InputEvent, sink: &mut S) {
        match event {
            InputEvent::Sample(sample) => {
                let point = self.process_sample(sample);
                sink.emit(point);
            }
            InputEvent::BeginStroke => self.begin_stroke(),
            InputEvent::EndStroke => self.end_stroke(),
            InputEvent::Reset => {
                self.reset();
                sink.clear_path();
            }
        }
    }

    /// Drain `source` into `sink`, returning the number of events handled
    pub fn run<Src, S>(&mut self, source: &mut Src, sink: &mut S) -> usize
    where
        Src: SampleSource + ?Sized,
        S: PointSink + ?Sized,
    {
        let mut handled = 0;
        while let Some(event) = source.next_event() {
            self.handle(event, sink);
            handled += 1;
        }
        handled
    }

    /// Pointer down: start a fresh stroke at the next sample
    pub fn begin_stroke(&mut self) {
        self.reinitialize();
        debug!("Stroke begin");
    }

    /// Pointer up: the next sample starts a new session
    pub fn end_stroke(&mut self) {
        self.reinitialize();
        debug!("Stroke end after {} samples", self.stats.samples);
    }

    /// Discard all accumulated filter state
    pub fn reset(&mut self) {
        self.reinitialize();
        self.stats.resets += 1;
        info!("Session reset");
    }

    fn reinitialize(&mut self) {
        self.estimator.reset();
        self.noise.reset();
        self.arbiter.reset();
        self.last_timestamp = None;
        self.active = false;
    }

    /// Run one sample through predict, update, adapt, lookahead and arbitration
    pub fn process_sample(&mut self, sample: Sample) -> OutputPoint {
        self.stats.samples += 1;
        let measurement = Vector2::new(sample.x, sample.y);

        if !self.active {
            return self.start_session(sample, measurement);
        }

        match self.last_timestamp {
            Some(last) => {
                let dt = sample.t - last;
                match self.estimator.predict(dt, &self.noise.process_noise(dt)) {
                    Prediction::Applied => self.last_timestamp = Some(sample.t),
                    Prediction::Skipped => {
                        self.stats.skipped_predictions += 1;
                        debug!("Skipping predict for dt={}", dt);
                    }
                    Prediction::Recovered => return self.recover_from_predict(dt),
                }
            }
            None if sample.t.is_finite() => self.last_timestamp = Some(sample.t),
            None => self.stats.skipped_predictions += 1,
        }

        let correction = self.estimator.update(measurement);
        let projected = self.lookahead.project(&self.estimator.state().x);

        let (position, status) = match correction {
            Correction::Applied { innovation } => {
                let norm = innovation.norm();
                self.noise.observe(&innovation);

                let before = self.arbiter.transitions();
                self.arbiter.observe(norm);
                self.stats.mode_transitions += self.arbiter.transitions() - before;

                (self.arbiter.select(projected, measurement), StepStatus::Filtered)
            }
            Correction::Singular { innovation } => {
                self.stats.singular_fallbacks += 1;
                debug!(
                    "Singular innovation covariance, passing prediction through (innovation {:.3})",
                    innovation.norm()
                );
                (projected, StepStatus::SingularFallback)
            }
            Correction::Recovered => {
                self.stats.recoveries += 1;
                (projected, StepStatus::Recovered)
            }
        };

        OutputPoint {
            position: position.into(),
            mode: self.arbiter.mode(),
            status,
        }
    }

    /// The estimator has already reinitialized at the last good position.
    /// The sample is not applied and its timestamp is not adopted; the next
    /// sample re-anchors time.
    fn recover_from_predict(&mut self, dt: f64) -> OutputPoint {
        warn!("Predict diverged for dt={}, re-anchoring time on next sample", dt);
        self.stats.recoveries += 1;
        self.last_timestamp = None;

        OutputPoint {
            position: self.lookahead.project(&self.estimator.state().x).into(),
            mode: self.arbiter.mode(),
            status: StepStatus::Recovered,
        }
    }

    fn start_session(&mut self, sample: Sample, measurement: MeasurementVector) -> OutputPoint {
        if !(sample.x.is_finite() && sample.y.is_finite()) {
            warn!("Ignoring non-finite sample before session start");
            self.stats.recoveries += 1;
            return OutputPoint {
                position: self.estimator.position().into(),
                mode: self.arbiter.mode(),
                status: StepStatus::Recovered,
            };
        }

        self.estimator.initialize(measurement);
        self.last_timestamp = sample.t.is_finite().then_some(sample.t);
        self.active = true;
        self.stats.strokes += 1;
        debug!("Session started at ({:.1}, {:.1})", sample.x, sample.y);

        OutputPoint {
            position: measurement.into(),
            mode: self.arbiter.mode(),
            status: StepStatus::Initialized,
        }
    }
}

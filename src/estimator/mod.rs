//! Behavioral estimators fed from the tracking log.
//!
//! Every estimator implements `MotionEstimator`: `reset()` at trial start
//! and `get_estimate()` once per display tick. Estimators only mutate their
//! own state; the log is passed in by reference.
//!
//! - `VigorEstimator`: tail-sum variability over a trailing time window.
//! - `SequenceEstimator`: recurrent velocity model integrated into a pose.
//! - `SimulatedEstimator`: scripted bouts, for running without a subject.

mod bout;
mod model;
mod sequence;
mod simulated;
mod vigor;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::accumulator::DataAccumulator;

pub use bout::{BoutDetector, BoutEvent};
pub use model::{ConstantVelocityModel, RecurrentVelocityModel, RecurrentWeights, VelocityModel};
pub use sequence::{SequenceConfig, SequenceEstimator, VelocityThresholds};
pub use simulated::{Bout, SimulatedEstimator};
pub use vigor::{VigorConfig, VigorEstimator};

/// Body-frame velocity: axial is forward, lateral is sideways, angular is
/// heading rate. Units are per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyVelocity {
    pub axial: f64,
    pub lateral: f64,
    pub angular: f64,
}

impl BodyVelocity {
    pub fn new(axial: f64, lateral: f64, angular: f64) -> Self {
        Self {
            axial,
            lateral,
            angular,
        }
    }
}

/// Cumulative world-frame position and heading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    /// Unicycle step: integrate heading first, then move along the rotated
    /// axial/lateral axes.
    pub fn integrate(&mut self, velocity: BodyVelocity, dt: f64) {
        self.theta += velocity.angular * dt;
        let (sin, cos) = self.theta.sin_cos();
        self.x += (velocity.axial * cos - velocity.lateral * sin) * dt;
        self.y += (velocity.axial * sin + velocity.lateral * cos) * dt;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum Estimate {
    Vigor(f64),
    Pose(Pose),
}

impl Estimate {
    pub fn vigor(&self) -> Option<f64> {
        match self {
            Estimate::Vigor(v) => Some(*v),
            Estimate::Pose(_) => None,
        }
    }

    pub fn pose(&self) -> Option<Pose> {
        match self {
            Estimate::Pose(p) => Some(*p),
            Estimate::Vigor(_) => None,
        }
    }
}

/// Capability shared by all estimators.
///
/// `time` is seconds since the start of the current trial, on the same clock
/// as the log timestamps. Callers must not run `reset` and `get_estimate`
/// concurrently.
pub trait MotionEstimator: Send {
    fn name(&self) -> &'static str;

    fn reset(&mut self);

    fn get_estimate(&mut self, log: &DataAccumulator, time: f64) -> Result<Estimate>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn integrate_rotates_heading_before_translating() {
        let mut pose = Pose::default();
        pose.integrate(BodyVelocity::new(1.0, 0.0, FRAC_PI_2), 1.0);
        assert!((pose.theta - FRAC_PI_2).abs() < 1e-12);
        assert!(pose.x.abs() < 1e-12);
        assert!((pose.y - 1.0).abs() < 1e-12);

        let mut pose = Pose::default();
        pose.integrate(BodyVelocity::new(0.0, 2.0, 0.0), 0.5);
        assert_eq!(pose, Pose { x: 0.0, y: 1.0, theta: 0.0 });
    }
}

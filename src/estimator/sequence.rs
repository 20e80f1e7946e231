use anyhow::{anyhow, Result};
use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::accumulator::{DataAccumulator, Watermark, FIRST_ANGLE_COLUMN, TIMESTAMP_COLUMN};

use super::model::VelocityModel;
use super::{BodyVelocity, Estimate, MotionEstimator, Pose};

/// Per-component magnitudes below which a velocity is treated as noise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityThresholds {
    pub axial: f64,
    pub lateral: f64,
    pub angular: f64,
}

impl VelocityThresholds {
    fn apply(&self, v: BodyVelocity) -> BodyVelocity {
        let gate = |value: f64, threshold: f64| if value.abs() < threshold { 0.0 } else { value };
        BodyVelocity {
            axial: gate(v.axial, self.axial),
            lateral: gate(v.lateral, self.lateral),
            angular: gate(v.angular, self.angular),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub thresholds: VelocityThresholds,
}

/// Integrates a velocity model's output into a world-frame pose.
///
/// Each call feeds the model only the log rows appended since the previous
/// call, one step per row, and integrates over the timestamp difference to
/// the row before. The first row after a reset only primes the clock.
pub struct SequenceEstimator<M: VelocityModel> {
    model: M,
    config: SequenceConfig,
    watermark: Watermark,
    pose: Pose,
    last_timestamp: Option<f64>,
    steps: u64,
}

impl<M: VelocityModel> SequenceEstimator<M> {
    pub fn new(model: M, config: SequenceConfig) -> Self {
        Self {
            model,
            config,
            watermark: Watermark::new(),
            pose: Pose::default(),
            last_timestamp: None,
            steps: 0,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Model steps taken since the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: VelocityModel> MotionEstimator for SequenceEstimator<M> {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn reset(&mut self) {
        self.model.reset_state();
        self.pose = Pose::default();
        self.last_timestamp = None;
        self.steps = 0;
    }

    /// Rows are only consumed once integrated. A failed step leaves the
    /// failing row and everything after it pending for the next call.
    fn get_estimate(&mut self, log: &DataAccumulator, _time: f64) -> Result<Estimate> {
        if let (Some(expected), Some(width)) = (self.model.input_width(), log.width()) {
            let angles = width.saturating_sub(FIRST_ANGLE_COLUMN);
            if angles != expected {
                return Err(anyhow!(
                    "log rows carry {} angles but the model expects {}",
                    angles,
                    expected
                ));
            }
        }
        let rows = log.peek_since(&self.watermark);

        for (done, row) in rows.rows().into_iter().enumerate() {
            let timestamp = row[TIMESTAMP_COLUMN];
            let velocity = match self.model.step(row.slice(s![FIRST_ANGLE_COLUMN..])) {
                Ok(velocity) => velocity,
                Err(err) => {
                    log.advance(&mut self.watermark, done);
                    return Err(err);
                }
            };
            self.steps += 1;
            let dt = match self.last_timestamp {
                Some(previous) if timestamp > previous => timestamp - previous,
                Some(previous) => {
                    if timestamp < previous {
                        log::debug!(
                            "out-of-order tracking row ({} after {}), not integrated",
                            timestamp,
                            previous
                        );
                    }
                    0.0
                }
                None => 0.0,
            };
            self.pose.integrate(self.config.thresholds.apply(velocity), dt);
            if dt > 0.0 || self.last_timestamp.is_none() {
                self.last_timestamp = Some(timestamp);
            }
        }
        log.advance(&mut self.watermark, rows.nrows());
        Ok(Estimate::Pose(self.pose))
    }
}

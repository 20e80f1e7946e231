use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::accumulator::DataAccumulator;

use super::{BodyVelocity, Estimate, MotionEstimator, Pose};

/// One scripted movement episode, in trial time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bout {
    pub start: f64,
    pub duration: f64,
    pub velocity: BodyVelocity,
}

impl Bout {
    fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Replays a fixed bout schedule as if it came from a live subject.
///
/// Between calls the pose advances by every bout's overlap with the elapsed
/// interval, so the result does not depend on the call rate as long as
/// calls are frequent compared to bout durations.
pub struct SimulatedEstimator {
    bouts: Vec<Bout>,
    pose: Pose,
    last_time: f64,
}

impl SimulatedEstimator {
    pub fn new(mut bouts: Vec<Bout>) -> Result<Self> {
        if let Some(bad) = bouts
            .iter()
            .find(|b| !b.start.is_finite() || !b.duration.is_finite() || b.duration < 0.0)
        {
            return Err(anyhow!("invalid bout {:?}", bad));
        }
        bouts.sort_by(|a, b| a.start.total_cmp(&b.start));
        Ok(Self {
            bouts,
            pose: Pose::default(),
            last_time: 0.0,
        })
    }

    /// Load a JSON array of bouts.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bout schedule {}", path.display()))?;
        let bouts: Vec<Bout> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid bout schedule {}", path.display()))?;
        Self::new(bouts)
    }

    pub fn bouts(&self) -> &[Bout] {
        &self.bouts
    }

    /// True while `time` falls inside a scheduled bout.
    pub fn in_bout(&self, time: f64) -> bool {
        self.bouts.iter().any(|b| time >= b.start && time < b.end())
    }

    fn advance_to(&mut self, time: f64) {
        if time <= self.last_time {
            return;
        }
        let (from, to) = (self.last_time, time);
        for bout in &self.bouts {
            if bout.start >= to {
                break;
            }
            let overlap = bout.end().min(to) - bout.start.max(from);
            if overlap > 0.0 {
                self.pose.integrate(bout.velocity, overlap);
            }
        }
        self.last_time = time;
    }
}

impl MotionEstimator for SimulatedEstimator {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn reset(&mut self) {
        self.pose = Pose::default();
        self.last_time = 0.0;
    }

    fn get_estimate(&mut self, _log: &DataAccumulator, time: f64) -> Result<Estimate> {
        self.advance_to(time);
        Ok(Estimate::Pose(self.pose))
    }
}

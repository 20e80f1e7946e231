use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::accumulator::{DataAccumulator, TAIL_SUM_COLUMN, TIMESTAMP_COLUMN};

use super::{Estimate, MotionEstimator};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VigorConfig {
    /// Trailing window length in wall-clock time.
    #[serde(with = "duration_ms")]
    pub window: Duration,
    /// Scale applied to the raw standard deviation.
    pub gain: f64,
    /// Rows used to measure the current frame period.
    pub period_rows: usize,
}

impl Default for VigorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(50),
            gain: 1.0,
            period_rows: 10,
        }
    }
}

/// Standard deviation of `tail_sum` over the last `window` of samples.
///
/// The window's row count is recomputed on every call from the observed frame
/// period, so it tracks camera rate changes.
pub struct VigorEstimator {
    config: VigorConfig,
    last_rows: usize,
}

impl VigorEstimator {
    pub fn new(config: VigorConfig) -> Self {
        Self {
            config,
            last_rows: 0,
        }
    }

    /// Rows in the most recent window.
    pub fn window_rows(&self) -> usize {
        self.last_rows
    }

    fn frame_period(&self, log: &DataAccumulator) -> Option<f64> {
        let probe = log.get_last_n(self.config.period_rows.max(2));
        let rows = probe.nrows();
        if rows < 2 {
            return None;
        }
        let span = probe[[rows - 1, TIMESTAMP_COLUMN]] - probe[[0, TIMESTAMP_COLUMN]];
        let period = span / (rows - 1) as f64;
        (period.is_finite() && period > 0.0).then_some(period)
    }
}

impl MotionEstimator for VigorEstimator {
    fn name(&self) -> &'static str {
        "vigor"
    }

    fn reset(&mut self) {
        self.last_rows = 0;
    }

    fn get_estimate(&mut self, log: &DataAccumulator, _time: f64) -> Result<Estimate> {
        let Some(period) = self.frame_period(log) else {
            self.last_rows = 0;
            return Ok(Estimate::Vigor(0.0));
        };
        let rows = ((self.config.window.as_secs_f64() / period).round() as usize).max(2);
        let window = log.get_last_n(rows);
        self.last_rows = window.nrows();
        if window.nrows() < 2 {
            return Ok(Estimate::Vigor(0.0));
        }
        let std = window.column(TAIL_SUM_COLUMN).std(0.0);
        Ok(Estimate::Vigor(std * self.config.gain))
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of ms"));
        }
        Ok(Duration::from_nanos((ms * 1e6).round() as u64))
    }
}

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::dispatcher::DispatcherConfig;
use crate::estimator::{SequenceConfig, VelocityThresholds, VigorConfig};
use crate::tracer::{Point, SelectionMode, TracerParams};

const DEFAULT_POOL_SLOTS: usize = 8;
const DEFAULT_RING_LENGTH: usize = 100;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 15;
const DEFAULT_TICK_HZ: f64 = 60.0;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 10;
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 5;
const DEFAULT_VIGOR_WINDOW_MS: f64 = 50.0;
const DEFAULT_BOUT_THRESHOLD: f64 = 0.1;

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    pool_slots: Option<usize>,
    ring: Option<RingConfigFile>,
    tracer: Option<TracerConfigFile>,
    dispatcher: Option<DispatcherConfigFile>,
    accumulator: Option<AccumulatorConfigFile>,
    vigor: Option<VigorConfigFile>,
    sequence: Option<SequenceConfigFile>,
    tick_hz: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RingConfigFile {
    length: Option<usize>,
    replay_window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TracerConfigFile {
    anchor: Option<[f64; 2]>,
    n_segments: Option<usize>,
    tail_length: Option<f64>,
    n_candidates: Option<usize>,
    baseline_heading: Option<f64>,
    mode: Option<SelectionMode>,
    filter_size: Option<usize>,
    min_contrast: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatcherConfigFile {
    poll_timeout_ms: Option<u64>,
    unwrap_angles: Option<bool>,
    report_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AccumulatorConfigFile {
    drain_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VigorConfigFile {
    window_ms: Option<f64>,
    gain: Option<f64>,
    bout_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SequenceConfigFile {
    thresholds: Option<VelocityThresholds>,
}

/// Session configuration, built once and passed to each stage at construction.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub pool_slots: usize,
    pub ring_length: usize,
    pub replay_window: usize,
    pub tracer: TracerParams,
    pub dispatcher: DispatcherConfig,
    pub drain_interval: Duration,
    pub vigor: VigorConfig,
    pub bout_threshold: f64,
    pub sequence: SequenceConfig,
    pub tick_hz: f64,
}

impl TrackingConfig {
    /// Defaults, overlaid with the JSON file named by `TAILTRACK_CONFIG` and
    /// then with environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TAILTRACK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackingConfigFile) -> Self {
        let defaults = TracerParams::default();
        let tracer_file = file.tracer.unwrap_or_default();
        let tracer = TracerParams {
            anchor: tracer_file
                .anchor
                .map(|[x, y]| Point::new(x, y))
                .unwrap_or(defaults.anchor),
            n_segments: tracer_file.n_segments.unwrap_or(defaults.n_segments),
            tail_length: tracer_file.tail_length.unwrap_or(defaults.tail_length),
            n_candidates: tracer_file.n_candidates.unwrap_or(defaults.n_candidates),
            baseline_heading: tracer_file
                .baseline_heading
                .unwrap_or(defaults.baseline_heading),
            mode: tracer_file.mode.unwrap_or(defaults.mode),
            filter_size: tracer_file.filter_size.unwrap_or(defaults.filter_size),
            min_contrast: tracer_file.min_contrast.unwrap_or(defaults.min_contrast),
        };

        let dispatcher_file = file.dispatcher.unwrap_or_default();
        let dispatcher = DispatcherConfig {
            poll_timeout: Duration::from_millis(
                dispatcher_file
                    .poll_timeout_ms
                    .unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
            ),
            unwrap_angles: dispatcher_file.unwrap_angles.unwrap_or(true),
            report_interval: Duration::from_secs(
                dispatcher_file
                    .report_interval_secs
                    .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS),
            ),
        };

        let ring_length = file
            .ring
            .as_ref()
            .and_then(|ring| ring.length)
            .unwrap_or(DEFAULT_RING_LENGTH);
        let replay_window = file
            .ring
            .and_then(|ring| ring.replay_window)
            .unwrap_or(ring_length);

        let vigor_file = file.vigor.unwrap_or_default();
        let vigor = VigorConfig {
            window: duration_from_ms(vigor_file.window_ms.unwrap_or(DEFAULT_VIGOR_WINDOW_MS)),
            gain: vigor_file.gain.unwrap_or(1.0),
            ..VigorConfig::default()
        };

        Self {
            pool_slots: file.pool_slots.unwrap_or(DEFAULT_POOL_SLOTS),
            ring_length,
            replay_window,
            tracer,
            dispatcher,
            drain_interval: Duration::from_millis(
                file.accumulator
                    .and_then(|acc| acc.drain_interval_ms)
                    .unwrap_or(DEFAULT_DRAIN_INTERVAL_MS),
            ),
            vigor,
            bout_threshold: vigor_file.bout_threshold.unwrap_or(DEFAULT_BOUT_THRESHOLD),
            sequence: SequenceConfig {
                thresholds: file
                    .sequence
                    .and_then(|seq| seq.thresholds)
                    .unwrap_or_default(),
            },
            tick_hz: file.tick_hz.unwrap_or(DEFAULT_TICK_HZ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(slots) = std::env::var("TAILTRACK_POOL_SLOTS") {
            self.pool_slots = slots
                .trim()
                .parse()
                .map_err(|_| anyhow!("TAILTRACK_POOL_SLOTS must be a positive integer"))?;
        }
        if let Ok(length) = std::env::var("TAILTRACK_RING_LENGTH") {
            let length: usize = length
                .trim()
                .parse()
                .map_err(|_| anyhow!("TAILTRACK_RING_LENGTH must be a positive integer"))?;
            if self.replay_window == self.ring_length || self.replay_window > length {
                self.replay_window = length;
            }
            self.ring_length = length;
        }
        if let Ok(segments) = std::env::var("TAILTRACK_SEGMENTS") {
            self.tracer.n_segments = segments
                .trim()
                .parse()
                .map_err(|_| anyhow!("TAILTRACK_SEGMENTS must be a positive integer"))?;
        }
        if let Ok(window) = std::env::var("TAILTRACK_VIGOR_WINDOW_MS") {
            let ms: f64 = window
                .trim()
                .parse()
                .map_err(|_| anyhow!("TAILTRACK_VIGOR_WINDOW_MS must be a number of ms"))?;
            if !ms.is_finite() || ms <= 0.0 {
                return Err(anyhow!("TAILTRACK_VIGOR_WINDOW_MS must be positive"));
            }
            self.vigor.window = duration_from_ms(ms);
        }
        if let Ok(anchor) = std::env::var("TAILTRACK_ANCHOR") {
            self.tracer.anchor = parse_point(&anchor)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pool_slots == 0 {
            return Err(anyhow!("pool_slots must be greater than zero"));
        }
        if self.ring_length == 0 {
            return Err(anyhow!("ring length must be greater than zero"));
        }
        if self.replay_window == 0 || self.replay_window > self.ring_length {
            return Err(anyhow!(
                "replay window must be between 1 and the ring length ({})",
                self.ring_length
            ));
        }
        self.tracer.validate()?;
        if self.dispatcher.poll_timeout.is_zero() {
            return Err(anyhow!("dispatcher poll timeout must be greater than zero"));
        }
        if self.vigor.window.is_zero() {
            return Err(anyhow!("vigor window must be greater than zero"));
        }
        if !self.tick_hz.is_finite() || self.tick_hz <= 0.0 {
            return Err(anyhow!("tick_hz must be positive"));
        }
        Ok(())
    }

    /// Display tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::from_file(TrackingConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<TrackingConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn duration_from_ms(ms: f64) -> Duration {
    Duration::from_nanos((ms.max(0.0) * 1e6).round() as u64)
}

fn parse_point(value: &str) -> Result<Point> {
    let parts: Vec<&str> = value.split(',').map(|part| part.trim()).collect();
    match parts.as_slice() {
        [x, y] => {
            let x: f64 = x
                .parse()
                .map_err(|_| anyhow!("TAILTRACK_ANCHOR x must be a number"))?;
            let y: f64 = y
                .parse()
                .map_err(|_| anyhow!("TAILTRACK_ANCHOR y must be a number"))?;
            Ok(Point::new(x, y))
        }
        _ => Err(anyhow!("TAILTRACK_ANCHOR must look like 'x,y'")),
    }
}

//! Synthetic tail camera.
//!
//! Renders a dark straight tail on a bright background: each pixel's
//! brightness grows with its distance from the tail segment, so the darkest
//! ridge runs exactly along the configured heading. Optional seeded noise
//! roughens the image.

use std::f64::consts::TAU;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::FrameSource;
use crate::frame::Frame;
use crate::tracer::Point;

/// Brightness gained per pixel of distance from the tail.
const EDGE_GRADIENT: f64 = 30.0;

/// Tail heading over time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BendProfile {
    Fixed(f64),
    Oscillating {
        baseline: f64,
        amplitude: f64,
        frequency_hz: f64,
    },
}

impl BendProfile {
    pub fn heading_at(&self, t: f64) -> f64 {
        match *self {
            BendProfile::Fixed(angle) => angle,
            BendProfile::Oscillating {
                baseline,
                amplitude,
                frequency_hz,
            } => baseline + amplitude * (TAU * frequency_hz * t).sin(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub anchor: Point,
    pub tail_length: f64,
    pub fps: f64,
    pub bend: BendProfile,
    /// Uniform noise amplitude in grey levels; 0 disables noise.
    pub noise: u8,
    pub seed: u64,
    /// Stop after this many frames; `None` runs forever.
    pub frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            anchor: Point::new(50.0, 100.0),
            tail_length: 130.0,
            fps: 200.0,
            bend: BendProfile::Fixed(0.0),
            noise: 0,
            seed: 0,
            frames: None,
        }
    }
}

pub struct SyntheticTailSource {
    config: SyntheticConfig,
    rng: StdRng,
    frame_count: u64,
}

impl SyntheticTailSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frames need non-zero dimensions"));
        }
        if !config.fps.is_finite() || config.fps <= 0.0 {
            return Err(anyhow!("synthetic fps must be positive"));
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            frame_count: 0,
        })
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frame_count
    }

    /// Render the frame for trial time `t`.
    pub fn render(&mut self, t: f64) -> Frame {
        let heading = self.config.bend.heading_at(t);
        let (dx, dy) = (heading.cos(), heading.sin());
        let anchor = self.config.anchor;
        let length = self.config.tail_length;
        let noise = self.config.noise as i16;
        let rng = &mut self.rng;
        Frame::gray8_from_fn(self.config.width, self.config.height, t, |x, y| {
            let px = x as f64 - anchor.x;
            let py = y as f64 - anchor.y;
            let along = (px * dx + py * dy).clamp(0.0, length);
            let dist = ((px - along * dx).powi(2) + (py - along * dy).powi(2)).sqrt();
            let base = (dist * EDGE_GRADIENT).min(255.0) as i16;
            let jitter = if noise > 0 { rng.gen_range(-noise..=noise) } else { 0 };
            (base + jitter).clamp(0, 255) as u8
        })
    }
}

impl FrameSource for SyntheticTailSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.config.frames.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let t = self.frame_count as f64 / self.config.fps;
        self.frame_count += 1;
        Ok(Some(self.render(t)))
    }
}

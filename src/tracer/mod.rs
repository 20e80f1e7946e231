//! Tail posture tracing.
//!
//! `trace_tail` follows a dark (or bright) ridge outward from a fixed anchor
//! in `n_segments` equal steps. At each step it probes a fan of candidate
//! headings spanning ±π/3 around the previous heading and moves toward the
//! best one. The output is the absolute heading of every segment.
//!
//! Tracing never fails. A segment with no in-bounds candidate, or whose
//! candidates show less contrast than `min_contrast`, emits `0.0` and is
//! counted in `TraceResult::degenerate_segments`. A zero therefore means
//! "no information", which is indistinguishable from a real zero heading
//! unless the caller looks at the counter.

mod unwrap;

use std::f64::consts::FRAC_PI_3;

use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub use unwrap::{unwrap_series, AngleUnwrapper};

/// Half-width of the candidate arc around the current heading.
pub const SEARCH_HALF_ARC: f64 = FRAC_PI_3;

/// Angle emitted for a segment that could not be traced.
pub const DEGENERATE_ANGLE: f64 = 0.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn step(self, heading: f64, length: f64) -> Self {
        Self {
            x: self.x + heading.cos() * length,
            y: self.y + heading.sin() * length,
        }
    }
}

/// How the next heading is chosen among the candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Darkest candidate (dark tail on bright background).
    #[default]
    Minimum,
    /// Heading averaged over candidates, weighted by intensity above the
    /// darkest candidate (bright tail on dark background).
    WeightedMean,
}

/// Tracing parameters. Headings are in radians in image coordinates
/// (x right, y down), so positive angles turn clockwise on screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TracerParams {
    pub anchor: Point,
    pub n_segments: usize,
    pub tail_length: f64,
    pub n_candidates: usize,
    pub baseline_heading: f64,
    pub mode: SelectionMode,
    /// Box filter width in pixels; 0 or 1 disables filtering.
    pub filter_size: usize,
    /// Minimum intensity range among candidates for a segment to count as traced.
    pub min_contrast: f32,
}

impl Default for TracerParams {
    fn default() -> Self {
        Self {
            anchor: Point::new(50.0, 100.0),
            n_segments: 8,
            tail_length: 120.0,
            n_candidates: 31,
            baseline_heading: 0.0,
            mode: SelectionMode::Minimum,
            filter_size: 0,
            min_contrast: 1e-3,
        }
    }
}

impl TracerParams {
    pub fn segment_length(&self) -> f64 {
        self.tail_length / self.n_segments.max(1) as f64
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_segments == 0 {
            anyhow::bail!("tracer needs at least one segment");
        }
        if self.n_candidates == 0 {
            anyhow::bail!("tracer needs at least one candidate heading");
        }
        if !self.tail_length.is_finite() || self.tail_length <= 0.0 {
            anyhow::bail!("tail length must be positive");
        }
        if !self.min_contrast.is_finite() || self.min_contrast < 0.0 {
            anyhow::bail!("min_contrast must be a non-negative number");
        }
        if !self.anchor.x.is_finite() || !self.anchor.y.is_finite() {
            anyhow::bail!("anchor must have finite coordinates");
        }
        if !self.baseline_heading.is_finite() {
            anyhow::bail!("baseline heading must be finite");
        }
        Ok(())
    }

    /// Candidate headings spanning the search arc around `center`.
    fn candidates(&self, center: f64) -> impl Iterator<Item = f64> + '_ {
        let n = self.n_candidates;
        (0..n).map(move |k| {
            if n == 1 {
                center
            } else {
                center - SEARCH_HALF_ARC + 2.0 * SEARCH_HALF_ARC * k as f64 / (n - 1) as f64
            }
        })
    }
}

/// Partial parameter replacement delivered over the dispatcher's parameter channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerUpdate {
    pub anchor: Option<Point>,
    pub n_segments: Option<usize>,
    pub tail_length: Option<f64>,
    pub n_candidates: Option<usize>,
    pub baseline_heading: Option<f64>,
    pub mode: Option<SelectionMode>,
    pub filter_size: Option<usize>,
    pub min_contrast: Option<f32>,
}

impl TracerUpdate {
    /// Apply to a copy of `params`, keeping the original when the result is invalid.
    pub fn apply_to(&self, params: &TracerParams) -> anyhow::Result<TracerParams> {
        let mut next = params.clone();
        if let Some(anchor) = self.anchor {
            next.anchor = anchor;
        }
        if let Some(n) = self.n_segments {
            next.n_segments = n;
        }
        if let Some(length) = self.tail_length {
            next.tail_length = length;
        }
        if let Some(n) = self.n_candidates {
            next.n_candidates = n;
        }
        if let Some(heading) = self.baseline_heading {
            next.baseline_heading = heading;
        }
        if let Some(mode) = self.mode {
            next.mode = mode;
        }
        if let Some(size) = self.filter_size {
            next.filter_size = size;
        }
        if let Some(contrast) = self.min_contrast {
            next.min_contrast = contrast;
        }
        next.validate()?;
        Ok(next)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceResult {
    /// Absolute heading of each segment.
    pub angles: Vec<f64>,
    /// Sum of the cosines of the traced headings.
    pub tail_sum: f64,
    pub degenerate_segments: usize,
}

pub fn trace_tail(frame: &Frame, params: &TracerParams) -> TraceResult {
    let segment_length = params.segment_length();
    let mut position = params.anchor;
    let mut heading = params.baseline_heading;
    let mut angles = Vec::with_capacity(params.n_segments);
    let mut tail_sum = 0.0;
    let mut degenerate_segments = 0;

    // (heading, intensity) of in-bounds candidates for the current segment.
    let mut samples: Vec<(f64, f32)> = Vec::with_capacity(params.n_candidates);

    for _ in 0..params.n_segments {
        samples.clear();
        for candidate in params.candidates(heading) {
            let probe = position.step(candidate, segment_length);
            let x = probe.x.round() as i64;
            let y = probe.y.round() as i64;
            if let Some(value) = frame.box_intensity(x, y, params.filter_size) {
                samples.push((candidate, value));
            }
        }

        match select_heading(&samples, params) {
            Some(next) => {
                heading = next;
                angles.push(next);
                tail_sum += next.cos();
            }
            None => {
                degenerate_segments += 1;
                angles.push(DEGENERATE_ANGLE);
            }
        }
        position = position.step(heading, segment_length);
    }

    TraceResult {
        angles,
        tail_sum,
        degenerate_segments,
    }
}

fn select_heading(samples: &[(f64, f32)], params: &TracerParams) -> Option<f64> {
    let (first_heading, first_value) = *samples.first()?;
    let mut darkest = (first_heading, first_value);
    let mut brightest = first_value;
    for &(heading, value) in &samples[1..] {
        if value < darkest.1 {
            darkest = (heading, value);
        }
        brightest = brightest.max(value);
    }
    if brightest - darkest.1 < params.min_contrast {
        return None;
    }

    match params.mode {
        SelectionMode::Minimum => Some(darkest.0),
        SelectionMode::WeightedMean => {
            let floor = darkest.1 as f64;
            let mut weight_sum = 0.0;
            let mut heading_sum = 0.0;
            for &(heading, value) in samples {
                let weight = value as f64 - floor;
                weight_sum += weight;
                heading_sum += weight * heading;
            }
            (weight_sum > 0.0).then(|| heading_sum / weight_sum)
        }
    }
}

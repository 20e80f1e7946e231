//! Phase unwrapping of segment headings across frames.
//!
//! Each segment index is unwrapped independently: a value is shifted by
//! multiples of 2π until it lies within π of the same segment's value in the
//! previous frame.

use std::f64::consts::{PI, TAU};

fn nearest_branch(value: f64, previous: f64) -> f64 {
    let mut v = value;
    while v - previous > PI {
        v -= TAU;
    }
    while v - previous < -PI {
        v += TAU;
    }
    v
}

/// Unwrap a whole series of per-frame angle vectors.
///
/// A row whose width differs from the one before it starts a new run.
pub fn unwrap_series(series: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut unwrapper = AngleUnwrapper::new();
    series
        .iter()
        .map(|row| {
            let mut row = row.clone();
            unwrapper.apply(&mut row);
            row
        })
        .collect()
}

/// Streaming form of `unwrap_series`, holding only the previous frame.
#[derive(Clone, Debug, Default)]
pub struct AngleUnwrapper {
    previous: Option<Vec<f64>>,
}

impl AngleUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, angles: &mut [f64]) {
        if let Some(previous) = &self.previous {
            if previous.len() == angles.len() {
                for (angle, &prev) in angles.iter_mut().zip(previous.iter()) {
                    *angle = nearest_branch(*angle, prev);
                }
            }
        }
        match &mut self.previous {
            Some(previous) if previous.len() == angles.len() => previous.copy_from_slice(angles),
            _ => self.previous = Some(angles.to_vec()),
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(angle: f64) -> f64 {
        (angle + PI).rem_euclid(TAU) - PI
    }

    #[test]
    fn removes_jumps_across_pi() {
        // Two segments sweeping steadily through +π and -π.
        let raw: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let t = i as f64 * 0.05;
                vec![wrap(2.5 + t), wrap(-2.5 - 0.5 * t)]
            })
            .collect();
        let max_raw_jump = raw
            .windows(2)
            .map(|w| (w[1][0] - w[0][0]).abs())
            .fold(0.0, f64::max);
        assert!(max_raw_jump > PI);

        let smooth = unwrap_series(&raw);
        for pair in smooth.windows(2) {
            for segment in 0..2 {
                assert!((pair[1][segment] - pair[0][segment]).abs() < 0.1);
            }
        }
        assert!((smooth[199][0] - (2.5 + 199.0 * 0.05)).abs() < 1e-9);
    }

    #[test]
    fn width_change_restarts() {
        let mut unwrapper = AngleUnwrapper::new();
        let mut first = vec![3.0];
        unwrapper.apply(&mut first);
        let mut second = vec![-3.0, -3.0];
        unwrapper.apply(&mut second);
        assert_eq!(second, vec![-3.0, -3.0]);
        let mut third = vec![3.0, 3.0];
        unwrapper.apply(&mut third);
        assert!((third[0] - (3.0 - TAU)).abs() < 1e-12);
    }
}

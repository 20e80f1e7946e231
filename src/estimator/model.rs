//! Learned mappings from tail angles to body velocity.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::BodyVelocity;

/// Maps one frame of segment angles to a body velocity, carrying any
/// recurrent state between calls.
pub trait VelocityModel: Send {
    /// Number of angles the model expects per step, if fixed.
    fn input_width(&self) -> Option<usize>;

    fn reset_state(&mut self);

    fn step(&mut self, angles: ArrayView1<'_, f64>) -> Result<BodyVelocity>;
}

/// Returns the same velocity for every input.
#[derive(Clone, Debug, Default)]
pub struct ConstantVelocityModel {
    pub velocity: BodyVelocity,
}

impl ConstantVelocityModel {
    pub fn new(velocity: BodyVelocity) -> Self {
        Self { velocity }
    }
}

impl VelocityModel for ConstantVelocityModel {
    fn input_width(&self) -> Option<usize> {
        None
    }

    fn reset_state(&mut self) {}

    fn step(&mut self, _angles: ArrayView1<'_, f64>) -> Result<BodyVelocity> {
        Ok(self.velocity)
    }
}

/// Serialized weights of a single-layer Elman network.
///
/// Matrices are row-major nested vectors: `w_in` is `hidden x inputs`,
/// `w_rec` is `hidden x hidden`, `w_out` is `3 x hidden` with output rows
/// ordered axial, lateral, angular.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecurrentWeights {
    pub w_in: Vec<Vec<f64>>,
    pub w_rec: Vec<Vec<f64>>,
    pub b_hidden: Vec<f64>,
    pub w_out: Vec<Vec<f64>>,
    pub b_out: [f64; 3],
}

/// `h' = tanh(W_in x + W_rec h + b)`, `v = W_out h' + b_out`.
pub struct RecurrentVelocityModel {
    w_in: Array2<f64>,
    w_rec: Array2<f64>,
    b_hidden: Array1<f64>,
    w_out: Array2<f64>,
    b_out: Array1<f64>,
    hidden: Array1<f64>,
}

impl RecurrentVelocityModel {
    pub fn from_weights(weights: RecurrentWeights) -> Result<Self> {
        let hidden = weights.b_hidden.len();
        if hidden == 0 {
            return Err(anyhow!("recurrent model needs at least one hidden unit"));
        }
        let w_in = matrix("w_in", &weights.w_in, Some(hidden), None)?;
        let inputs = w_in.ncols();
        if inputs == 0 {
            return Err(anyhow!("w_in must have at least one column"));
        }
        let w_rec = matrix("w_rec", &weights.w_rec, Some(hidden), Some(hidden))?;
        let w_out = matrix("w_out", &weights.w_out, Some(3), Some(hidden))?;
        Ok(Self {
            w_in,
            w_rec,
            b_hidden: Array1::from(weights.b_hidden),
            w_out,
            b_out: Array1::from(weights.b_out.to_vec()),
            hidden: Array1::zeros(hidden),
        })
    }

    /// Load weights from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model weights {}", path.display()))?;
        let weights: RecurrentWeights = serde_json::from_str(&raw)
            .with_context(|| format!("invalid model weights {}", path.display()))?;
        Self::from_weights(weights)
    }

    pub fn hidden_state(&self) -> ArrayView1<'_, f64> {
        self.hidden.view()
    }
}

impl VelocityModel for RecurrentVelocityModel {
    fn input_width(&self) -> Option<usize> {
        Some(self.w_in.ncols())
    }

    fn reset_state(&mut self) {
        self.hidden.fill(0.0);
    }

    fn step(&mut self, angles: ArrayView1<'_, f64>) -> Result<BodyVelocity> {
        if angles.len() != self.w_in.ncols() {
            return Err(anyhow!(
                "model expects {} angles per frame, got {}",
                self.w_in.ncols(),
                angles.len()
            ));
        }
        let pre = self.w_in.dot(&angles) + self.w_rec.dot(&self.hidden) + &self.b_hidden;
        self.hidden = pre.mapv(f64::tanh);
        let out = self.w_out.dot(&self.hidden) + &self.b_out;
        Ok(BodyVelocity::new(out[0], out[1], out[2]))
    }
}

fn matrix(
    name: &str,
    rows: &[Vec<f64>],
    expected_rows: Option<usize>,
    expected_cols: Option<usize>,
) -> Result<Array2<f64>> {
    if let Some(expected) = expected_rows {
        if rows.len() != expected {
            return Err(anyhow!("{} has {} rows, expected {}", name, rows.len(), expected));
        }
    }
    let cols = rows.first().map_or(0, Vec::len);
    if let Some(expected) = expected_cols {
        if cols != expected {
            return Err(anyhow!("{} has {} columns, expected {}", name, cols, expected));
        }
    }
    if rows.iter().any(|row| row.len() != cols) {
        return Err(anyhow!("{} has ragged rows", name));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), cols), flat).map_err(|e| anyhow!("{}: {}", name, e))
}

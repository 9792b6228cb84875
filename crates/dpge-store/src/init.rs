//! Seeded initializers for embedding rows and model weights

use crate::{Result, StoreError};
use candle_core::{Device, Tensor};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Random generator used everywhere a run must be reproducible from a seed
pub type SeededRng = ChaCha8Rng;

/// Create the seeded generator for a run
pub fn seeded_rng(seed: u64) -> SeededRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Distribution new rows are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    /// Zero-mean normal with the given standard deviation
    Normal {
        /// Standard deviation
        std: f32,
    },

    /// Glorot uniform over `[-b, b]`, `b = sqrt(6 / (rows + cols))`
    XavierUniform,
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::Normal { std: 0.1 }
    }
}

impl Initializer {
    /// Check parameters before any sampling
    pub fn validate(&self) -> Result<()> {
        match self {
            Initializer::Normal { std } if !(std.is_finite() && *std > 0.0) => Err(
                StoreError::Initializer(format!("std must be positive, got {}", std)),
            ),
            _ => Ok(()),
        }
    }

    /// Draw `rows * cols` values in row-major order
    pub fn sample<R: Rng + ?Sized>(&self, rows: usize, cols: usize, rng: &mut R) -> Result<Vec<f32>> {
        self.validate()?;
        let n = rows * cols;
        if n == 0 {
            return Ok(Vec::new());
        }
        let values = match *self {
            Initializer::Normal { std } => {
                let dist = Normal::new(0.0f32, std)
                    .map_err(|e| StoreError::Initializer(e.to_string()))?;
                (0..n).map(|_| dist.sample(rng)).collect()
            }
            Initializer::XavierUniform => {
                let bound = (6.0 / (rows + cols) as f32).sqrt();
                let dist = Uniform::new(-bound, bound);
                (0..n).map(|_| dist.sample(rng)).collect()
            }
        };
        Ok(values)
    }

    /// Draw a `[rows, cols]` tensor
    pub fn tensor<R: Rng + ?Sized>(
        &self,
        rows: usize,
        cols: usize,
        rng: &mut R,
        device: &Device,
    ) -> Result<Tensor> {
        let values = self.sample(rows, cols, rng)?;
        Ok(Tensor::from_vec(values, (rows, cols), device)?)
    }
}

//! Feature normalization.
//!
//! A [`Normalization`] mode is chosen once from the hyperparameters; fitting it
//! on the training split yields a [`Normalizer`] that is then applied, never
//! refitted, to validation and inference inputs.

use crate::surrogate::SurrogateError;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Scales below this are treated as constant features.
const SCALE_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    /// Subtract the per-feature training mean.
    Center,
    /// Subtract the training mean and divide by the training standard deviation.
    #[default]
    MeanStd,
}

impl Normalization {
    /// Fits location/scale statistics on `data` (rows are samples).
    pub fn fit(self, data: ArrayView2<f64>) -> Normalizer {
        let dim = data.ncols();
        if data.nrows() == 0 {
            return Normalizer::Identity { dim };
        }
        match self {
            Normalization::None => Normalizer::Identity { dim },
            Normalization::Center => Normalizer::Center {
                mean: column_mean(data),
            },
            Normalization::MeanStd => {
                let mean = column_mean(data);
                let std = data
                    .std_axis(Axis(0), 0.0)
                    .mapv(|s| if s.is_finite() && s > SCALE_FLOOR { s } else { 1.0 });
                Normalizer::MeanStd { mean, std }
            }
        }
    }
}

fn column_mean(data: ArrayView2<f64>) -> Array1<f64> {
    data.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()))
}

/// Fitted statistics with a uniform transform / inverse capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalizer {
    Identity { dim: usize },
    Center { mean: Array1<f64> },
    MeanStd { mean: Array1<f64>, std: Array1<f64> },
}

impl Normalizer {
    pub fn dim(&self) -> usize {
        match self {
            Normalizer::Identity { dim } => *dim,
            Normalizer::Center { mean } => mean.len(),
            Normalizer::MeanStd { mean, .. } => mean.len(),
        }
    }

    /// Location and scale cover the same features.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Normalizer::MeanStd { mean, std } => mean.len() == std.len(),
            _ => true,
        }
    }

    pub fn mode(&self) -> Normalization {
        match self {
            Normalizer::Identity { .. } => Normalization::None,
            Normalizer::Center { .. } => Normalization::Center,
            Normalizer::MeanStd { .. } => Normalization::MeanStd,
        }
    }

    fn check(&self, data: &ArrayView2<f64>) -> Result<(), SurrogateError> {
        if data.ncols() != self.dim() {
            return Err(SurrogateError::DimensionMismatch {
                expected: self.dim(),
                found: data.ncols(),
            });
        }
        Ok(())
    }

    /// Maps raw features to the normalized space.
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, SurrogateError> {
        self.check(&data)?;
        Ok(match self {
            Normalizer::Identity { .. } => data.to_owned(),
            Normalizer::Center { mean } => &data - mean,
            Normalizer::MeanStd { mean, std } => (&data - mean) / std,
        })
    }

    /// Maps normalized values back to raw features.
    pub fn inverse(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, SurrogateError> {
        self.check(&data)?;
        Ok(match self {
            Normalizer::Identity { .. } => data.to_owned(),
            Normalizer::Center { mean } => &data + mean,
            Normalizer::MeanStd { mean, std } => &data * std + mean,
        })
    }

    /// Maps a normalized spread (standard deviation) back to raw units.
    pub fn inverse_spread(&self, spread: ArrayView2<f64>) -> Result<Array2<f64>, SurrogateError> {
        self.check(&spread)?;
        Ok(match self {
            Normalizer::Identity { .. } | Normalizer::Center { .. } => spread.to_owned(),
            Normalizer::MeanStd { std, .. } => &spread * std,
        })
    }
}

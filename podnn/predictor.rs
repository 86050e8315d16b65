//! Physical-space prediction: normalize inputs, evaluate the surrogate,
//! de-normalize coefficients and lift them through the POD basis.
//!
//! A [`Predictor`] only borrows fitted state, so any number of them may run
//! concurrently against the same model.

use crate::normalize::Normalizer;
use crate::pod::{PodBasis, PodError};
use crate::surrogate::{SurrogateError, SurrogateRegressor};
use ndarray::{Array1, Array2, ArrayView2, Axis, ShapeError, concatenate, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error(transparent)]
    Surrogate(#[from] SurrogateError),

    #[error(transparent)]
    Basis(#[from] PodError),

    #[error("Parameter bounds are invalid: {0}")]
    InvalidBounds(String),

    #[error("Batch size must be positive.")]
    InvalidBatchSize,

    #[error("Failed to assemble batched predictions: {0}")]
    Assembly(#[from] ShapeError),
}

/// How a per-mode standard deviation is carried to physical space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigmaPropagation {
    /// `σ_U = V · σ_v`. Treats modes as independent and adds their spreads
    /// with the basis signs, so entries can be negative where basis vectors
    /// are. Kept as the default to reproduce established results.
    #[default]
    Linear,
    /// `σ_U = sqrt(V² · σ_v²)`, the exact spread for independent modes.
    Quadrature,
}

impl SigmaPropagation {
    /// Maps `sigma` (`[n_samples, n_modes]`) to `[field_dim, n_samples]`.
    pub fn propagate(self, basis: ArrayView2<f64>, sigma: ArrayView2<f64>) -> Array2<f64> {
        match self {
            SigmaPropagation::Linear => basis.dot(&sigma.t()),
            SigmaPropagation::Quadrature => {
                let squared_basis = basis.mapv(|b| b * b);
                let variance = sigma.mapv(|s| s * s);
                squared_basis.dot(&variance.t()).mapv_into(f64::sqrt)
            }
        }
    }
}

pub struct Predictor<'a, R> {
    basis: &'a PodBasis,
    input_norm: &'a Normalizer,
    output_norm: &'a Normalizer,
    regressor: &'a R,
    sigma_propagation: SigmaPropagation,
}

impl<'a, R: SurrogateRegressor> Predictor<'a, R> {
    pub fn new(
        basis: &'a PodBasis,
        input_norm: &'a Normalizer,
        output_norm: &'a Normalizer,
        regressor: &'a R,
        sigma_propagation: SigmaPropagation,
    ) -> Self {
        Self {
            basis,
            input_norm,
            output_norm,
            regressor,
            sigma_propagation,
        }
    }

    /// Reduced coefficients in raw units, `[n_samples, n_modes]`.
    pub fn predict_coefficients(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictorError> {
        let normalized = self.input_norm.transform(x)?;
        let coefficients = self.regressor.predict(normalized.view())?;
        Ok(self.output_norm.inverse(coefficients.view())?)
    }

    /// Reduced coefficients and their standard deviation in raw units.
    pub fn predict_coefficients_var(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<(Array2<f64>, Array2<f64>), PredictorError> {
        let normalized = self.input_norm.transform(x)?;
        let (mean, sigma) = self.regressor.predict_var(normalized.view())?;
        let mean = self.output_norm.inverse(mean.view())?;
        let sigma = self.output_norm.inverse_spread(sigma.view())?;
        Ok((mean, sigma))
    }

    /// Point prediction `[field_dim, n_samples]`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictorError> {
        let coefficients = self.predict_coefficients(x)?;
        Ok(self.basis.reconstruct(coefficients.t())?)
    }

    /// Mean and spread fields, both `[field_dim, n_samples]`.
    pub fn predict_var(&self, x: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>), PredictorError> {
        let (mean, sigma) = self.predict_coefficients_var(x)?;
        let field_mean = self.basis.reconstruct(mean.t())?;
        let field_sigma = self
            .sigma_propagation
            .propagate(self.basis.basis(), sigma.view());
        Ok((field_mean, field_sigma))
    }
}

impl<R: SurrogateRegressor + Sync> Predictor<'_, R> {
    /// [`Predictor::predict_var`] over row chunks of `x` evaluated in
    /// parallel; output columns keep the row order of `x`.
    pub fn predict_var_batched(
        &self,
        x: ArrayView2<f64>,
        batch_size: usize,
    ) -> Result<(Array2<f64>, Array2<f64>), PredictorError> {
        if batch_size == 0 {
            return Err(PredictorError::InvalidBatchSize);
        }
        let n_rows = x.nrows();
        if n_rows <= batch_size {
            return self.predict_var(x);
        }
        let ranges: Vec<(usize, usize)> = (0..n_rows)
            .step_by(batch_size)
            .map(|start| (start, (start + batch_size).min(n_rows)))
            .collect();
        log::debug!(
            "Predicting {} rows in {} batches of up to {}.",
            n_rows,
            ranges.len(),
            batch_size
        );
        let parts = ranges
            .par_iter()
            .map(|&(start, end)| self.predict_var(x.slice(s![start..end, ..])))
            .collect::<Result<Vec<_>, _>>()?;

        let means: Vec<_> = parts.iter().map(|(mean, _)| mean.view()).collect();
        let sigmas: Vec<_> = parts.iter().map(|(_, sigma)| sigma.view()).collect();
        Ok((concatenate(Axis(1), &means)?, concatenate(Axis(1), &sigmas)?))
    }
}

fn check_bounds(mu_min: &[f64], mu_max: &[f64]) -> Result<(), PredictorError> {
    if mu_min.len() != mu_max.len() {
        return Err(PredictorError::InvalidBounds(format!(
            "mu_min has {} entries but mu_max has {}",
            mu_min.len(),
            mu_max.len()
        )));
    }
    if mu_min.is_empty() {
        return Err(PredictorError::InvalidBounds("no parameter bounds given".into()));
    }
    for (i, (lo, hi)) in mu_min.iter().zip(mu_max).enumerate() {
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(PredictorError::InvalidBounds(format!(
                "component {i}: [{lo}, {hi}]"
            )));
        }
    }
    Ok(())
}

/// Draws `n` parameter vectors uniformly in the box `[mu_min, mu_max]`.
pub fn generate_hifi_inputs(
    n: usize,
    mu_min: &[f64],
    mu_max: &[f64],
    seed: u64,
) -> Result<Array2<f64>, PredictorError> {
    check_bounds(mu_min, mu_max)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut inputs = Array2::<f64>::zeros((n, mu_min.len()));
    for mut row in inputs.rows_mut() {
        for (value, (&lo, &hi)) in row.iter_mut().zip(mu_min.iter().zip(mu_max)) {
            *value = rng.gen_range(lo..=hi);
        }
    }
    Ok(inputs)
}

/// Like [`generate_hifi_inputs`], with every drawn vector repeated over `n_t`
/// evenly spaced times in `[t_min, t_max]`. Column 0 is time; rows of one
/// sample are consecutive.
pub fn generate_hifi_inputs_with_time(
    n: usize,
    mu_min: &[f64],
    mu_max: &[f64],
    (t_min, t_max): (f64, f64),
    n_t: usize,
    seed: u64,
) -> Result<Array2<f64>, PredictorError> {
    if !(t_min.is_finite() && t_max.is_finite()) || t_min > t_max || n_t == 0 {
        return Err(PredictorError::InvalidBounds(format!(
            "time range [{t_min}, {t_max}] with {n_t} steps"
        )));
    }
    let mu = generate_hifi_inputs(n, mu_min, mu_max, seed)?;
    let times = Array1::linspace(t_min, t_max, n_t);
    let mut inputs = Array2::<f64>::zeros((n * n_t, mu.ncols() + 1));
    for (sample, mu_row) in mu.rows().into_iter().enumerate() {
        for (step, &t) in times.iter().enumerate() {
            let mut row = inputs.row_mut(sample * n_t + step);
            row[0] = t;
            row.slice_mut(s![1..]).assign(&mu_row);
        }
    }
    Ok(inputs)
}

//! Trainable maps from (normalized) parameter vectors to (normalized) reduced
//! coefficients, each exposing a point estimate and a per-coefficient spread.
//!
//! Two interchangeable strategies sit behind [`SurrogateRegressor`]:
//! a single network with an explicit variance head, and a deep ensemble of
//! such networks whose members are combined as a Gaussian mixture.

use crate::network::{Adam, NetworkShape, VarNetwork};
use crate::trainer::CompositeLoss;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurrogateError {
    #[error("Expected {expected} features per row, found {found}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Inputs have {inputs} rows but targets have {targets}.")]
    RowMismatch { inputs: usize, targets: usize },

    #[error("Invalid network topology: {0}")]
    InvalidTopology(String),

    #[error("An ensemble needs at least one member.")]
    EmptyEnsemble,
}

/// Read-only prediction capability.
pub trait SurrogateRegressor {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;

    /// Returns the predicted mean and standard deviation, both `[n_rows, output_dim]`.
    fn predict_var(&self, x: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>), SurrogateError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SurrogateError> {
        Ok(self.predict_var(x)?.0)
    }
}

/// Regressors whose parameters the trainer may update.
pub trait TrainableRegressor: SurrogateRegressor {
    /// Performs one full-batch optimizer step and returns the loss evaluated
    /// before the update. The update is skipped when that loss is not finite.
    fn train_step(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        loss: &CompositeLoss,
        learning_rate: f64,
    ) -> Result<f64, SurrogateError>;
}

fn check_batch(
    regressor: &impl SurrogateRegressor,
    x: &ArrayView2<f64>,
    y: Option<&ArrayView2<f64>>,
) -> Result<(), SurrogateError> {
    if x.ncols() != regressor.input_dim() {
        return Err(SurrogateError::DimensionMismatch {
            expected: regressor.input_dim(),
            found: x.ncols(),
        });
    }
    if let Some(y) = y {
        if y.ncols() != regressor.output_dim() {
            return Err(SurrogateError::DimensionMismatch {
                expected: regressor.output_dim(),
                found: y.ncols(),
            });
        }
        if y.nrows() != x.nrows() {
            return Err(SurrogateError::RowMismatch {
                inputs: x.nrows(),
                targets: y.nrows(),
            });
        }
    }
    Ok(())
}

/// How the surrogate estimates its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UncertaintyStrategy {
    #[default]
    VarianceHead,
    Ensemble { members: usize },
}

/// A single network with a learned variance head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceHeadRegressor {
    network: VarNetwork,
    #[serde(skip)]
    optimizer: Option<Adam>,
}

impl VarianceHeadRegressor {
    pub fn new(shape: NetworkShape, seed: u64) -> Result<Self, SurrogateError> {
        Ok(Self {
            network: VarNetwork::new(shape, seed)?,
            optimizer: None,
        })
    }

    pub fn network(&self) -> &VarNetwork {
        &self.network
    }
}

impl SurrogateRegressor for VarianceHeadRegressor {
    fn input_dim(&self) -> usize {
        self.network.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.network.output_dim()
    }

    fn predict_var(&self, x: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>), SurrogateError> {
        check_batch(self, &x, None)?;
        let (mean, variance) = self.network.mean_and_variance(x);
        Ok((mean, variance.mapv_into(f64::sqrt)))
    }
}

impl TrainableRegressor for VarianceHeadRegressor {
    fn train_step(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        loss: &CompositeLoss,
        learning_rate: f64,
    ) -> Result<f64, SurrogateError> {
        check_batch(self, &x, Some(&y))?;
        let trace = self.network.trace(x);
        let (data_loss, d_output) = loss.evaluate(trace.output(), y);
        let value = data_loss + loss.beta * self.network.weight_penalty();
        if !value.is_finite() {
            return Ok(value);
        }
        let gradients = self.network.gradients(&trace, d_output.view(), loss.beta);
        let optimizer = self
            .optimizer
            .get_or_insert_with(|| Adam::new(&self.network));
        optimizer.apply(&mut self.network, &gradients, learning_rate);
        Ok(value)
    }
}

/// Independently seeded variance-head networks combined as a uniform mixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleRegressor {
    members: Vec<VarianceHeadRegressor>,
}

impl EnsembleRegressor {
    /// Member `i` is initialised from `seed + i`.
    pub fn new(shape: NetworkShape, members: usize, seed: u64) -> Result<Self, SurrogateError> {
        if members == 0 {
            return Err(SurrogateError::EmptyEnsemble);
        }
        let members = (0..members as u64)
            .map(|i| VarianceHeadRegressor::new(shape.clone(), seed.wrapping_add(i)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { members })
    }

    pub fn members(&self) -> &[VarianceHeadRegressor] {
        &self.members
    }

    fn first(&self) -> Result<&VarianceHeadRegressor, SurrogateError> {
        self.members.first().ok_or(SurrogateError::EmptyEnsemble)
    }
}

impl SurrogateRegressor for EnsembleRegressor {
    fn input_dim(&self) -> usize {
        self.members.first().map_or(0, SurrogateRegressor::input_dim)
    }

    fn output_dim(&self) -> usize {
        self.members.first().map_or(0, SurrogateRegressor::output_dim)
    }

    fn predict_var(&self, x: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>), SurrogateError> {
        let first = self.first()?;
        check_batch(first, &x, None)?;
        let shape = (x.nrows(), first.output_dim());
        let mut mean_sum = Array2::<f64>::zeros(shape);
        let mut second_moment_sum = Array2::<f64>::zeros(shape);
        for member in &self.members {
            let (mean, variance) = member.network.mean_and_variance(x);
            second_moment_sum += &(&variance + &mean.mapv(|m| m * m));
            mean_sum += &mean;
        }
        let count = self.members.len() as f64;
        let mean = mean_sum / count;
        let variance = second_moment_sum / count - &mean.mapv(|m| m * m);
        let sigma = variance.mapv_into(|v| v.max(0.0).sqrt());
        Ok((mean, sigma))
    }
}

impl TrainableRegressor for EnsembleRegressor {
    /// Steps every member on the same batch; returns the mean member loss.
    fn train_step(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        loss: &CompositeLoss,
        learning_rate: f64,
    ) -> Result<f64, SurrogateError> {
        let losses = self
            .members
            .par_iter_mut()
            .map(|member| member.train_step(x, y, loss, learning_rate))
            .collect::<Result<Vec<f64>, _>>()?;
        if losses.is_empty() {
            return Err(SurrogateError::EmptyEnsemble);
        }
        Ok(losses.iter().sum::<f64>() / losses.len() as f64)
    }
}

/// The persisted surrogate, one of the two strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Surrogate {
    VarianceHead(VarianceHeadRegressor),
    Ensemble(EnsembleRegressor),
}

impl Surrogate {
    pub fn new(
        strategy: UncertaintyStrategy,
        shape: NetworkShape,
        seed: u64,
    ) -> Result<Self, SurrogateError> {
        Ok(match strategy {
            UncertaintyStrategy::VarianceHead => {
                Surrogate::VarianceHead(VarianceHeadRegressor::new(shape, seed)?)
            }
            UncertaintyStrategy::Ensemble { members } => {
                Surrogate::Ensemble(EnsembleRegressor::new(shape, members, seed)?)
            }
        })
    }

    pub fn strategy(&self) -> UncertaintyStrategy {
        match self {
            Surrogate::VarianceHead(_) => UncertaintyStrategy::VarianceHead,
            Surrogate::Ensemble(ensemble) => UncertaintyStrategy::Ensemble {
                members: ensemble.members.len(),
            },
        }
    }

    /// Checks the stored weights of every network against its shape.
    pub fn check_parameters(&self) -> Result<(), SurrogateError> {
        match self {
            Surrogate::VarianceHead(single) => single.network.check_parameters(),
            Surrogate::Ensemble(ensemble) => {
                let first = ensemble.first()?;
                for member in &ensemble.members {
                    member.network.check_parameters()?;
                    if member.network.shape() != first.network.shape() {
                        return Err(SurrogateError::InvalidTopology(
                            "ensemble members have different shapes".to_string(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    pub fn n_parameters(&self) -> usize {
        match self {
            Surrogate::VarianceHead(single) => single.network.n_parameters(),
            Surrogate::Ensemble(ensemble) => ensemble
                .members
                .iter()
                .map(|member| member.network.n_parameters())
                .sum(),
        }
    }
}

impl SurrogateRegressor for Surrogate {
    fn input_dim(&self) -> usize {
        match self {
            Surrogate::VarianceHead(single) => single.input_dim(),
            Surrogate::Ensemble(ensemble) => ensemble.input_dim(),
        }
    }

    fn output_dim(&self) -> usize {
        match self {
            Surrogate::VarianceHead(single) => single.output_dim(),
            Surrogate::Ensemble(ensemble) => ensemble.output_dim(),
        }
    }

    fn predict_var(&self, x: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>), SurrogateError> {
        match self {
            Surrogate::VarianceHead(single) => single.predict_var(x),
            Surrogate::Ensemble(ensemble) => ensemble.predict_var(x),
        }
    }
}

impl TrainableRegressor for Surrogate {
    fn train_step(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        loss: &CompositeLoss,
        learning_rate: f64,
    ) -> Result<f64, SurrogateError> {
        match self {
            Surrogate::VarianceHead(single) => single.train_step(x, y, loss, learning_rate),
            Surrogate::Ensemble(ensemble) => ensemble.train_step(x, y, loss, learning_rate),
        }
    }
}

//! # Surrogate Training
//!
//! A fixed-epoch, full-batch loop that minimizes the composite loss
//!
//! ```text
//! L = λ·mean(r²) + mean(k1·½·ln σ² + k2·r²/(2σ²)) + β·Σ‖W‖²,    r = μ − v
//! ```
//!
//! over the normalized reduced coefficients. The first term is the plain
//! regression error, the second a Gaussian negative log-likelihood that grows
//! without bound as σ² → 0 for a wrong mean, and the third an L2 penalty on
//! weights (biases are not penalized).
//!
//! The validation callback is evaluated on a schedule and only recorded; it
//! never contributes to the optimized objective.

use crate::layout::LayoutError;
use crate::metrics::MetricsError;
use crate::network::{VARIANCE_FLOOR, sigmoid, softplus};
use crate::predictor::PredictorError;
use crate::progress::{PipelineStage, ProgressObserver};
use crate::surrogate::{SurrogateError, TrainableRegressor};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Training diverged at epoch {epoch}: loss is {loss}.")]
    Diverged { epoch: usize, loss: f64 },

    #[error("Training configuration is invalid: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Surrogate(#[from] SurrogateError),

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Loss weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeLoss {
    /// Weight of the mean squared coefficient error.
    pub lambda: f64,
    /// Weight of the L2 penalty on network weights.
    pub beta: f64,
    /// Weight of the log-variance term of the likelihood.
    pub k1: f64,
    /// Weight of the variance-scaled squared error of the likelihood.
    pub k2: f64,
}

impl Default for CompositeLoss {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            beta: 0.0,
            k1: 1.0,
            k2: 1.0,
        }
    }
}

impl CompositeLoss {
    /// Evaluates the data terms on a raw network output `[n, 2·d]` against
    /// targets `[n, d]`. Returns the loss and its gradient with respect to the
    /// raw output. The weight penalty is added by the regressor.
    pub fn evaluate(&self, raw: ArrayView2<f64>, target: ArrayView2<f64>) -> (f64, Array2<f64>) {
        let (n, d) = target.dim();
        let count = (n * d).max(1) as f64;
        let mut gradient = Array2::<f64>::zeros(raw.raw_dim());
        let mut total = 0.0;

        for i in 0..n {
            for j in 0..d {
                let mean = raw[[i, j]];
                let raw_var = raw[[i, d + j]];
                let var = softplus(raw_var) + VARIANCE_FLOOR;
                let r = mean - target[[i, j]];
                let r2 = r * r;

                total += self.lambda * r2 + self.k1 * 0.5 * var.ln() + self.k2 * r2 / (2.0 * var);

                gradient[[i, j]] = (2.0 * self.lambda * r + self.k2 * r / var) / count;
                let d_var = 0.5 * self.k1 / var - 0.5 * self.k2 * r2 / (var * var);
                gradient[[i, d + j]] = d_var * sigmoid(raw_var) / count;
            }
        }
        (total / count, gradient)
    }
}

/// Optimizer schedule and loss weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Inverse-time decay: the rate at epoch `e` is `lr / (1 + decay·e)`.
    pub decay: f64,
    /// Validate every this many epochs; 0 disables validation.
    pub log_frequency: usize,
    pub loss: CompositeLoss,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        let weights = [
            ("decay", self.decay),
            ("lambda", self.loss.lambda),
            ("beta", self.loss.beta),
            ("k1", self.loss.k1),
            ("k2", self.loss.k2),
        ];
        if let Some((name, value)) = weights.iter().find(|(_, v)| !(v.is_finite() && *v >= 0.0)) {
            return Err(TrainingError::InvalidConfig(format!(
                "{name} must be a non-negative number, got {value}"
            )));
        }
        Ok(())
    }

    pub fn learning_rate_at(&self, epoch: usize) -> f64 {
        self.learning_rate / (1.0 + self.decay * epoch as f64)
    }

    fn validates_at(&self, epoch: usize) -> bool {
        self.log_frequency > 0 && (epoch % self.log_frequency == 0 || epoch + 1 == self.epochs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub epoch: usize,
    pub loss: f64,
    pub validation: Vec<f64>,
}

/// Learning curves of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub final_loss: f64,
    /// Loss of every epoch, evaluated before that epoch's update.
    pub losses: Vec<f64>,
    pub history: Vec<ValidationRecord>,
}

impl TrainingReport {
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

pub struct Trainer<'a> {
    config: TrainingConfig,
    observer: &'a mut dyn ProgressObserver,
}

impl<'a> Trainer<'a> {
    pub fn new(config: TrainingConfig, observer: &'a mut dyn ProgressObserver) -> Self {
        Self { config, observer }
    }

    /// Trains `regressor` on `(x, v)` (normalized inputs and normalized
    /// coefficient targets, one row per sample).
    pub fn train<R, F>(
        &mut self,
        regressor: &mut R,
        x: ArrayView2<f64>,
        v: ArrayView2<f64>,
        mut validation_fn: F,
    ) -> Result<TrainingReport, TrainingError>
    where
        R: TrainableRegressor,
        F: FnMut(&R) -> Result<Array1<f64>, TrainingError>,
    {
        self.config.validate()?;
        let config = self.config;
        log::info!(
            "Training surrogate on {} samples ({} inputs -> {} outputs) for {} epochs.",
            x.nrows(),
            x.ncols(),
            v.ncols(),
            config.epochs
        );

        let mut losses = Vec::with_capacity(config.epochs);
        let mut history = Vec::new();
        self.observer.on_stage_start(PipelineStage::Training, config.epochs);

        for epoch in 0..config.epochs {
            let learning_rate = config.learning_rate_at(epoch);
            let loss = regressor.train_step(x, v, &config.loss, learning_rate)?;
            if !loss.is_finite() {
                log::error!("Non-finite loss at epoch {epoch}: {loss}");
                self.observer.on_stage_finish(PipelineStage::Training);
                return Err(TrainingError::Diverged { epoch, loss });
            }
            losses.push(loss);
            self.observer.on_loss(epoch, loss);

            if config.validates_at(epoch) {
                let validation = validation_fn(regressor)?;
                log::info!(
                    "epoch {epoch:>6}  loss {loss:.6e}  lr {learning_rate:.3e}  validation [{}]",
                    validation.iter().map(|e| format!("{e:.4e}")).join(", ")
                );
                history.push(ValidationRecord {
                    epoch,
                    loss,
                    validation: validation.to_vec(),
                });
            }
            self.observer.on_stage_advance(PipelineStage::Training, epoch + 1);
        }

        self.observer.on_stage_finish(PipelineStage::Training);
        let final_loss = losses.last().copied().unwrap_or(f64::NAN);
        log::info!("Training finished. Final loss: {final_loss:.6e}");
        Ok(TrainingReport {
            epochs: config.epochs,
            final_loss,
            losses,
            history,
        })
    }
}

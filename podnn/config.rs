//! Typed hyperparameter record.
//!
//! The record is a TOML document with one table per pipeline stage. It is
//! parsed and validated once; every later stage reads typed values from it.
//!
//! ```toml
//! [field]
//! n_v = 1
//! mesh_shape = [256]
//! n_t = 100
//! t_min = 1.0
//! t_max = 5.0
//!
//! [pod]
//! eps = 0.0
//! n_l = 20
//!
//! [dataset]
//! train_val = [0.6, 0.2, 0.2]
//! x_noise = 0.01
//!
//! [network]
//! h_layers = [50, 50, 50, 50]
//! h_layers_t = [50, 50, 50]
//! norm = "mean_std"
//!
//! [training]
//! epochs = 80000
//! lr = 1e-4
//! lambda = 1.5
//! beta = 0.1
//! k1 = 1.0
//! k2 = 10.0
//! log_frequency = 500
//!
//! [hifi]
//! n_s_tst = 500
//! mu_min = [0.001]
//! mu_max = [0.01]
//! ```

use crate::dataset::{BuildOptions, DatasetError, SplitRatios};
use crate::layout::{FieldLayout, LayoutError};
use crate::network::NetworkShape;
use crate::normalize::Normalization;
use crate::pod::{PodError, TruncationPolicy};
use crate::predictor::SigmaPropagation;
use crate::surrogate::UncertaintyStrategy;
use crate::trainer::{CompositeLoss, TrainingConfig, TrainingError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write hyperparameter file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse hyperparameter file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize hyperparameters: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid hyperparameter: {0}")]
    Invalid(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Pod(#[from] PodError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Training(#[from] TrainingError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSection {
    pub n_v: usize,
    pub mesh_shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_t: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodSection {
    #[serde(default)]
    pub eps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps_init: Option<f64>,
    /// Maximum number of modes; 0 leaves the count rank-limited.
    #[serde(default)]
    pub n_l: usize,
}

fn default_train_val() -> Vec<f64> {
    vec![0.6, 0.2, 0.2]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSection {
    /// Expected number of parameter samples, checked against the data when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_s: Option<usize>,
    #[serde(default = "default_train_val")]
    pub train_val: Vec<f64>,
    #[serde(default)]
    pub x_noise: f64,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    pub h_layers: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h_layers_t: Option<Vec<usize>>,
    #[serde(default)]
    pub norm: Normalization,
    #[serde(default)]
    pub sigma_propagation: SigmaPropagation,
    #[serde(default)]
    pub uncertainty: UncertaintyStrategy,
}

fn default_log_frequency() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingSection {
    pub epochs: usize,
    pub lr: f64,
    #[serde(default)]
    pub decay: f64,
    pub lambda: f64,
    #[serde(default)]
    pub beta: f64,
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default = "default_log_frequency")]
    pub log_frequency: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_batch_size() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HifiSection {
    pub n_s_tst: usize,
    pub mu_min: Vec<f64>,
    pub mu_max: Vec<f64>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hyperparameters {
    pub field: FieldSection,
    #[serde(default = "PodSection::rank_limited")]
    pub pod: PodSection,
    #[serde(default = "DatasetSection::defaults")]
    pub dataset: DatasetSection,
    pub network: NetworkSection,
    pub training: TrainingSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hifi: Option<HifiSection>,
}

impl PodSection {
    fn rank_limited() -> Self {
        Self {
            eps: 0.0,
            eps_init: None,
            n_l: 0,
        }
    }
}

impl DatasetSection {
    fn defaults() -> Self {
        Self {
            n_s: None,
            train_val: default_train_val(),
            x_noise: 0.0,
            seed: 0,
        }
    }
}

impl Hyperparameters {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let hp: Self = toml::from_str(text)?;
        hp.validate()?;
        Ok(hp)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let hp = Self::from_toml_str(&text)?;
        log::info!("Loaded hyperparameters from {}", path.display());
        Ok(hp)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout()?;
        self.truncation_policy().validate()?;
        self.split_ratios()?;
        self.training_config().validate()?;

        if !(self.dataset.x_noise.is_finite() && self.dataset.x_noise >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "dataset.x_noise must be non-negative, got {}",
                self.dataset.x_noise
            )));
        }
        if self.dataset.n_s == Some(0) {
            return Err(ConfigError::Invalid("dataset.n_s must be positive".into()));
        }

        let mut widths = self
            .network
            .h_layers
            .iter()
            .chain(self.network.h_layers_t.iter().flatten());
        if widths.any(|&w| w == 0) {
            return Err(ConfigError::Invalid("hidden layer widths must be positive".into()));
        }
        if self.network.h_layers_t.is_some() && self.field.n_t.is_none() {
            return Err(ConfigError::Invalid(
                "network.h_layers_t needs a time-dependent field (field.n_t)".into(),
            ));
        }
        if self.network.uncertainty == (UncertaintyStrategy::Ensemble { members: 0 }) {
            return Err(ConfigError::Invalid("an ensemble needs at least one member".into()));
        }

        if let (Some(t_min), Some(t_max)) = (self.field.t_min, self.field.t_max) {
            if !(t_min.is_finite() && t_max.is_finite()) || t_min > t_max {
                return Err(ConfigError::Invalid(format!(
                    "time range [{t_min}, {t_max}] is invalid"
                )));
            }
        }

        if let Some(hifi) = &self.hifi {
            if hifi.n_s_tst == 0 || hifi.batch_size == 0 {
                return Err(ConfigError::Invalid(
                    "hifi.n_s_tst and hifi.batch_size must be positive".into(),
                ));
            }
            if hifi.mu_min.len() != hifi.mu_max.len() || hifi.mu_min.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "hifi.mu_min ({}) and hifi.mu_max ({}) must have the same non-zero length",
                    hifi.mu_min.len(),
                    hifi.mu_max.len()
                )));
            }
            if let Some(i) = (0..hifi.mu_min.len()).find(|&i| hifi.mu_min[i] > hifi.mu_max[i]) {
                return Err(ConfigError::Invalid(format!(
                    "hifi.mu_min[{i}] = {} exceeds hifi.mu_max[{i}] = {}",
                    hifi.mu_min[i], hifi.mu_max[i]
                )));
            }
            if self.field.n_t.is_some() && self.time_range().is_none() {
                return Err(ConfigError::Invalid(
                    "hifi sampling of a time-dependent field needs field.t_min and field.t_max".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> Result<FieldLayout, LayoutError> {
        FieldLayout::new(
            self.field.n_v,
            self.field.mesh_shape.clone(),
            self.field.n_t,
        )
    }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        self.field.t_min.zip(self.field.t_max)
    }

    pub fn truncation_policy(&self) -> TruncationPolicy {
        TruncationPolicy {
            eps: self.pod.eps,
            eps_init: self.pod.eps_init,
            n_l_max: (self.pod.n_l > 0).then_some(self.pod.n_l),
        }
    }

    pub fn split_ratios(&self) -> Result<SplitRatios, DatasetError> {
        SplitRatios::from_slice(&self.dataset.train_val)
    }

    pub fn build_options(&self) -> Result<BuildOptions, DatasetError> {
        Ok(BuildOptions {
            ratios: self.split_ratios()?,
            x_noise: self.dataset.x_noise,
            seed: self.dataset.seed,
        })
    }

    pub fn training_config(&self) -> TrainingConfig {
        let t = &self.training;
        TrainingConfig {
            epochs: t.epochs,
            learning_rate: t.lr,
            decay: t.decay,
            log_frequency: t.log_frequency,
            loss: CompositeLoss {
                lambda: t.lambda,
                beta: t.beta,
                k1: t.k1,
                k2: t.k2,
            },
        }
    }

    /// Network widths for `input_dim` inputs (time included) and `output_dim` modes.
    pub fn network_shape(&self, input_dim: usize, output_dim: usize) -> NetworkShape {
        NetworkShape {
            input_dim,
            output_dim,
            h_layers: self.network.h_layers.clone(),
            h_layers_t: self
                .field
                .n_t
                .and(self.network.h_layers_t.clone()),
        }
    }
}

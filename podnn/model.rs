//! # POD-NN Model
//!
//! [`PodnnModel`] owns the complete fitted state: the POD basis, the input and
//! output normalizers and the trained surrogate, together with the
//! hyperparameter record that produced them. Each piece is created by one
//! stage and read-only afterwards:
//!
//! 1. [`PodnnModel::convert_dataset`] splits the snapshots and fits the basis.
//! 2. [`PodnnModel::train`] fits the normalizers and the surrogate.
//! 3. [`PodnnModel::predict`] and friends read the state to produce fields.
//!
//! ## On-disk layout
//!
//! A saved model is a directory holding `hyperparams.toml` (the record) and
//! `model.toml` (format version, a copy of the record, layout, basis,
//! normalizers, surrogate). Both are written to temporaries and renamed into
//! place. Loading requires the two records to be identical, so a directory
//! left half-written by an interrupted save is rejected, and then checks the
//! stored arrays against each other before anything is returned.
//!
//! ## Dataset cache
//!
//! [`PodnnModel::save_dataset_cache`] stores the reduced tensors with the
//! fitted basis. [`PodnnModel::convert_dataset_cached`] restores both, so a
//! model can be retrained or re-evaluated without the raw snapshots.

use crate::config::{ConfigError, Hyperparameters};
use crate::dataset::{DatasetCache, DatasetError, ReducedDataset, SnapshotDataset};
use crate::layout::{FieldLayout, LayoutError};
use crate::metrics::{MetricsError, mse, relative_error, relative_error_mean_std, sample_mean_std};
use crate::normalize::Normalizer;
use crate::pod::PodBasis;
use crate::predictor::{
    Predictor, PredictorError, SigmaPropagation, generate_hifi_inputs,
    generate_hifi_inputs_with_time,
};
use crate::progress::{PipelineStage, ProgressObserver};
use crate::surrogate::{Surrogate, SurrogateError, SurrogateRegressor};
use crate::trainer::{Trainer, TrainingError, TrainingReport};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, array};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Version tag written into `model.toml`.
pub const FORMAT_VERSION: u32 = 1;

const HYPERPARAMS_FILE: &str = "hyperparams.toml";
const MODEL_FILE: &str = "model.toml";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No POD basis has been fitted; call convert_dataset first.")]
    BasisNotFitted,

    #[error("The surrogate has not been trained.")]
    NotTrained,

    #[error("Model files were written with format version {found}, expected {expected}.")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Saved model state is inconsistent: {0}")]
    InconsistentState(String),

    #[error("The hyperparameters have no [hifi] section.")]
    MissingHifiSection,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Surrogate(#[from] SurrogateError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedState {
    input_norm: Normalizer,
    output_norm: Normalizer,
    surrogate: Surrogate,
}

/// Contents of `model.toml`.
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    format_version: u32,
    sigma_propagation: SigmaPropagation,
    layout: FieldLayout,
    hyperparameters: Hyperparameters,
    basis: PodBasis,
    input_norm: Normalizer,
    output_norm: Normalizer,
    surrogate: Surrogate,
}

/// Errors of predicted fields against reference fields over a set of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Relative error of the sample-mean field.
    pub err_mean: f64,
    /// Relative error of the sample-std field; NaN when the reference has no spread.
    pub err_std: f64,
    /// Relative error over all samples at once.
    pub relative_error: f64,
    pub mse: f64,
}

/// `(err_mean, err_std)` of flat fields `[field_dim, n_columns]`, with the
/// statistics taken over parameter samples (per time step when the layout is
/// time-dependent).
fn mean_std_errors<E>(
    layout: &FieldLayout,
    reference: ArrayView2<f64>,
    prediction: ArrayView2<f64>,
) -> Result<(f64, f64), E>
where
    E: From<LayoutError> + From<MetricsError>,
{
    let reference = layout.restruct(reference, false)?;
    let prediction = layout.restruct(prediction, false)?;
    Ok(relative_error_mean_std(reference.view(), prediction.view())?)
}

/// Aggregated statistics of a hifi prediction run, each shaped like a single
/// structured field (`restruct` with `no_s`).
#[derive(Debug, Clone)]
pub struct HifiPrediction {
    /// Sampled parameter inputs, one row per evaluation.
    pub inputs: Array2<f64>,
    /// Sample mean of the predicted mean fields.
    pub mean: ArrayD<f64>,
    /// Sample standard deviation of the predicted mean fields.
    pub std: ArrayD<f64>,
    /// Sample mean of the predicted spread fields.
    pub sigma: ArrayD<f64>,
}

#[derive(Debug)]
pub struct PodnnModel {
    hp: Hyperparameters,
    layout: FieldLayout,
    basis: Option<PodBasis>,
    trained: Option<TrainedState>,
}

impl PodnnModel {
    pub fn new(hp: Hyperparameters) -> Result<Self, ModelError> {
        hp.validate()?;
        let layout = hp.layout()?;
        Ok(Self {
            hp,
            layout,
            basis: None,
            trained: None,
        })
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hp
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn basis(&self) -> Option<&PodBasis> {
        self.basis.as_ref()
    }

    pub fn surrogate(&self) -> Option<&Surrogate> {
        self.trained.as_ref().map(|state| &state.surrogate)
    }

    pub fn is_trained(&self) -> bool {
        self.basis.is_some() && self.trained.is_some()
    }

    /// Splits `dataset`, fits the POD basis on its training part and returns
    /// the reduced tensors. Any previously trained surrogate is discarded.
    pub fn convert_dataset(
        &mut self,
        dataset: &SnapshotDataset,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ReducedDataset, ModelError> {
        if dataset.layout() != &self.layout {
            return Err(ModelError::InconsistentState(format!(
                "dataset layout {:?} differs from the configured layout {:?}",
                dataset.layout(),
                self.layout
            )));
        }
        if let Some(expected) = self.hp.dataset.n_s {
            if expected != dataset.n_samples() {
                log::warn!(
                    "Configured n_s = {} but the dataset holds {} samples.",
                    expected,
                    dataset.n_samples()
                );
            }
        }

        observer.on_stage_start(PipelineStage::BasisFit, 1);
        let built = dataset.build(&self.hp.build_options()?, &self.hp.truncation_policy());
        observer.on_stage_finish(PipelineStage::BasisFit);
        let (basis, reduced) = built?;

        self.basis = Some(basis);
        self.trained = None;
        Ok(reduced)
    }

    /// Writes `data` together with the fitted basis.
    pub fn save_dataset_cache(&self, data: &ReducedDataset, path: &Path) -> Result<(), ModelError> {
        let basis = self.basis.as_ref().ok_or(ModelError::BasisNotFitted)?;
        let cache = DatasetCache {
            layout: self.layout.clone(),
            basis: basis.clone(),
            data: data.clone(),
        };
        cache.save(path)?;
        Ok(())
    }

    /// Reads a dataset cache and checks it against the configured layout.
    pub fn load_dataset_cache(&self, path: &Path) -> Result<DatasetCache, ModelError> {
        let cache = DatasetCache::load(path)?;
        if cache.layout != self.layout {
            return Err(ModelError::InconsistentState(format!(
                "cached dataset layout {:?} differs from the configured layout {:?}",
                cache.layout, self.layout
            )));
        }
        Ok(cache)
    }

    /// Restores the basis and the reduced tensors from a dataset cache in
    /// place of [`PodnnModel::convert_dataset`]. Any previously trained
    /// surrogate is discarded.
    pub fn convert_dataset_cached(&mut self, path: &Path) -> Result<ReducedDataset, ModelError> {
        let cache = self.load_dataset_cache(path)?;
        log::info!(
            "Restored a {}-mode basis (relative truncation error {:.3e}) from {}.",
            cache.basis.n_modes(),
            cache.basis.truncation_error(),
            path.display()
        );
        self.basis = Some(cache.basis);
        self.trained = None;
        Ok(cache.data)
    }

    /// Fits normalizers on the training split and trains a fresh surrogate.
    ///
    /// Validation reports `[err_mean, err_std]` of the reconstructed validation
    /// fields against `data.u_val`, the same pair [`PodnnModel::evaluate`]
    /// reports (empty when there is no validation split).
    pub fn train(
        &mut self,
        data: &ReducedDataset,
        observer: &mut dyn ProgressObserver,
    ) -> Result<TrainingReport, ModelError> {
        let basis = self.basis.as_ref().ok_or(ModelError::BasisNotFitted)?;
        if data.n_modes() != basis.n_modes() {
            return Err(ModelError::InconsistentState(format!(
                "dataset carries {} modes but the basis has {}",
                data.n_modes(),
                basis.n_modes()
            )));
        }

        let norm = self.hp.network.norm;
        let input_norm = norm.fit(data.x_train.view());
        let output_norm = norm.fit(data.v_train.view());
        let x_train = input_norm.transform(data.x_train.view())?;
        let v_train = output_norm.transform(data.v_train.view())?;

        let shape = self.hp.network_shape(data.x_train.ncols(), basis.n_modes());
        let mut surrogate = Surrogate::new(self.hp.network.uncertainty, shape, self.hp.training.seed)?;
        log::info!(
            "Surrogate {:?} with {} trainable parameters.",
            surrogate.strategy(),
            surrogate.n_parameters()
        );

        let sigma_propagation = self.hp.network.sigma_propagation;
        let layout = &self.layout;
        let has_validation = data.x_val.nrows() > 0;
        let validate = |regressor: &Surrogate| -> Result<Array1<f64>, TrainingError> {
            if !has_validation {
                return Ok(Array1::zeros(0));
            }
            let predictor = Predictor::new(
                basis,
                &input_norm,
                &output_norm,
                regressor,
                sigma_propagation,
            );
            let u_pred = predictor.predict(data.x_val.view())?;
            let (err_mean, err_std) =
                mean_std_errors::<TrainingError>(layout, data.u_val.view(), u_pred.view())?;
            Ok(array![err_mean, err_std])
        };

        let report = Trainer::new(self.hp.training_config(), observer).train(
            &mut surrogate,
            x_train.view(),
            v_train.view(),
            validate,
        )?;

        self.trained = Some(TrainedState {
            input_norm,
            output_norm,
            surrogate,
        });
        Ok(report)
    }

    /// Read-only view over the fitted state.
    pub fn predictor(&self) -> Result<Predictor<'_, Surrogate>, ModelError> {
        let basis = self.basis.as_ref().ok_or(ModelError::BasisNotFitted)?;
        let state = self.trained.as_ref().ok_or(ModelError::NotTrained)?;
        Ok(Predictor::new(
            basis,
            &state.input_norm,
            &state.output_norm,
            &state.surrogate,
            self.hp.network.sigma_propagation,
        ))
    }

    /// Point prediction, `[field_dim, n_rows]`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        Ok(self.predictor()?.predict(x)?)
    }

    /// Mean and spread fields, each `[field_dim, n_rows]`.
    pub fn predict_var(&self, x: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>), ModelError> {
        Ok(self.predictor()?.predict_var(x)?)
    }

    /// Errors of the point prediction at `x` against reference fields `u`
    /// (`[field_dim, n_rows]`).
    pub fn evaluate(&self, x: ArrayView2<f64>, u: ArrayView2<f64>) -> Result<Evaluation, ModelError> {
        let prediction = self.predict(x)?;
        let (err_mean, err_std) = mean_std_errors::<ModelError>(&self.layout, u, prediction.view())?;
        Ok(Evaluation {
            err_mean,
            err_std,
            relative_error: relative_error(u, prediction.view())?,
            mse: mse(u, prediction.view())?,
        })
    }

    pub fn restruct(&self, flat: ArrayView2<f64>, no_s: bool) -> Result<ArrayD<f64>, ModelError> {
        Ok(self.layout.restruct(flat, no_s)?)
    }

    /// Uniform parameter samples from the `[hifi]` box; for time-dependent
    /// fields each sample is expanded over the configured time grid.
    pub fn generate_hifi_inputs(&self, n: usize, seed: u64) -> Result<Array2<f64>, ModelError> {
        let hifi = self.hp.hifi.as_ref().ok_or(ModelError::MissingHifiSection)?;
        let inputs = match (self.layout.n_t, self.hp.time_range()) {
            (Some(n_t), Some(range)) => {
                generate_hifi_inputs_with_time(n, &hifi.mu_min, &hifi.mu_max, range, n_t, seed)?
            }
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "hifi sampling of a time-dependent field needs field.t_min and field.t_max"
                        .into(),
                )
                .into());
            }
            (None, _) => generate_hifi_inputs(n, &hifi.mu_min, &hifi.mu_max, seed)?,
        };
        Ok(inputs)
    }

    /// Predicts `n` (default `hifi.n_s_tst`) random hifi samples in parallel
    /// batches and aggregates them over the sample axis.
    pub fn predict_hifi(
        &self,
        n: Option<usize>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<HifiPrediction, ModelError> {
        let hifi = self.hp.hifi.as_ref().ok_or(ModelError::MissingHifiSection)?;
        let n = n.unwrap_or(hifi.n_s_tst);
        let inputs = self.generate_hifi_inputs(n, hifi.seed)?;
        let predictor = self.predictor()?;

        observer.on_stage_start(PipelineStage::HifiPrediction, inputs.nrows());
        let predicted = predictor.predict_var_batched(inputs.view(), hifi.batch_size);
        observer.on_stage_advance(PipelineStage::HifiPrediction, inputs.nrows());
        observer.on_stage_finish(PipelineStage::HifiPrediction);
        let (u_mean, u_sigma) = predicted?;

        let structured_mean = self.layout.restruct(u_mean.view(), false)?;
        let structured_sigma = self.layout.restruct(u_sigma.view(), false)?;
        let (mean, std) = sample_mean_std(structured_mean.view())?;
        let (sigma, _) = sample_mean_std(structured_sigma.view())?;
        log::info!("Predicted {} hifi samples ({} rows).", n, inputs.nrows());
        Ok(HifiPrediction {
            inputs,
            mean,
            std,
            sigma,
        })
    }

    /// Writes `hyperparams.toml` and `model.toml` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), ModelError> {
        let basis = self.basis.as_ref().ok_or(ModelError::NotTrained)?;
        let state = self.trained.as_ref().ok_or(ModelError::NotTrained)?;
        let file = ModelFile {
            format_version: FORMAT_VERSION,
            sigma_propagation: self.hp.network.sigma_propagation,
            layout: self.layout.clone(),
            hyperparameters: self.hp.clone(),
            basis: basis.clone(),
            input_norm: state.input_norm.clone(),
            output_norm: state.output_norm.clone(),
            surrogate: state.surrogate.clone(),
        };
        let model_toml = toml::to_string_pretty(&file)?;
        let hp_toml = self.hp.to_toml_string()?;

        fs::create_dir_all(dir)?;
        let model_tmp = dir.join(format!(".{MODEL_FILE}.tmp"));
        let hp_tmp = dir.join(format!(".{HYPERPARAMS_FILE}.tmp"));
        fs::write(&model_tmp, model_toml)?;
        fs::write(&hp_tmp, hp_toml)?;
        fs::rename(&model_tmp, dir.join(MODEL_FILE))?;
        fs::rename(&hp_tmp, dir.join(HYPERPARAMS_FILE))?;
        log::info!("Model saved to {}", dir.display());
        Ok(())
    }

    /// Reads a model directory written by [`PodnnModel::save`].
    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        let hp = Hyperparameters::load(&dir.join(HYPERPARAMS_FILE))?;
        let model_toml = fs::read_to_string(dir.join(MODEL_FILE))?;
        let file: ModelFile = toml::from_str(&model_toml)?;
        if file.format_version != FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: file.format_version,
                expected: FORMAT_VERSION,
            });
        }

        let layout = hp.layout()?;
        check_consistency(&hp, &layout, &file)?;

        log::info!(
            "Model loaded from {} ({} modes, {} inputs).",
            dir.display(),
            file.basis.n_modes(),
            file.surrogate.input_dim()
        );
        Ok(Self {
            hp,
            layout,
            basis: Some(file.basis),
            trained: Some(TrainedState {
                input_norm: file.input_norm,
                output_norm: file.output_norm,
                surrogate: file.surrogate,
            }),
        })
    }
}

fn check_consistency(
    hp: &Hyperparameters,
    layout: &FieldLayout,
    file: &ModelFile,
) -> Result<(), ModelError> {
    let mismatch = |what: String| Err(ModelError::InconsistentState(what));

    if &file.hyperparameters != hp {
        return mismatch(format!(
            "{HYPERPARAMS_FILE} differs from the record saved in {MODEL_FILE}"
        ));
    }
    if let Err(e) = file.surrogate.check_parameters() {
        return mismatch(format!("stored surrogate: {e}"));
    }
    if !file.input_norm.is_well_formed() || !file.output_norm.is_well_formed() {
        return mismatch("stored normalizer statistics have different lengths".to_string());
    }
    if &file.layout != layout {
        return mismatch(format!(
            "stored layout {:?} differs from hyperparameter layout {:?}",
            file.layout, layout
        ));
    }
    if file.basis.field_dim() != layout.field_dim() {
        return mismatch(format!(
            "basis has {} rows, layout expects {}",
            file.basis.field_dim(),
            layout.field_dim()
        ));
    }
    let n_modes = file.basis.n_modes();
    if file.surrogate.output_dim() != n_modes || file.output_norm.dim() != n_modes {
        return mismatch(format!(
            "basis has {} modes, surrogate predicts {}, output normalizer covers {}",
            n_modes,
            file.surrogate.output_dim(),
            file.output_norm.dim()
        ));
    }
    if file.input_norm.dim() != file.surrogate.input_dim() {
        return mismatch(format!(
            "input normalizer covers {} features, surrogate expects {}",
            file.input_norm.dim(),
            file.surrogate.input_dim()
        ));
    }
    if file.input_norm.mode() != hp.network.norm || file.output_norm.mode() != hp.network.norm {
        return mismatch(format!(
            "stored normalizers do not use the configured mode {:?}",
            hp.network.norm
        ));
    }
    if file.surrogate.strategy() != hp.network.uncertainty {
        return mismatch(format!(
            "stored surrogate is {:?}, hyperparameters request {:?}",
            file.surrogate.strategy(),
            hp.network.uncertainty
        ));
    }
    if file.sigma_propagation != hp.network.sigma_propagation {
        return mismatch(format!(
            "stored sigma propagation {:?} differs from configured {:?}",
            file.sigma_propagation, hp.network.sigma_propagation
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::test_fixtures::{sinusoid_dataset, time_dependent_dataset};

    fn hyperparameters(n_points: usize, n_t: Option<usize>) -> Hyperparameters {
        let time = match n_t {
            Some(n_t) => format!("n_t = {n_t}\nt_min = 0.0\nt_max = 1.0\n"),
            None => String::new(),
        };
        let branch = if n_t.is_some() { "h_layers_t = [4]\n" } else { "" };
        Hyperparameters::from_toml_str(&format!(
            r#"
[field]
n_v = 1
mesh_shape = [{n_points}]
{time}
[pod]
n_l = 2

[dataset]
train_val = [0.6, 0.2, 0.2]
seed = 3

[network]
h_layers = [6]
{branch}
[training]
epochs = 30
lr = 0.01
lambda = 1.0
k1 = 0.1
k2 = 0.1
log_frequency = 10

[hifi]
n_s_tst = 7
mu_min = [1.0]
mu_max = [2.0]
batch_size = 3
"#
        ))
        .unwrap()
    }

    #[test]
    fn stages_must_run_in_order() {
        let mut model = PodnnModel::new(hyperparameters(8, None)).unwrap();
        let x = Array2::<f64>::zeros((2, 1));
        assert!(matches!(model.predict(x.view()), Err(ModelError::BasisNotFitted)));

        let dataset = sinusoid_dataset(20, 8, 1);
        let reduced = model.convert_dataset(&dataset, &mut NoopProgress).unwrap();
        assert!(matches!(model.predict(x.view()), Err(ModelError::NotTrained)));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(model.save(dir.path()), Err(ModelError::NotTrained)));

        let report = model.train(&reduced, &mut NoopProgress).unwrap();
        assert_eq!(report.losses.len(), 30);
        assert_eq!(report.history.len(), 3 + 1);
        assert!(report.history.iter().all(|r| r.validation.len() == 2));
        assert!(model.is_trained());
        assert_eq!(model.predict(x.view()).unwrap().dim(), (8, 2));
    }

    #[test]
    fn single_validation_sample_records_an_undefined_std_error() {
        let mut model = PodnnModel::new(hyperparameters(8, None)).unwrap();
        let dataset = sinusoid_dataset(5, 8, 2);
        let reduced = model.convert_dataset(&dataset, &mut NoopProgress).unwrap();
        assert_eq!(reduced.x_val.nrows(), 1);

        let report = model.train(&reduced, &mut NoopProgress).unwrap();
        let last = report.history.last().unwrap();
        assert!(last.validation[0].is_finite());
        assert!(last.validation[1].is_nan());

        let evaluation = model
            .evaluate(reduced.x_val.view(), reduced.u_val.view())
            .unwrap();
        assert_eq!(evaluation.err_mean, last.validation[0]);
        assert!(evaluation.err_std.is_nan());
    }

    #[test]
    fn dataset_layout_must_match_configuration() {
        let mut model = PodnnModel::new(hyperparameters(8, None)).unwrap();
        let dataset = sinusoid_dataset(10, 9, 1);
        assert!(matches!(
            model.convert_dataset(&dataset, &mut NoopProgress),
            Err(ModelError::InconsistentState(_))
        ));
    }

    #[test]
    fn time_dependent_pipeline_uses_both_branches() {
        let mut model = PodnnModel::new(hyperparameters(6, Some(4))).unwrap();
        let dataset = time_dependent_dataset(10, 6, 4, 2);
        let reduced = model.convert_dataset(&dataset, &mut NoopProgress).unwrap();
        model.train(&reduced, &mut NoopProgress).unwrap();
        match model.surrogate().unwrap() {
            Surrogate::VarianceHead(single) => {
                assert_eq!(single.network().shape().h_layers_t, Some(vec![4]));
            }
            other => panic!("unexpected surrogate {other:?}"),
        }

        let inputs = model.generate_hifi_inputs(3, 0).unwrap();
        assert_eq!(inputs.dim(), (12, 2));

        let hifi = model.predict_hifi(None, &mut NoopProgress).unwrap();
        assert_eq!(hifi.inputs.nrows(), 7 * 4);
        assert_eq!(hifi.mean.shape(), &[1, 6, 4]);
        assert_eq!(hifi.std.shape(), &[1, 6, 4]);
        assert_eq!(hifi.sigma.shape(), &[1, 6, 4]);
    }

    #[test]
    fn hifi_requires_its_section() {
        let mut hp = hyperparameters(8, None);
        hp.hifi = None;
        let model = PodnnModel::new(hp).unwrap();
        assert!(matches!(
            model.generate_hifi_inputs(3, 0),
            Err(ModelError::MissingHifiSection)
        ));
    }
}

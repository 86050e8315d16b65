//! # Snapshot Dataset
//!
//! Owns the raw snapshot matrix `U` (`[field_dim, n_columns]`) and the
//! parameter matrix `X` (`[n_columns, n_inputs]`), paired column-to-row.
//!
//! Splitting is done per *parameter sample*: for time-dependent data one sample
//! owns `n_t` consecutive columns of `U` and the matching `n_t` rows of `X`, and
//! they always move together. The POD basis is fitted on the training
//! partition only; validation and test snapshots stay in physical space so that
//! reconstruction error can be measured against ground truth.

use crate::layout::{FieldLayout, LayoutError};
use crate::pod::{PodBasis, PodError, TruncationPolicy};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tolerance on the sum of a full (train, val, test) ratio triple.
const SPLIT_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Parameter matrix has {params_rows} rows but the snapshot matrix has {snapshot_cols} columns.")]
    ShapeMismatch {
        params_rows: usize,
        snapshot_cols: usize,
    },

    #[error("Invalid train/val/test split: {0}")]
    InvalidSplit(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Pod(#[from] PodError),

    #[error("Failed to read or write the dataset cache: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse the dataset cache: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize the dataset cache: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Dataset cache is inconsistent: {0}")]
    InvalidCache(String),
}

/// Fractions of parameter samples assigned to each partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitRatios {
    /// Accepts `[train, val, test]` summing to 1, or `[train, val]` summing to
    /// at most 1 with the remainder reserved for test.
    pub fn from_slice(ratios: &[f64]) -> Result<Self, DatasetError> {
        if ratios.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(DatasetError::InvalidSplit(format!(
                "ratios must be non-negative numbers, got {ratios:?}"
            )));
        }
        let split = match *ratios {
            [train, val, test] => {
                let total = train + val + test;
                if (total - 1.0).abs() > SPLIT_TOLERANCE {
                    return Err(DatasetError::InvalidSplit(format!(
                        "ratios {ratios:?} sum to {total}, expected 1"
                    )));
                }
                Self { train, val, test }
            }
            [train, val] => {
                let total = train + val;
                if total > 1.0 + SPLIT_TOLERANCE {
                    return Err(DatasetError::InvalidSplit(format!(
                        "ratios {ratios:?} sum to {total}, expected at most 1"
                    )));
                }
                Self {
                    train,
                    val,
                    test: (1.0 - total).max(0.0),
                }
            }
            _ => {
                return Err(DatasetError::InvalidSplit(format!(
                    "expected 2 or 3 ratios, got {}",
                    ratios.len()
                )));
            }
        };
        if split.train <= 0.0 {
            return Err(DatasetError::InvalidSplit(
                "the training ratio must be positive".into(),
            ));
        }
        Ok(split)
    }

    /// Partition sizes for `n` samples: `round(train·n)`, `round(val·n)`,
    /// remainder to test.
    pub fn counts(&self, n: usize) -> (usize, usize, usize) {
        let n_train = ((self.train * n as f64).round() as usize).min(n);
        let n_val = ((self.val * n as f64).round() as usize).min(n - n_train);
        (n_train, n_val, n - n_train - n_val)
    }
}

/// Sample indices of each partition, in shuffled order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

/// Options controlling [`SnapshotDataset::build`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    pub ratios: SplitRatios,
    /// Relative Gaussian perturbation of training parameters.
    pub x_noise: f64,
    pub seed: u64,
}

/// Reduced training/validation tensors plus physical-space held-out snapshots.
///
/// Coefficient matrices are row-per-sample, `[n_rows, n_modes]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedDataset {
    pub x_train: Array2<f64>,
    pub v_train: Array2<f64>,
    pub x_val: Array2<f64>,
    pub v_val: Array2<f64>,
    pub u_val: Array2<f64>,
    pub x_test: Array2<f64>,
    pub u_test: Array2<f64>,
    pub indices: SplitIndices,
}

impl ReducedDataset {
    pub fn n_modes(&self) -> usize {
        self.v_train.ncols()
    }
}

/// A built dataset stored with the basis that reduced it, so a model can be
/// retrained or re-evaluated without the raw snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetCache {
    pub layout: FieldLayout,
    pub basis: PodBasis,
    pub data: ReducedDataset,
}

impl DatasetCache {
    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        self.check()?;
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        log::info!("Dataset cache written to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let toml_string = fs::read_to_string(path)?;
        let cache: Self = toml::from_str(&toml_string)?;
        cache.check()?;
        log::info!(
            "Dataset cache loaded from {} ({} train / {} val / {} test samples, {} modes).",
            path.display(),
            cache.data.indices.train.len(),
            cache.data.indices.val.len(),
            cache.data.indices.test.len(),
            cache.basis.n_modes()
        );
        Ok(cache)
    }

    fn check(&self) -> Result<(), DatasetError> {
        self.layout.validate()?;
        let field_dim = self.layout.field_dim();
        let n_modes = self.basis.n_modes();
        let data = &self.data;
        let invalid = |what: String| Err(DatasetError::InvalidCache(what));

        if self.basis.field_dim() != field_dim {
            return invalid(format!(
                "basis has {} rows, layout expects {field_dim}",
                self.basis.field_dim()
            ));
        }
        if data.v_train.ncols() != n_modes || data.v_val.ncols() != n_modes {
            return invalid(format!(
                "coefficients carry {} / {} modes, basis has {n_modes}",
                data.v_train.ncols(),
                data.v_val.ncols()
            ));
        }
        if data.u_val.nrows() != field_dim || data.u_test.nrows() != field_dim {
            return invalid(format!(
                "held-out snapshots have {} / {} rows, layout expects {field_dim}",
                data.u_val.nrows(),
                data.u_test.nrows()
            ));
        }
        let pairs = [
            ("train", data.x_train.nrows(), data.v_train.nrows()),
            ("val", data.x_val.nrows(), data.v_val.nrows()),
            ("val", data.x_val.nrows(), data.u_val.ncols()),
            ("test", data.x_test.nrows(), data.u_test.ncols()),
        ];
        if let Some((split, params, targets)) = pairs.iter().find(|(_, a, b)| a != b) {
            return invalid(format!(
                "{split} split pairs {params} parameter rows with {targets} targets"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotDataset {
    layout: FieldLayout,
    x: Array2<f64>,
    u: Array2<f64>,
}

impl SnapshotDataset {
    pub fn new(layout: FieldLayout, x: Array2<f64>, u: Array2<f64>) -> Result<Self, DatasetError> {
        layout.validate()?;
        if u.nrows() != layout.field_dim() {
            return Err(LayoutError::ShapeMismatch {
                expected: format!("{} snapshot rows", layout.field_dim()),
                found: format!("{} rows", u.nrows()),
            }
            .into());
        }
        if x.nrows() != u.ncols() {
            return Err(DatasetError::ShapeMismatch {
                params_rows: x.nrows(),
                snapshot_cols: u.ncols(),
            });
        }
        layout.samples_in(u.ncols())?;
        Ok(Self { layout, x, u })
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn n_samples(&self) -> usize {
        self.u.ncols() / self.layout.columns_per_sample()
    }

    pub fn n_inputs(&self) -> usize {
        self.x.ncols()
    }

    pub fn snapshots(&self) -> ArrayView2<'_, f64> {
        self.u.view()
    }

    pub fn params(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    /// Seeded shuffle of sample indices into the three partitions.
    pub fn split(&self, ratios: &SplitRatios, seed: u64) -> Result<SplitIndices, DatasetError> {
        let n = self.n_samples();
        let (n_train, n_val, _) = ratios.counts(n);
        if n_train == 0 {
            return Err(DatasetError::InvalidSplit(format!(
                "training ratio {} leaves no training sample out of {n}",
                ratios.train
            )));
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let test = order.split_off(n_train + n_val);
        let val = order.split_off(n_train);
        Ok(SplitIndices {
            train: order,
            val,
            test,
        })
    }

    /// Column (of `U`) / row (of `X`) positions owned by `samples`.
    fn positions(&self, samples: &[usize]) -> Vec<usize> {
        let per_sample = self.layout.columns_per_sample();
        samples
            .iter()
            .flat_map(|&s| s * per_sample..(s + 1) * per_sample)
            .collect()
    }

    fn gather(&self, samples: &[usize]) -> (Array2<f64>, Array2<f64>) {
        let positions = self.positions(samples);
        (
            self.x.select(Axis(0), &positions),
            self.u.select(Axis(1), &positions),
        )
    }

    /// Splits, fits the basis on the training snapshots and reduces.
    pub fn build(
        &self,
        options: &BuildOptions,
        policy: &TruncationPolicy,
    ) -> Result<(PodBasis, ReducedDataset), DatasetError> {
        let indices = self.split(&options.ratios, options.seed)?;
        log::info!(
            "Split {} samples into {} train / {} val / {} test.",
            self.n_samples(),
            indices.train.len(),
            indices.val.len(),
            indices.test.len()
        );

        let (mut x_train, u_train) = self.gather(&indices.train);
        let (x_val, u_val) = self.gather(&indices.val);
        let (x_test, u_test) = self.gather(&indices.test);

        let basis = PodBasis::fit(u_train.view(), policy)?;
        let v_train = basis.reduce(u_train.view())?.reversed_axes();
        let v_val = basis.reduce(u_val.view())?.reversed_axes();

        if options.x_noise > 0.0 {
            let skip_time = usize::from(self.layout.is_time_dependent());
            perturb_columns(&mut x_train, skip_time, options.x_noise, options.seed);
        }

        Ok((
            basis,
            ReducedDataset {
                x_train,
                v_train,
                x_val,
                v_val,
                u_val,
                x_test,
                u_test,
                indices,
            },
        ))
    }
}

/// Adds `noise · std(column) · N(0, 1)` to every column from `first_column` on.
fn perturb_columns(x: &mut Array2<f64>, first_column: usize, noise: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    for mut column in x.columns_mut().into_iter().skip(first_column) {
        let scale = noise * column.std(0.0);
        column.mapv_inplace(|v| v + scale * rng.sample::<f64, _>(StandardNormal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{sinusoid_dataset, time_dependent_dataset};
    use approx::assert_abs_diff_eq;
    use std::collections::HashSet;

    fn options(ratios: &[f64]) -> BuildOptions {
        BuildOptions {
            ratios: SplitRatios::from_slice(ratios).unwrap(),
            x_noise: 0.0,
            seed: 17,
        }
    }

    #[test]
    fn split_60_20_20_is_exact_and_disjoint() {
        let dataset = sinusoid_dataset(100, 16, 1);
        let split = dataset
            .split(&SplitRatios::from_slice(&[0.6, 0.2, 0.2]).unwrap(), 3)
            .unwrap();
        assert_eq!(split.train.len(), 60);
        assert_eq!(split.val.len(), 20);
        assert_eq!(split.test.len(), 20);
        let all: HashSet<usize> = split
            .train
            .iter()
            .chain(&split.val)
            .chain(&split.test)
            .copied()
            .collect();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn split_is_deterministic_per_seed() {
        let dataset = sinusoid_dataset(30, 8, 2);
        let ratios = SplitRatios::from_slice(&[0.5, 0.3]).unwrap();
        assert_eq!(dataset.split(&ratios, 5).unwrap(), dataset.split(&ratios, 5).unwrap());
        assert_ne!(dataset.split(&ratios, 5).unwrap(), dataset.split(&ratios, 6).unwrap());
    }

    #[test]
    fn ratio_validation() {
        assert!(matches!(
            SplitRatios::from_slice(&[0.6, 0.2, 0.3]),
            Err(DatasetError::InvalidSplit(_))
        ));
        assert!(SplitRatios::from_slice(&[0.8, 0.3]).is_err());
        assert!(SplitRatios::from_slice(&[0.5]).is_err());
        assert!(SplitRatios::from_slice(&[0.0, 0.5, 0.5]).is_err());
        let pair = SplitRatios::from_slice(&[0.7, 0.2]).unwrap();
        assert_abs_diff_eq!(pair.test, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn params_and_snapshots_must_pair_up() {
        let layout = FieldLayout::new(1, vec![4], None).unwrap();
        let result = SnapshotDataset::new(layout, Array2::zeros((5, 1)), Array2::zeros((4, 6)));
        assert!(matches!(
            result,
            Err(DatasetError::ShapeMismatch {
                params_rows: 5,
                snapshot_cols: 6
            })
        ));
    }

    #[test]
    fn pairing_survives_the_shuffle() {
        let dataset = sinusoid_dataset(40, 12, 4);
        let (basis, reduced) = dataset
            .build(&options(&[0.6, 0.2, 0.2]), &TruncationPolicy::fixed(1))
            .unwrap();
        for (row, &sample) in reduced.indices.val.iter().enumerate() {
            assert_eq!(reduced.x_val[[row, 0]], dataset.params()[[sample, 0]]);
            assert_eq!(reduced.u_val.column(row), dataset.snapshots().column(sample));
        }
        assert_eq!(reduced.v_train.dim(), (24, basis.n_modes()));
        assert_eq!(reduced.v_val.dim(), (8, 1));
        assert_eq!(reduced.u_test.ncols(), 8);
    }

    #[test]
    fn time_dependent_samples_move_as_blocks() {
        let dataset = time_dependent_dataset(10, 6, 5, 7);
        let split = dataset
            .split(&SplitRatios::from_slice(&[0.6, 0.2, 0.2]).unwrap(), 1)
            .unwrap();
        let (x, u) = dataset.gather(&split.val);
        assert_eq!(x.nrows(), 2 * 5);
        assert_eq!(u.ncols(), 2 * 5);
        let first = split.val[0];
        for t in 0..5 {
            assert_eq!(x.row(t), dataset.params().row(first * 5 + t));
        }
    }

    #[test]
    fn noise_perturbs_training_parameters_only() {
        let dataset = time_dependent_dataset(10, 6, 4, 3);
        let mut noisy = options(&[0.6, 0.2, 0.2]);
        noisy.x_noise = 0.1;
        let (_, clean) = dataset
            .build(&options(&[0.6, 0.2, 0.2]), &TruncationPolicy::fixed(2))
            .unwrap();
        let (_, perturbed) = dataset.build(&noisy, &TruncationPolicy::fixed(2)).unwrap();
        // Time column untouched, parameter column moved.
        assert_eq!(clean.x_train.column(0), perturbed.x_train.column(0));
        assert_ne!(clean.x_train.column(1), perturbed.x_train.column(1));
        assert_eq!(clean.x_val, perturbed.x_val);
        assert_eq!(clean.u_val, perturbed.u_val);
        // Targets are reduced from the clean training snapshots.
        assert_eq!(clean.v_train, perturbed.v_train);
    }

    #[test]
    fn cache_keeps_the_basis_with_the_tensors() {
        let dataset = sinusoid_dataset(12, 6, 8);
        let (basis, reduced) = dataset
            .build(&options(&[0.5, 0.25, 0.25]), &TruncationPolicy::fixed(1))
            .unwrap();
        let cache = DatasetCache {
            layout: dataset.layout().clone(),
            basis,
            data: reduced,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.toml");
        cache.save(&path).unwrap();

        let loaded = DatasetCache::load(&path).unwrap();
        assert_eq!(loaded.layout, cache.layout);
        assert_eq!(loaded.data.indices, cache.data.indices);
        assert_eq!(loaded.basis.n_modes(), 1);
        for (a, b) in loaded.data.v_train.iter().zip(cache.data.v_train.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        let restored = loaded.basis.reconstruct(loaded.data.v_val.t()).unwrap();
        let original = cache.basis.reconstruct(cache.data.v_val.t()).unwrap();
        for (a, b) in restored.iter().zip(original.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn cache_with_a_foreign_basis_is_rejected() {
        let dataset = sinusoid_dataset(12, 6, 8);
        let (_, reduced) = dataset
            .build(&options(&[0.5, 0.25, 0.25]), &TruncationPolicy::fixed(1))
            .unwrap();
        let (wider, _) = dataset
            .build(&options(&[0.5, 0.25, 0.25]), &TruncationPolicy::fixed(3))
            .unwrap();
        let cache = DatasetCache {
            layout: dataset.layout().clone(),
            basis: wider,
            data: reduced,
        };
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            cache.save(&dir.path().join("dataset.toml")),
            Err(DatasetError::InvalidCache(_))
        ));
    }
}

//! # Proper Orthogonal Decomposition
//!
//! Fits the reduced basis `V` from training snapshots and maps fields between
//! physical space and coefficient space. The basis holds the dominant left
//! singular vectors of the (uncentered) snapshot matrix; how many are kept is
//! decided by a [`TruncationPolicy`].
//!
//! Reconstruction is a single product with `V`. `reconstruct(reduce(U))` is an
//! orthogonal projection: lossy for general `U`, idempotent once applied.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use ndarray_linalg::{JobSvd, SVDDC};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PodError {
    #[error("Snapshot matrix is empty ({rows} x {cols}).")]
    EmptySnapshots { rows: usize, cols: usize },

    #[error("Snapshot matrix contains NaN or infinite values.")]
    NonFiniteSnapshots,

    #[error("Truncation setting '{name}' is invalid: {value}.")]
    InvalidTolerance { name: &'static str, value: f64 },

    #[error("The mode cap n_L must be positive when given.")]
    ZeroModeCap,

    #[error("Expected {expected} rows for this basis, found {found}.")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("Singular value decomposition failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("The SVD routine returned no left singular vectors.")]
    MissingSingularVectors,
}

/// Rule deciding how many modes the basis keeps.
///
/// Tolerances are relative projection errors on the training snapshots:
/// keeping `n` modes leaves `sqrt(sum(λ[n..]) / sum(λ))` of the Frobenius norm
/// unexplained, with `λ_i = σ_i²`.
///
/// This is the square root of the discarded energy fraction, not the fraction
/// itself. An energy-ratio tolerance `e` (unexplained variance `≤ e`)
/// corresponds to `eps = sqrt(e)`; `eps = 1e-3` keeps modes until at most
/// `1e-6` of the energy is left out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncationPolicy {
    /// Final energy tolerance. `0` disables the refinement stage.
    pub eps: f64,
    /// Optional coarse tolerance applied first to set the mode cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps_init: Option<f64>,
    /// Upper bound on the number of modes. `None` means rank-limited only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_l_max: Option<usize>,
}

impl TruncationPolicy {
    /// Keeps exactly `n_l` modes (or the rank, if smaller).
    pub fn fixed(n_l: usize) -> Self {
        Self {
            eps: 0.0,
            eps_init: None,
            n_l_max: Some(n_l),
        }
    }

    pub fn validate(&self) -> Result<(), PodError> {
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(PodError::InvalidTolerance {
                name: "eps",
                value: self.eps,
            });
        }
        if let Some(eps_init) = self.eps_init {
            if !eps_init.is_finite() || eps_init < 0.0 {
                return Err(PodError::InvalidTolerance {
                    name: "eps_init",
                    value: eps_init,
                });
            }
        }
        if self.n_l_max == Some(0) {
            return Err(PodError::ZeroModeCap);
        }
        Ok(())
    }

    /// Applies the two-stage rule to a descending list of mode energies.
    pub fn select_mode_count(&self, energies: ArrayView1<f64>) -> usize {
        let rank = energies.len();
        if rank == 0 {
            return 0;
        }
        let errors = truncation_errors(energies);
        let smallest_within = |tol: f64| (1..=rank).find(|&n| errors[n] <= tol).unwrap_or(rank);

        let mut cap = self.n_l_max.map_or(rank, |n| n.min(rank));
        if let Some(eps_init) = self.eps_init {
            cap = cap.min(smallest_within(eps_init));
        }
        let n_modes = if self.eps > 0.0 {
            cap.min(smallest_within(self.eps))
        } else {
            cap
        };
        n_modes.max(1)
    }
}

/// `errors[n]` is the relative projection error when keeping `n` modes.
fn truncation_errors(energies: ArrayView1<f64>) -> Vec<f64> {
    let rank = energies.len();
    let mut tails = vec![0.0; rank + 1];
    for n in (0..rank).rev() {
        tails[n] = tails[n + 1] + energies[n];
    }
    let total = tails[0];
    if total <= 0.0 {
        return vec![0.0; rank + 1];
    }
    tails.iter().map(|&tail| (tail / total).max(0.0).sqrt()).collect()
}

/// A fitted POD basis. Immutable after [`PodBasis::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodBasis {
    /// Orthonormal columns, shape `[field_dim, n_modes]`.
    basis: Array2<f64>,
    /// All singular values of the training snapshots, descending.
    singular_values: Array1<f64>,
}

impl PodBasis {
    /// Computes the basis of the training snapshots `[field_dim, n_samples]`.
    pub fn fit(snapshots: ArrayView2<f64>, policy: &TruncationPolicy) -> Result<Self, PodError> {
        policy.validate()?;
        let (rows, cols) = snapshots.dim();
        if rows == 0 || cols == 0 {
            return Err(PodError::EmptySnapshots { rows, cols });
        }
        if snapshots.iter().any(|v| !v.is_finite()) {
            return Err(PodError::NonFiniteSnapshots);
        }

        let owned = snapshots.to_owned();
        let (left, singular_values, _) = owned.svddc(JobSvd::Some)?;
        let left = left.ok_or(PodError::MissingSingularVectors)?;

        let energies = singular_values.mapv(|s| s * s);
        let n_modes = policy.select_mode_count(energies.view());
        if energies.sum() <= 0.0 {
            log::warn!("Snapshot matrix is identically zero; keeping a single arbitrary mode.");
        }

        let basis = left.slice(s![.., ..n_modes]).to_owned();
        let fitted = Self {
            basis,
            singular_values,
        };
        log::info!(
            "POD basis: {} of {} modes kept for {} x {} snapshots (relative truncation error {:.3e}).",
            n_modes,
            fitted.singular_values.len(),
            rows,
            cols,
            fitted.truncation_error()
        );
        Ok(fitted)
    }

    pub fn n_modes(&self) -> usize {
        self.basis.ncols()
    }

    pub fn field_dim(&self) -> usize {
        self.basis.nrows()
    }

    pub fn basis(&self) -> ArrayView2<'_, f64> {
        self.basis.view()
    }

    pub fn singular_values(&self) -> ArrayView1<'_, f64> {
        self.singular_values.view()
    }

    /// Fraction of snapshot energy carried by each singular direction.
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let energies = self.singular_values.mapv(|s| s * s);
        let total = energies.sum();
        if total <= 0.0 {
            return Array1::zeros(energies.len());
        }
        energies / total
    }

    /// Relative projection error of the training snapshots with the kept modes.
    pub fn truncation_error(&self) -> f64 {
        let energies = self.singular_values.mapv(|s| s * s);
        truncation_errors(energies.view())[self.n_modes().min(energies.len())]
    }

    /// Largest entry of `|VᵀV - I|`.
    pub fn orthonormality_defect(&self) -> f64 {
        let gram = self.basis.t().dot(&self.basis);
        gram.indexed_iter()
            .map(|((i, j), &g)| (g - if i == j { 1.0 } else { 0.0 }).abs())
            .fold(0.0, f64::max)
    }

    /// `v = Vᵀ U`, shape `[n_modes, n_samples]`.
    pub fn reduce(&self, snapshots: ArrayView2<f64>) -> Result<Array2<f64>, PodError> {
        if snapshots.nrows() != self.field_dim() {
            return Err(PodError::ShapeMismatch {
                expected: self.field_dim(),
                found: snapshots.nrows(),
            });
        }
        Ok(self.basis.t().dot(&snapshots))
    }

    /// `U = V v`, shape `[field_dim, n_samples]`.
    pub fn reconstruct(&self, coefficients: ArrayView2<f64>) -> Result<Array2<f64>, PodError> {
        if coefficients.nrows() != self.n_modes() {
            return Err(PodError::ShapeMismatch {
                expected: self.n_modes(),
                found: coefficients.nrows(),
            });
        }
        Ok(self.basis.dot(&coefficients))
    }

    /// Orthogonal projection onto the basis span.
    pub fn project(&self, snapshots: ArrayView2<f64>) -> Result<Array2<f64>, PodError> {
        let reduced = self.reduce(snapshots)?;
        self.reconstruct(reduced.view())
    }
}

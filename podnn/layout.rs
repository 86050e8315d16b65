//! Physical-space field layout.
//!
//! Snapshots are stored flat: one column per snapshot, one row per degree of
//! freedom. Row `var * n_points + point` holds variable `var` at mesh point
//! `point`, where `point` runs in C order over `mesh_shape`. For
//! time-dependent fields every parameter sample owns `n_t` consecutive
//! columns, so column `sample * n_t + time` is the field at that time step.

use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Field layout is invalid: {0}")]
    InvalidLayout(&'static str),

    #[error("Expected an array of shape {expected}, found {found}.")]
    ShapeMismatch { expected: String, found: String },

    #[error("Reshaping between flat and structured layouts failed: {0}")]
    Reshape(#[from] ndarray::ShapeError),
}

/// Shape of one high-fidelity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    /// Number of physical variables stacked in one snapshot.
    pub n_v: usize,
    /// Spatial grid shape, or `[n_nodes]` for unstructured meshes.
    pub mesh_shape: Vec<usize>,
    /// Time steps per parameter sample, for time-dependent problems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_t: Option<usize>,
}

impl FieldLayout {
    pub fn new(n_v: usize, mesh_shape: Vec<usize>, n_t: Option<usize>) -> Result<Self, LayoutError> {
        let layout = Self {
            n_v,
            mesh_shape,
            n_t,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.n_v == 0 {
            return Err(LayoutError::InvalidLayout("n_v must be positive"));
        }
        if self.mesh_shape.is_empty() || self.mesh_shape.contains(&0) {
            return Err(LayoutError::InvalidLayout(
                "mesh_shape must be non-empty with positive extents",
            ));
        }
        if self.n_t == Some(0) {
            return Err(LayoutError::InvalidLayout("n_t must be positive when given"));
        }
        Ok(())
    }

    /// Number of mesh points per variable.
    pub fn n_points(&self) -> usize {
        self.mesh_shape.iter().product()
    }

    /// Number of rows of a flat snapshot matrix.
    pub fn field_dim(&self) -> usize {
        self.n_v * self.n_points()
    }

    pub fn is_time_dependent(&self) -> bool {
        self.n_t.is_some()
    }

    /// Columns of U (and rows of X) owned by one parameter sample.
    pub fn columns_per_sample(&self) -> usize {
        self.n_t.unwrap_or(1)
    }

    /// Number of parameter samples represented by `n_columns` snapshot columns.
    pub fn samples_in(&self, n_columns: usize) -> Result<usize, LayoutError> {
        let per_sample = self.columns_per_sample();
        if n_columns % per_sample != 0 {
            return Err(LayoutError::ShapeMismatch {
                expected: format!("a multiple of {per_sample} columns"),
                found: format!("{n_columns} columns"),
            });
        }
        Ok(n_columns / per_sample)
    }

    fn structured_shape(&self, n_s: Option<usize>) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.mesh_shape.len() + 3);
        shape.push(self.n_v);
        shape.extend_from_slice(&self.mesh_shape);
        if let Some(n_t) = self.n_t {
            shape.push(n_t);
        }
        if let Some(n_s) = n_s {
            shape.push(n_s);
        }
        shape
    }

    /// Reshapes flat snapshots into `[n_v, mesh..., (n_t,) n_s]`.
    ///
    /// With `no_s`, the input is a single aggregate (one column, or `n_t`
    /// columns for time-dependent fields) and the trailing sample axis is
    /// dropped.
    pub fn restruct(&self, flat: ArrayView2<f64>, no_s: bool) -> Result<ArrayD<f64>, LayoutError> {
        let field_dim = self.field_dim();
        if flat.nrows() != field_dim {
            return Err(LayoutError::ShapeMismatch {
                expected: format!("{field_dim} rows"),
                found: format!("{} rows", flat.nrows()),
            });
        }
        let per_sample = self.columns_per_sample();
        let n_s = if no_s {
            if flat.ncols() != per_sample {
                return Err(LayoutError::ShapeMismatch {
                    expected: format!("{per_sample} columns for a single aggregate"),
                    found: format!("{} columns", flat.ncols()),
                });
            }
            1
        } else {
            self.samples_in(flat.ncols())?
        };

        let grouped = flat
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((field_dim, n_s, per_sample))?;
        let time_major = grouped.permuted_axes([0, 2, 1]);
        let shape = self.structured_shape((!no_s).then_some(n_s));
        let structured = time_major
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&shape))?;
        Ok(structured)
    }

    /// Inverse of [`FieldLayout::restruct`].
    pub fn flatten(&self, structured: ArrayViewD<f64>, no_s: bool) -> Result<Array2<f64>, LayoutError> {
        let n_s = if no_s {
            1
        } else {
            structured.shape().last().copied().unwrap_or(0)
        };
        let expected = self.structured_shape((!no_s).then_some(n_s));
        if structured.shape() != expected.as_slice() {
            return Err(LayoutError::ShapeMismatch {
                expected: format!("{expected:?}"),
                found: format!("{:?}", structured.shape()),
            });
        }

        let field_dim = self.field_dim();
        let per_sample = self.columns_per_sample();
        let time_major = structured
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((field_dim, per_sample, n_s))?;
        let grouped = time_major.permuted_axes([0, 2, 1]);
        let flat = grouped
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((field_dim, n_s * per_sample))?;
        Ok(flat)
    }
}

//! Error metrics used both for in-training validation and final reporting.
//!
//! The same functions back both paths, so a validation curve and a post-hoc
//! score of the same predictions always agree.

use ndarray::{Array, ArrayView, Axis, Dimension, RemoveAxis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    /// Relative error is undefined when the reference is exactly zero everywhere.
    #[error("Reference field has zero norm; relative error is undefined.")]
    DegenerateReference,

    #[error("Reference has shape {reference:?} but prediction has shape {prediction:?}.")]
    ShapeMismatch {
        reference: Vec<usize>,
        prediction: Vec<usize>,
    },

    #[error("Cannot compute sample statistics over an empty sample axis.")]
    EmptySampleAxis,
}

fn check_shapes<D: Dimension>(
    reference: &ArrayView<f64, D>,
    prediction: &ArrayView<f64, D>,
) -> Result<(), MetricsError> {
    if reference.shape() != prediction.shape() {
        return Err(MetricsError::ShapeMismatch {
            reference: reference.shape().to_vec(),
            prediction: prediction.shape().to_vec(),
        });
    }
    Ok(())
}

/// `‖reference − prediction‖ / ‖reference‖` with Frobenius norms.
pub fn relative_error<D: Dimension>(
    reference: ArrayView<f64, D>,
    prediction: ArrayView<f64, D>,
) -> Result<f64, MetricsError> {
    check_shapes(&reference, &prediction)?;
    let reference_norm = reference.iter().map(|x| x * x).sum::<f64>().sqrt();
    if reference_norm == 0.0 {
        return Err(MetricsError::DegenerateReference);
    }
    let residual_norm = reference
        .iter()
        .zip(prediction.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    Ok(residual_norm / reference_norm)
}

/// Mean squared error over all entries.
pub fn mse<D: Dimension>(
    reference: ArrayView<f64, D>,
    prediction: ArrayView<f64, D>,
) -> Result<f64, MetricsError> {
    check_shapes(&reference, &prediction)?;
    let n = reference.len();
    if n == 0 {
        return Err(MetricsError::EmptySampleAxis);
    }
    let total: f64 = reference
        .iter()
        .zip(prediction.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    Ok(total / n as f64)
}

/// Mean and NaN-skipping population standard deviation over the last axis.
pub fn sample_mean_std<D: RemoveAxis>(
    samples: ArrayView<f64, D>,
) -> Result<(Array<f64, D::Smaller>, Array<f64, D::Smaller>), MetricsError> {
    let ndim = samples.ndim();
    if ndim == 0 || samples.shape()[ndim - 1] == 0 {
        return Err(MetricsError::EmptySampleAxis);
    }
    let axis = Axis(ndim - 1);
    let mean = samples
        .mean_axis(axis)
        .ok_or(MetricsError::EmptySampleAxis)?;
    let std = samples.map_axis(axis, |lane| {
        let finite: Vec<f64> = lane.iter().copied().filter(|v| !v.is_nan()).collect();
        if finite.is_empty() {
            return f64::NAN;
        }
        let n = finite.len() as f64;
        let mu = finite.iter().sum::<f64>() / n;
        (finite.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / n).sqrt()
    });
    Ok((mean, std))
}

/// Relative errors of the sample-wise mean and standard deviation fields.
///
/// Both inputs carry samples on their last axis. `err_std` is undefined when
/// the reference has no spread at all (a single sample, or identical samples)
/// and is returned as NaN in that case; a zero reference mean is still
/// reported as [`MetricsError::DegenerateReference`].
pub fn relative_error_mean_std<D: RemoveAxis>(
    reference_samples: ArrayView<f64, D>,
    predicted_samples: ArrayView<f64, D>,
) -> Result<(f64, f64), MetricsError> {
    check_shapes(&reference_samples, &predicted_samples)?;
    let (reference_mean, reference_std) = sample_mean_std(reference_samples)?;
    let (predicted_mean, predicted_std) = sample_mean_std(predicted_samples)?;
    let err_mean = relative_error(reference_mean.view(), predicted_mean.view())?;
    let err_std = match relative_error(reference_std.view(), predicted_std.view()) {
        Err(MetricsError::DegenerateReference) => f64::NAN,
        other => other?,
    };
    Ok((err_mean, err_std))
}

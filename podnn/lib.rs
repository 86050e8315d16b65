//! # podnn
//!
//! Reduced-order surrogate modeling for parametrized fields. High-fidelity
//! snapshots are compressed onto a Proper Orthogonal Decomposition (POD) basis,
//! and a neural regressor learns the map from parameters to reduced
//! coefficients together with an uncertainty estimate. Predictions are lifted
//! back to physical space through the same basis.
//!
//! The pipeline, leaf first:
//!
//! 1. [`dataset`] splits raw snapshots and parameters and reduces them.
//! 2. [`pod`] fits the orthonormal basis and maps between spaces.
//! 3. [`surrogate`] and [`network`] hold the trainable regressors.
//! 4. [`trainer`] fits a regressor against the composite loss.
//! 5. [`predictor`] composes basis and regressor into physical predictions.
//! 6. [`metrics`] scores predictions against references.
//!
//! [`model::PodnnModel`] owns the fitted state and ties the stages together.

pub mod config;
pub mod dataset;
pub mod io;
pub mod layout;
pub mod metrics;
pub mod model;
pub mod network;
pub mod normalize;
pub mod pod;
pub mod predictor;
pub mod progress;
pub mod surrogate;
pub mod trainer;

#[cfg(test)]
pub(crate) mod test_fixtures;

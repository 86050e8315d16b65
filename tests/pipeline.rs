mod common;

use approx::assert_abs_diff_eq;
use common::{sinusoid, steady_hyperparameters};
use ndarray::Array2;
use podnn::metrics::relative_error;
use podnn::model::PodnnModel;
use podnn::pod::{PodBasis, TruncationPolicy};
use podnn::progress::NoopProgress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const LINEAR_NETWORK: &str = "h_layers = []\nnorm = \"mean_std\"";
const MSE_TRAINING: &str = "epochs = 3000\nlr = 0.01\ndecay = 0.001\nlambda = 1.0\nlog_frequency = 500";

fn random_snapshots(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((rows, cols), || rng.gen_range(-1.0..1.0))
}

#[test]
fn single_mode_sinusoid_is_recovered_on_held_out_parameters() {
    let dataset = sinusoid(100, 64, 1);
    let hp = steady_hyperparameters(64, 1, LINEAR_NETWORK, MSE_TRAINING);
    let mut model = PodnnModel::new(hp).unwrap();
    let reduced = model.convert_dataset(&dataset, &mut NoopProgress).unwrap();
    assert_eq!(model.basis().unwrap().n_modes(), 1);

    let report = model.train(&reduced, &mut NoopProgress).unwrap();
    assert!(report.final_loss < report.losses[0]);
    let last_validation = report.history.last().unwrap();
    assert_eq!(last_validation.epoch, 2999);
    assert_eq!(last_validation.validation.len(), 2);
    let (val_mean, val_std) = (last_validation.validation[0], last_validation.validation[1]);
    assert!(val_mean < 1e-2, "validation mean error {val_mean}");
    assert!(val_std < 5e-2, "validation std error {val_std}");

    // The report and the training-time validation use the same metric.
    let validation = model
        .evaluate(reduced.x_val.view(), reduced.u_val.view())
        .unwrap();
    assert_abs_diff_eq!(validation.err_mean, val_mean, epsilon = 1e-12);
    assert_abs_diff_eq!(validation.err_std, val_std, epsilon = 1e-12);

    let test = model
        .evaluate(reduced.x_test.view(), reduced.u_test.view())
        .unwrap();
    assert!(test.err_mean < 1e-2, "test mean error {}", test.err_mean);
    assert!(test.err_std < 5e-2, "test std error {}", test.err_std);
    assert!(test.relative_error < 1e-2, "test error {}", test.relative_error);
    assert!(test.mse >= 0.0);

    let (mean, sigma) = model.predict_var(reduced.x_test.view()).unwrap();
    assert_eq!(mean.dim(), reduced.u_test.dim());
    assert!(sigma.iter().all(|s| s.is_finite()));
}

#[test]
fn sixty_twenty_twenty_split_has_exact_disjoint_counts() {
    let dataset = sinusoid(100, 16, 2);
    let hp = steady_hyperparameters(16, 1, LINEAR_NETWORK, MSE_TRAINING);
    let mut model = PodnnModel::new(hp).unwrap();
    let reduced = model.convert_dataset(&dataset, &mut NoopProgress).unwrap();

    assert_eq!(reduced.x_train.nrows(), 60);
    assert_eq!(reduced.v_train.nrows(), 60);
    assert_eq!(reduced.x_val.nrows(), 20);
    assert_eq!(reduced.u_val.ncols(), 20);
    assert_eq!(reduced.x_test.nrows(), 20);
    assert_eq!(reduced.u_test.ncols(), 20);

    let indices = &reduced.indices;
    let unique: HashSet<usize> = indices
        .train
        .iter()
        .chain(&indices.val)
        .chain(&indices.test)
        .copied()
        .collect();
    assert_eq!(unique.len(), 100);
}

#[test]
fn keeping_every_mode_reconstructs_training_snapshots() {
    let snapshots = random_snapshots(30, 20, 3);
    let policy = TruncationPolicy {
        eps: 0.0,
        eps_init: None,
        n_l_max: Some(20),
    };
    let basis = PodBasis::fit(snapshots.view(), &policy).unwrap();
    assert_eq!(basis.n_modes(), 20);
    let reconstructed = basis.project(snapshots.view()).unwrap();
    assert!(relative_error(snapshots.view(), reconstructed.view()).unwrap() < 1e-12);
    assert!(basis.orthonormality_defect() < 1e-12);
}

#[test]
fn projection_error_stays_within_the_energy_tolerance() {
    for (seed, eps) in [(4, 0.05), (5, 0.2), (6, 0.5)] {
        let snapshots = random_snapshots(40, 25, seed);
        let policy = TruncationPolicy {
            eps,
            eps_init: None,
            n_l_max: None,
        };
        let basis = PodBasis::fit(snapshots.view(), &policy).unwrap();
        let projected = basis.project(snapshots.view()).unwrap();
        let err = relative_error(snapshots.view(), projected.view()).unwrap();
        assert!(err <= eps + 1e-12, "eps {eps}: error {err}");
        assert_abs_diff_eq!(err, basis.truncation_error(), epsilon = 1e-10);

        // Idempotent once in the span.
        let twice = basis.project(projected.view()).unwrap();
        for (a, b) in projected.iter().zip(twice.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }
}

#[test]
fn ensemble_with_quadrature_gives_non_negative_spread() {
    let dataset = sinusoid(40, 16, 7);
    let network = "h_layers = [8]\nuncertainty = { kind = \"ensemble\", members = 3 }\nsigma_propagation = \"quadrature\"";
    let training = "epochs = 200\nlr = 0.005\nlambda = 1.0\nbeta = 1e-4\nk1 = 1.0\nk2 = 1.0\nlog_frequency = 0";
    let mut model = PodnnModel::new(steady_hyperparameters(16, 2, network, training)).unwrap();
    let reduced = model.convert_dataset(&dataset, &mut NoopProgress).unwrap();
    let report = model.train(&reduced, &mut NoopProgress).unwrap();
    assert!(report.history.is_empty());

    let (_, sigma) = model.predict_var(reduced.x_val.view()).unwrap();
    assert!(sigma.iter().all(|&s| s >= 0.0 && s.is_finite()));

    let hifi = model.predict_hifi(None, &mut NoopProgress).unwrap();
    assert_eq!(hifi.inputs.dim(), (50, 1));
    assert_eq!(hifi.mean.shape(), &[1, 16]);
    assert!(hifi.inputs.iter().all(|&mu| (1.0..=3.0).contains(&mu)));
    assert!(hifi.sigma.iter().all(|&s| s >= 0.0));
}

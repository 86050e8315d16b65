use ndarray::{Array1, Array2};
use podnn::config::Hyperparameters;
use podnn::dataset::SnapshotDataset;
use podnn::layout::FieldLayout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// `u(x; μ) = μ · sin(πx)` sampled on `n_points` nodes, μ uniform in `[1, 3)`.
pub fn sinusoid(n_samples: usize, n_points: usize, seed: u64) -> SnapshotDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mu: Vec<f64> = (0..n_samples).map(|_| rng.gen_range(1.0..3.0)).collect();
    let x = Array1::linspace(0.0, 1.0, n_points);
    let u = Array2::from_shape_fn((n_points, n_samples), |(i, s)| mu[s] * (PI * x[i]).sin());
    let params = Array2::from_shape_fn((n_samples, 1), |(s, _)| mu[s]);
    let layout = FieldLayout::new(1, vec![n_points], None).unwrap();
    SnapshotDataset::new(layout, params, u).unwrap()
}

/// Hyperparameters for a 1-D steady field; `network` and `training` are
/// spliced in verbatim.
pub fn steady_hyperparameters(n_points: usize, n_l: usize, network: &str, training: &str) -> Hyperparameters {
    Hyperparameters::from_toml_str(&format!(
        r#"
[field]
n_v = 1
mesh_shape = [{n_points}]

[pod]
eps = 0.0
n_l = {n_l}

[dataset]
n_s = 100
train_val = [0.6, 0.2, 0.2]
seed = 11

[network]
{network}

[training]
{training}

[hifi]
n_s_tst = 50
mu_min = [1.0]
mu_max = [3.0]
batch_size = 16
seed = 5
"#
    ))
    .unwrap()
}

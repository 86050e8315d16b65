//! Synthetic parametrized fields with closed-form solutions.

use crate::dataset::SnapshotDataset;
use crate::layout::FieldLayout;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Entries drawn uniformly from `[-1, 1)`.
pub fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((rows, cols), || rng.gen_range(-1.0..1.0))
}

fn draw_mu(n_samples: usize, lo: f64, hi: f64, rng: &mut StdRng) -> Vec<f64> {
    (0..n_samples).map(|_| rng.gen_range(lo..hi)).collect()
}

/// `u(x; μ) = μ · sin(πx)` on `n_points` nodes of `[0, 1]`, μ in `[1, 3)`.
pub fn sinusoid_dataset(n_samples: usize, n_points: usize, seed: u64) -> SnapshotDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mu = draw_mu(n_samples, 1.0, 3.0, &mut rng);
    let x = Array1::linspace(0.0, 1.0, n_points);
    let u = Array2::from_shape_fn((n_points, n_samples), |(i, s)| mu[s] * (PI * x[i]).sin());
    let params = Array2::from_shape_fn((n_samples, 1), |(s, _)| mu[s]);
    SnapshotDataset::new(FieldLayout::new(1, vec![n_points], None).unwrap(), params, u).unwrap()
}

/// `u(x, t; μ) = sin(πx)·exp(−μt) + μt·sin(2πx)` with inputs `[t, μ]`,
/// `n_t` steps on `[0, 1]`, μ in `[1, 2)`.
pub fn time_dependent_dataset(
    n_samples: usize,
    n_points: usize,
    n_t: usize,
    seed: u64,
) -> SnapshotDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mu = draw_mu(n_samples, 1.0, 2.0, &mut rng);
    let x = Array1::linspace(0.0, 1.0, n_points);
    let t = Array1::linspace(0.0, 1.0, n_t);
    let u = Array2::from_shape_fn((n_points, n_samples * n_t), |(i, col)| {
        let (s, k) = (col / n_t, col % n_t);
        (PI * x[i]).sin() * (-mu[s] * t[k]).exp() + mu[s] * t[k] * (2.0 * PI * x[i]).sin()
    });
    let params = Array2::from_shape_fn((n_samples * n_t, 2), |(row, c)| {
        let (s, k) = (row / n_t, row % n_t);
        if c == 0 { t[k] } else { mu[s] }
    });
    SnapshotDataset::new(
        FieldLayout::new(1, vec![n_points], Some(n_t)).unwrap(),
        params,
        u,
    )
    .unwrap()
}

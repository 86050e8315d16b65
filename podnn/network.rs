//! Fully connected networks with a two-headed (mean, variance) output.
//!
//! Hidden layers use `tanh`. The linear head emits `2 * output_dim` values per
//! row: the first half is the mean, the second half is a raw value mapped to a
//! variance through `softplus(raw) + VARIANCE_FLOOR`.
//!
//! When a temporal sub-topology is configured, input column 0 (time) runs
//! through its own branch and the remaining columns (parameters) through the
//! main branch; both branch outputs are concatenated in front of the head.

use crate::surrogate::SurrogateError;
use ndarray::{Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Lower bound added to every predicted variance.
pub const VARIANCE_FLOOR: f64 = 1e-6;

pub(crate) fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Widths and input/output sizes of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkShape {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Hidden widths of the main (parameter) branch.
    pub h_layers: Vec<usize>,
    /// Hidden widths of the temporal branch fed by input column 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h_layers_t: Option<Vec<usize>>,
}

impl NetworkShape {
    pub fn validate(&self) -> Result<(), SurrogateError> {
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(SurrogateError::InvalidTopology(
                "input and output dimensions must be positive".to_string(),
            ));
        }
        let mut widths = self
            .h_layers
            .iter()
            .chain(self.h_layers_t.iter().flatten());
        if widths.any(|&w| w == 0) {
            return Err(SurrogateError::InvalidTopology(
                "hidden layer widths must be positive".to_string(),
            ));
        }
        if self.h_layers_t.is_some() && self.input_dim < 2 {
            return Err(SurrogateError::InvalidTopology(format!(
                "a temporal branch needs a time column plus at least one parameter, got {} input(s)",
                self.input_dim
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    /// Shape `[n_in, n_out]`.
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Dense {
    /// Glorot-normal weights, zero bias.
    fn glorot(n_in: usize, n_out: usize, rng: &mut StdRng) -> Self {
        let std = (2.0 / (n_in + n_out) as f64).sqrt();
        let weights = Array2::from_shape_simple_fn((n_in, n_out), || {
            rng.sample::<f64, _>(StandardNormal) * std
        });
        Self {
            weights,
            bias: Array1::zeros(n_out),
        }
    }

    fn n_out(&self) -> usize {
        self.weights.ncols()
    }

    fn check(&self, n_in: usize, n_out: usize, name: &str) -> Result<(), SurrogateError> {
        if self.weights.dim() != (n_in, n_out) || self.bias.len() != n_out {
            return Err(SurrogateError::InvalidTopology(format!(
                "{name} holds {:?} weights and {} biases, expected ({n_in}, {n_out}) and {n_out}",
                self.weights.dim(),
                self.bias.len()
            )));
        }
        Ok(())
    }

    fn forward(&self, input: ArrayView2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Branch {
    /// Input columns `start..end` feed this branch.
    start: usize,
    end: usize,
    layers: Vec<Dense>,
}

impl Branch {
    fn new(start: usize, end: usize, widths: &[usize], rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(widths.len());
        let mut n_in = end - start;
        for &width in widths {
            layers.push(Dense::glorot(n_in, width, rng));
            n_in = width;
        }
        Self { start, end, layers }
    }

    fn output_width(&self) -> usize {
        self.layers.last().map_or(self.end - self.start, Dense::n_out)
    }
}

struct BranchTrace {
    /// `activations[0]` is the branch input; `activations[i + 1]` the output of layer `i`.
    activations: Vec<Array2<f64>>,
}

pub(crate) struct ForwardTrace {
    branches: Vec<BranchTrace>,
    hidden: Array2<f64>,
    output: Array2<f64>,
}

impl ForwardTrace {
    pub(crate) fn output(&self) -> ArrayView2<'_, f64> {
        self.output.view()
    }
}

struct DenseGradient {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

pub(crate) struct NetworkGradients {
    branches: Vec<Vec<DenseGradient>>,
    head: DenseGradient,
}

/// A network predicting a mean and a variance for every output coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarNetwork {
    shape: NetworkShape,
    branches: Vec<Branch>,
    head: Dense,
}

/// Input column range and hidden widths of every branch, time branch first.
fn branch_plan(shape: &NetworkShape) -> Vec<(usize, usize, &[usize])> {
    match &shape.h_layers_t {
        Some(temporal) => vec![
            (0, 1, temporal.as_slice()),
            (1, shape.input_dim, shape.h_layers.as_slice()),
        ],
        None => vec![(0, shape.input_dim, shape.h_layers.as_slice())],
    }
}

impl VarNetwork {
    pub fn new(shape: NetworkShape, seed: u64) -> Result<Self, SurrogateError> {
        shape.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let branches: Vec<Branch> = branch_plan(&shape)
            .into_iter()
            .map(|(start, end, widths)| Branch::new(start, end, widths, &mut rng))
            .collect();
        let hidden_width = branches.iter().map(Branch::output_width).sum();
        let head = Dense::glorot(hidden_width, 2 * shape.output_dim, &mut rng);
        Ok(Self {
            shape,
            branches,
            head,
        })
    }

    pub fn shape(&self) -> &NetworkShape {
        &self.shape
    }

    /// Checks every stored layer against the shape, so that a network read
    /// from disk cannot fail inside a matrix product later.
    pub fn check_parameters(&self) -> Result<(), SurrogateError> {
        self.shape.validate()?;
        let plan = branch_plan(&self.shape);
        if plan.len() != self.branches.len() {
            return Err(SurrogateError::InvalidTopology(format!(
                "expected {} branch(es), found {}",
                plan.len(),
                self.branches.len()
            )));
        }
        for (b, (branch, &(start, end, widths))) in self.branches.iter().zip(&plan).enumerate() {
            if branch.start != start || branch.end != end || branch.layers.len() != widths.len() {
                return Err(SurrogateError::InvalidTopology(format!(
                    "branch {b} reads columns {}..{} through {} layer(s), expected {start}..{end} through {}",
                    branch.start,
                    branch.end,
                    branch.layers.len(),
                    widths.len()
                )));
            }
            let mut n_in = end - start;
            for (l, (layer, &width)) in branch.layers.iter().zip(widths).enumerate() {
                layer.check(n_in, width, &format!("branch {b} layer {l}"))?;
                n_in = width;
            }
        }
        let hidden_width = self.branches.iter().map(Branch::output_width).sum();
        self.head.check(hidden_width, 2 * self.shape.output_dim, "head")
    }

    pub fn input_dim(&self) -> usize {
        self.shape.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.shape.output_dim
    }

    /// Total number of trainable scalars.
    pub fn n_parameters(&self) -> usize {
        self.dense_layers()
            .map(|layer| layer.weights.len() + layer.bias.len())
            .sum()
    }

    fn dense_layers(&self) -> impl Iterator<Item = &Dense> {
        self.branches
            .iter()
            .flat_map(|branch| branch.layers.iter())
            .chain(std::iter::once(&self.head))
    }

    /// Sum of squared weights (biases excluded).
    pub fn weight_penalty(&self) -> f64 {
        self.dense_layers()
            .map(|layer| layer.weights.iter().map(|w| w * w).sum::<f64>())
            .sum()
    }

    pub(crate) fn trace(&self, input: ArrayView2<f64>) -> ForwardTrace {
        let n_rows = input.nrows();
        let mut branch_traces = Vec::with_capacity(self.branches.len());
        let hidden_width = self.branches.iter().map(Branch::output_width).sum();
        let mut hidden = Array2::zeros((n_rows, hidden_width));
        let mut offset = 0;

        for branch in &self.branches {
            let mut current = input.slice(s![.., branch.start..branch.end]).to_owned();
            let mut activations = Vec::with_capacity(branch.layers.len() + 1);
            for layer in &branch.layers {
                let next = layer.forward(current.view()).mapv_into(f64::tanh);
                activations.push(current);
                current = next;
            }
            let width = current.ncols();
            hidden
                .slice_mut(s![.., offset..offset + width])
                .assign(&current);
            offset += width;
            activations.push(current);
            branch_traces.push(BranchTrace { activations });
        }

        let output = self.head.forward(hidden.view());
        ForwardTrace {
            branches: branch_traces,
            hidden,
            output,
        }
    }

    /// Raw head output, shape `[n_rows, 2 * output_dim]`.
    pub fn forward(&self, input: ArrayView2<f64>) -> Array2<f64> {
        self.trace(input).output
    }

    /// Splits the head output into mean and variance.
    pub fn mean_and_variance(&self, input: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
        let raw = self.forward(input);
        let d = self.output_dim();
        let mean = raw.slice(s![.., ..d]).to_owned();
        let variance = raw
            .slice(s![.., d..])
            .mapv(|r| softplus(r) + VARIANCE_FLOOR);
        (mean, variance)
    }

    /// Backpropagates `d_output` (gradient of the loss w.r.t. the raw head
    /// output) and adds the gradient of `beta * Σ W²`.
    pub(crate) fn gradients(
        &self,
        trace: &ForwardTrace,
        d_output: ArrayView2<f64>,
        beta: f64,
    ) -> NetworkGradients {
        let head = DenseGradient {
            weights: trace.hidden.t().dot(&d_output) + &(&self.head.weights * (2.0 * beta)),
            bias: d_output.sum_axis(Axis(0)),
        };
        let d_hidden = d_output.dot(&self.head.weights.t());

        let mut offset = 0;
        let mut branch_gradients = Vec::with_capacity(self.branches.len());
        for (branch, branch_trace) in self.branches.iter().zip(&trace.branches) {
            let width = branch.output_width();
            let mut delta = d_hidden.slice(s![.., offset..offset + width]).to_owned();
            offset += width;

            let mut layer_gradients = Vec::with_capacity(branch.layers.len());
            for (i, layer) in branch.layers.iter().enumerate().rev() {
                let activated = &branch_trace.activations[i + 1];
                let d_pre = delta * &activated.mapv(|a| 1.0 - a * a);
                let layer_input = &branch_trace.activations[i];
                layer_gradients.push(DenseGradient {
                    weights: layer_input.t().dot(&d_pre) + &(&layer.weights * (2.0 * beta)),
                    bias: d_pre.sum_axis(Axis(0)),
                });
                delta = d_pre.dot(&layer.weights.t());
            }
            layer_gradients.reverse();
            branch_gradients.push(layer_gradients);
        }

        NetworkGradients {
            branches: branch_gradients,
            head,
        }
    }
}

#[derive(Debug, Clone)]
struct DenseMoments {
    first_w: Array2<f64>,
    second_w: Array2<f64>,
    first_b: Array1<f64>,
    second_b: Array1<f64>,
}

impl DenseMoments {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            first_w: Array2::zeros(layer.weights.raw_dim()),
            second_w: Array2::zeros(layer.weights.raw_dim()),
            first_b: Array1::zeros(layer.bias.raw_dim()),
            second_b: Array1::zeros(layer.bias.raw_dim()),
        }
    }
}

/// Adam optimizer state for one [`VarNetwork`].
#[derive(Debug, Clone)]
pub(crate) struct Adam {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    branches: Vec<Vec<DenseMoments>>,
    head: DenseMoments,
}

struct AdamStep {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    learning_rate: f64,
    bias_correction1: f64,
    bias_correction2: f64,
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    first: &mut Array<f64, D>,
    second: &mut Array<f64, D>,
    step: &AdamStep,
) {
    Zip::from(param)
        .and(grad)
        .and(first)
        .and(second)
        .for_each(|p, &g, m, v| {
            *m = step.beta1 * *m + (1.0 - step.beta1) * g;
            *v = step.beta2 * *v + (1.0 - step.beta2) * g * g;
            let m_hat = *m / step.bias_correction1;
            let v_hat = *v / step.bias_correction2;
            *p -= step.learning_rate * m_hat / (v_hat.sqrt() + step.epsilon);
        });
}

impl Adam {
    pub(crate) fn new(network: &VarNetwork) -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            branches: network
                .branches
                .iter()
                .map(|branch| branch.layers.iter().map(DenseMoments::zeros_like).collect())
                .collect(),
            head: DenseMoments::zeros_like(&network.head),
        }
    }

    pub(crate) fn apply(
        &mut self,
        network: &mut VarNetwork,
        gradients: &NetworkGradients,
        learning_rate: f64,
    ) {
        self.step = self.step.saturating_add(1);
        let step = AdamStep {
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            learning_rate,
            bias_correction1: 1.0 - self.beta1.powi(self.step),
            bias_correction2: 1.0 - self.beta2.powi(self.step),
        };

        let update = |layer: &mut Dense, grad: &DenseGradient, moments: &mut DenseMoments| {
            adam_update(
                &mut layer.weights,
                &grad.weights,
                &mut moments.first_w,
                &mut moments.second_w,
                &step,
            );
            adam_update(
                &mut layer.bias,
                &grad.bias,
                &mut moments.first_b,
                &mut moments.second_b,
                &step,
            );
        };

        for ((branch, branch_grads), branch_moments) in network
            .branches
            .iter_mut()
            .zip(&gradients.branches)
            .zip(self.branches.iter_mut())
        {
            for ((layer, grad), moments) in branch
                .layers
                .iter_mut()
                .zip(branch_grads)
                .zip(branch_moments.iter_mut())
            {
                update(layer, grad, moments);
            }
        }
        update(&mut network.head, &gradients.head, &mut self.head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::random_matrix;
    use approx::assert_abs_diff_eq;

    fn shape(h_layers: Vec<usize>, h_layers_t: Option<Vec<usize>>) -> NetworkShape {
        NetworkShape {
            input_dim: 3,
            output_dim: 2,
            h_layers,
            h_layers_t,
        }
    }

    /// Loss `Σ output ⊙ weights` so that `dL/doutput = weights`.
    fn linear_probe(network: &VarNetwork, input: &Array2<f64>, probe: &Array2<f64>) -> f64 {
        (network.forward(input.view()) * probe).sum()
    }

    fn check_gradients(network: VarNetwork, beta: f64) {
        let input = random_matrix(5, 3, 21);
        let probe = random_matrix(5, 4, 22);
        let trace = network.trace(input.view());
        let grads = network.gradients(&trace, probe.view(), beta);
        let h = 1e-6;

        let objective = |net: &VarNetwork| linear_probe(net, &input, &probe) + beta * net.weight_penalty();

        for (b, branch) in network.branches.iter().enumerate() {
            for (l, layer) in branch.layers.iter().enumerate() {
                for ((i, j), _) in layer.weights.indexed_iter().take(4) {
                    let mut plus = network.clone();
                    plus.branches[b].layers[l].weights[[i, j]] += h;
                    let mut minus = network.clone();
                    minus.branches[b].layers[l].weights[[i, j]] -= h;
                    let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
                    assert_abs_diff_eq!(
                        grads.branches[b][l].weights[[i, j]],
                        numeric,
                        epsilon = 1e-5
                    );
                }
                for k in 0..layer.bias.len().min(3) {
                    let mut plus = network.clone();
                    plus.branches[b].layers[l].bias[k] += h;
                    let mut minus = network.clone();
                    minus.branches[b].layers[l].bias[k] -= h;
                    let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
                    assert_abs_diff_eq!(grads.branches[b][l].bias[k], numeric, epsilon = 1e-5);
                }
            }
        }
        for ((i, j), _) in network.head.weights.indexed_iter().take(6) {
            let mut plus = network.clone();
            plus.head.weights[[i, j]] += h;
            let mut minus = network.clone();
            minus.head.weights[[i, j]] -= h;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
            assert_abs_diff_eq!(grads.head.weights[[i, j]], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn backprop_matches_finite_differences() {
        check_gradients(VarNetwork::new(shape(vec![4, 3], None), 1).unwrap(), 0.0);
    }

    #[test]
    fn backprop_matches_finite_differences_with_branches_and_decay() {
        check_gradients(
            VarNetwork::new(shape(vec![4], Some(vec![3, 2])), 2).unwrap(),
            0.05,
        );
    }

    #[test]
    fn linear_network_without_hidden_layers_is_affine() {
        let network = VarNetwork::new(shape(vec![], None), 3).unwrap();
        assert_eq!(network.n_parameters(), 3 * 4 + 4);
        let a = random_matrix(1, 3, 4);
        let b = random_matrix(1, 3, 5);
        let mid = (&a + &b) / 2.0;
        let fa = network.forward(a.view());
        let fb = network.forward(b.view());
        let fmid = network.forward(mid.view());
        for ((x, y), z) in fa.iter().zip(fb.iter()).zip(fmid.iter()) {
            assert_abs_diff_eq!((x + y) / 2.0, *z, epsilon = 1e-12);
        }
    }

    #[test]
    fn variance_is_strictly_positive() {
        let network = VarNetwork::new(shape(vec![8], None), 6).unwrap();
        let input = random_matrix(20, 3, 7) * 50.0;
        let (mean, variance) = network.mean_and_variance(input.view());
        assert_eq!(mean.dim(), (20, 2));
        assert!(variance.iter().all(|&v| v >= VARIANCE_FLOOR && v.is_finite()));
    }

    #[test]
    fn same_seed_gives_same_network() {
        let a = VarNetwork::new(shape(vec![5, 5], None), 9).unwrap();
        let b = VarNetwork::new(shape(vec![5, 5], None), 9).unwrap();
        let c = VarNetwork::new(shape(vec![5, 5], None), 10).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn adam_descends_a_quadratic() {
        let mut network = VarNetwork::new(shape(vec![6], None), 11).unwrap();
        let input = random_matrix(16, 3, 12);
        let target = Array2::<f64>::zeros((16, 4));
        let mut adam = Adam::new(&network);
        let loss = |net: &VarNetwork| {
            let out = net.forward(input.view());
            (&out - &target).mapv(|r| r * r).sum()
        };
        let initial = loss(&network);
        for _ in 0..200 {
            let trace = network.trace(input.view());
            let d_output = (trace.output().to_owned() - &target) * 2.0;
            let grads = network.gradients(&trace, d_output.view(), 0.0);
            adam.apply(&mut network, &grads, 1e-2);
        }
        assert!(loss(&network) < 0.1 * initial);
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        assert!(VarNetwork::new(shape(vec![0], None), 1).is_err());
        let narrow = NetworkShape {
            input_dim: 1,
            output_dim: 1,
            h_layers: vec![2],
            h_layers_t: Some(vec![2]),
        };
        assert!(matches!(
            VarNetwork::new(narrow, 1),
            Err(SurrogateError::InvalidTopology(_))
        ));
    }

    #[test]
    fn stored_layers_must_match_the_shape() {
        let network = VarNetwork::new(shape(vec![4, 3], Some(vec![2])), 9).unwrap();
        network.check_parameters().unwrap();

        let mut short_bias = network.clone();
        short_bias.head.bias = Array1::zeros(3);
        assert!(matches!(
            short_bias.check_parameters(),
            Err(SurrogateError::InvalidTopology(_))
        ));

        let mut wrong_width = network.clone();
        wrong_width.branches[1].layers[1] = Dense {
            weights: Array2::zeros((4, 5)),
            bias: Array1::zeros(5),
        };
        assert!(wrong_width.check_parameters().is_err());

        let mut missing_branch = network;
        missing_branch.branches.pop();
        assert!(missing_branch.check_parameters().is_err());
    }

    #[test]
    fn softplus_and_sigmoid_are_stable_at_extremes() {
        assert_abs_diff_eq!(softplus(800.0), 800.0);
        assert!(softplus(-800.0) >= 0.0);
        assert_abs_diff_eq!(sigmoid(800.0), 1.0);
        assert_abs_diff_eq!(sigmoid(-800.0), 0.0);
        assert_abs_diff_eq!(softplus(0.0), std::f64::consts::LN_2, epsilon = 1e-15);
    }
}

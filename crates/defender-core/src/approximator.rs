//! Value Approximators
//!
//! The learning logic only ever talks to [`ValueApproximator`]. Two
//! backends satisfy it: a small dense network trained with Adam, and a
//! fixed threshold heuristic used when no trained estimator is available.

use crate::config::{ONE_R_WEIGHTS, STATE_SIZE};
use crate::{DefenderError, DefenderResult};
use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Per-action value estimator
pub trait ValueApproximator: Send {
    /// Expected input length
    fn input_size(&self) -> usize;

    /// Number of action values produced
    fn action_size(&self) -> usize;

    /// Value estimate for every action
    fn predict(&self, input: &[f64]) -> DefenderResult<Vec<f64>>;

    /// One optimisation pass over `(input, target)` pairs, returning the loss
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> DefenderResult<f64>;

    /// Flat copy of every learnable parameter
    fn parameters(&self) -> Vec<f64>;

    /// Replace every learnable parameter
    fn load_parameters(&mut self, params: &[f64]) -> DefenderResult<()>;

    /// Whether inputs must reach this estimator without feature re-weighting
    fn scores_raw_features(&self) -> bool {
        false
    }
}

/// Index of the largest value; ties and NaN resolve to the lowest index
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

fn check_input(expected: usize, input: &[f64]) -> DefenderResult<()> {
    if input.len() != expected {
        return Err(DefenderError::Input(format!(
            "approximator expects {} inputs, got {}",
            expected,
            input.len()
        )));
    }
    Ok(())
}

// =============================================================================
// Heuristic backend
// =============================================================================

/// How a feature contributes to the suspicion score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Above,
    Below,
    Deviation,
}

const DIRECTIONS: [Direction; STATE_SIZE] = [
    Direction::Above,     // source_entropy
    Direction::Below,     // destination_entropy
    Direction::Above,     // syn_ratio
    Direction::Above,     // traffic_volume
    Direction::Above,     // packet_rate
    Direction::Above,     // unique_src_count
    Direction::Below,     // unique_dst_count
    Direction::Deviation, // protocol_imbalance
];

/// Per-feature suspicion thresholds
pub const HEURISTIC_THRESHOLDS: [f64; STATE_SIZE] = [0.65, 0.3, 0.5, 0.6, 0.7, 0.6, 0.3, 0.4];

/// Score above which the heuristic reports an attack
pub const HEURISTIC_CUTOFF: f64 = 0.45;

/// Deterministic rule-based stand-in for a trained estimator
///
/// Scores the most recent window of its input and reports action 1 when the
/// weighted suspicion score exceeds the cutoff, action 0 otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicApproximator {
    input_size: usize,
    action_size: usize,
    thresholds: [f64; STATE_SIZE],
    weights: [f64; STATE_SIZE],
    cutoff: f64,
}

impl HeuristicApproximator {
    pub fn new(window_size: usize, action_size: usize) -> Self {
        Self {
            input_size: STATE_SIZE * window_size.max(1),
            action_size: action_size.max(2),
            thresholds: HEURISTIC_THRESHOLDS,
            weights: ONE_R_WEIGHTS,
            cutoff: HEURISTIC_CUTOFF,
        }
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Weighted suspicion score of a single state vector
    pub fn suspicion_score(&self, features: &[f64]) -> f64 {
        features
            .iter()
            .take(STATE_SIZE)
            .enumerate()
            .map(|(i, &value)| {
                let threshold = self.thresholds[i];
                let weight = self.weights[i];
                match DIRECTIONS[i] {
                    Direction::Above if value > threshold => weight * (value - threshold) / (1.0 - threshold),
                    Direction::Below if value < threshold => weight * (threshold - value) / threshold,
                    Direction::Deviation => weight * (value - threshold).abs(),
                    _ => 0.0,
                }
            })
            .sum()
    }
}

impl ValueApproximator for HeuristicApproximator {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn action_size(&self) -> usize {
        self.action_size
    }

    fn predict(&self, input: &[f64]) -> DefenderResult<Vec<f64>> {
        check_input(self.input_size, input)?;
        let latest = &input[input.len() - STATE_SIZE..];
        let score = self.suspicion_score(latest);

        let mut values = vec![0.0; self.action_size];
        values[0] = self.cutoff;
        values[1] = score;
        Ok(values)
    }

    fn fit(&mut self, _inputs: &[Vec<f64>], _targets: &[Vec<f64>]) -> DefenderResult<f64> {
        Ok(0.0)
    }

    fn scores_raw_features(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<f64> {
        self.thresholds.iter().chain(self.weights.iter()).copied().collect()
    }

    fn load_parameters(&mut self, params: &[f64]) -> DefenderResult<()> {
        if params.len() != 2 * STATE_SIZE {
            return Err(DefenderError::ModelLoad(format!(
                "heuristic expects {} parameters, got {}",
                2 * STATE_SIZE,
                params.len()
            )));
        }
        self.thresholds.copy_from_slice(&params[..STATE_SIZE]);
        self.weights.copy_from_slice(&params[STATE_SIZE..]);
        Ok(())
    }
}

// =============================================================================
// Trained backend
// =============================================================================

const HIDDEN_LAYERS: [usize; 3] = [64, 64, 32];
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    m_weights: Array2<f64>,
    v_weights: Array2<f64>,
    m_bias: Array1<f64>,
    v_bias: Array1<f64>,
}

impl DenseLayer {
    /// He-uniform initialisation
    fn new(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / fan_in as f64).sqrt();
        Self {
            weights: Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-limit..limit)),
            bias: Array1::zeros(fan_out),
            m_weights: Array2::zeros((fan_in, fan_out)),
            v_weights: Array2::zeros((fan_in, fan_out)),
            m_bias: Array1::zeros(fan_out),
            v_bias: Array1::zeros(fan_out),
        }
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn reset_moments(&mut self) {
        self.m_weights.fill(0.0);
        self.v_weights.fill(0.0);
        self.m_bias.fill(0.0);
        self.v_bias.fill(0.0);
    }
}

/// Dense ReLU network (64-64-32) with a linear output and MSE loss
#[derive(Debug, Clone)]
pub struct TrainedApproximator {
    layers: Vec<DenseLayer>,
    learning_rate: f64,
    step: i32,
}

impl TrainedApproximator {
    pub fn new(input_size: usize, action_size: usize, learning_rate: f64) -> Self {
        Self::with_rng(input_size, action_size, learning_rate, StdRng::from_entropy())
    }

    pub fn with_seed(input_size: usize, action_size: usize, learning_rate: f64, seed: u64) -> Self {
        Self::with_rng(input_size, action_size, learning_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(input_size: usize, action_size: usize, learning_rate: f64, mut rng: StdRng) -> Self {
        let mut sizes = vec![input_size];
        sizes.extend_from_slice(&HIDDEN_LAYERS);
        sizes.push(action_size);

        let layers = sizes
            .windows(2)
            .map(|pair| DenseLayer::new(pair[0], pair[1], &mut rng))
            .collect();

        Self {
            layers,
            learning_rate,
            step: 0,
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(DenseLayer::parameter_count).sum()
    }

    /// Activations of every layer, input first
    fn forward(&self, input: Array2<f64>) -> Vec<Array2<f64>> {
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input);
        for (i, layer) in self.layers.iter().enumerate() {
            let z = activations[i].dot(&layer.weights) + &layer.bias;
            let a = if i == last { z } else { z.mapv(|v| v.max(0.0)) };
            activations.push(a);
        }
        activations
    }

    fn to_matrix(&self, rows: &[Vec<f64>], width: usize) -> DefenderResult<Array2<f64>> {
        let mut flat = Vec::with_capacity(rows.len() * width);
        for row in rows {
            check_input(width, row)?;
            flat.extend_from_slice(row);
        }
        Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| DefenderError::Input(e.to_string()))
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    learning_rate: f64,
    step: i32,
) {
    let correction1 = 1.0 - ADAM_BETA1.powi(step);
    let correction2 = 1.0 - ADAM_BETA2.powi(step);
    Zip::from(param).and(m).and(v).and(grad).for_each(|p, m, v, &g| {
        *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
        *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
        let m_hat = *m / correction1;
        let v_hat = *v / correction2;
        *p -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
    });
}

impl ValueApproximator for TrainedApproximator {
    fn input_size(&self) -> usize {
        self.layers[0].weights.nrows()
    }

    fn action_size(&self) -> usize {
        self.layers[self.layers.len() - 1].weights.ncols()
    }

    fn predict(&self, input: &[f64]) -> DefenderResult<Vec<f64>> {
        let x = self.to_matrix(std::slice::from_ref(&input.to_vec()), self.input_size())?;
        let mut activations = self.forward(x);
        let output = activations.pop().unwrap_or_default();
        Ok(output.row(0).to_vec())
    }

    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> DefenderResult<f64> {
        if inputs.len() != targets.len() || inputs.is_empty() {
            return Err(DefenderError::Input(format!(
                "fit needs equally sized non-empty batches ({} inputs, {} targets)",
                inputs.len(),
                targets.len()
            )));
        }
        let x = self.to_matrix(inputs, self.input_size())?;
        let y = self.to_matrix(targets, self.action_size())?;

        let activations = self.forward(x);
        let output = &activations[activations.len() - 1];
        let error = output - &y;
        let loss = error.mapv(|e| e * e).mean().unwrap_or(0.0);
        if !loss.is_finite() {
            return Err(DefenderError::Numeric(format!("training loss is {}", loss)));
        }

        // Backpropagate with the pre-update weights
        let mut delta = error * (2.0 / y.len() as f64);
        let mut gradients = Vec::with_capacity(self.layers.len());
        for l in (0..self.layers.len()).rev() {
            let grad_w = activations[l].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            if l > 0 {
                let mut upstream = delta.dot(&self.layers[l].weights.t());
                upstream.zip_mut_with(&activations[l], |d, &a| {
                    if a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = upstream;
            }
            gradients.push((grad_w, grad_b));
        }
        gradients.reverse();

        self.step += 1;
        for (layer, (grad_w, grad_b)) in self.layers.iter_mut().zip(gradients) {
            adam_update(
                &mut layer.weights,
                &mut layer.m_weights,
                &mut layer.v_weights,
                &grad_w,
                self.learning_rate,
                self.step,
            );
            adam_update(
                &mut layer.bias,
                &mut layer.m_bias,
                &mut layer.v_bias,
                &grad_b,
                self.learning_rate,
                self.step,
            );
        }

        Ok(loss)
    }

    fn parameters(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.parameter_count());
        for layer in &self.layers {
            params.extend(layer.weights.iter().copied());
            params.extend(layer.bias.iter().copied());
        }
        params
    }

    fn load_parameters(&mut self, params: &[f64]) -> DefenderResult<()> {
        if params.len() != self.parameter_count() {
            return Err(DefenderError::ModelLoad(format!(
                "network expects {} parameters, got {}",
                self.parameter_count(),
                params.len()
            )));
        }
        if params.iter().any(|p| !p.is_finite()) {
            return Err(DefenderError::ModelLoad("parameters contain NaN or Inf".into()));
        }

        let mut offset = 0;
        for layer in &mut self.layers {
            for w in layer.weights.iter_mut() {
                *w = params[offset];
                offset += 1;
            }
            for b in layer.bias.iter_mut() {
                *b = params[offset];
                offset += 1;
            }
            layer.reset_moments();
        }
        self.step = 0;
        Ok(())
    }
}

// =============================================================================
// Backend selection
// =============================================================================

/// Which backend produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Trained,
    Heuristic,
}

/// Either value approximator behind one type
#[derive(Debug, Clone)]
pub enum Backend {
    Trained(TrainedApproximator),
    Heuristic(HeuristicApproximator),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Trained(_) => BackendKind::Trained,
            Self::Heuristic(_) => BackendKind::Heuristic,
        }
    }

    fn inner(&self) -> &dyn ValueApproximator {
        match self {
            Self::Trained(a) => a,
            Self::Heuristic(a) => a,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ValueApproximator {
        match self {
            Self::Trained(a) => a,
            Self::Heuristic(a) => a,
        }
    }
}

impl ValueApproximator for Backend {
    fn input_size(&self) -> usize {
        self.inner().input_size()
    }

    fn action_size(&self) -> usize {
        self.inner().action_size()
    }

    fn predict(&self, input: &[f64]) -> DefenderResult<Vec<f64>> {
        self.inner().predict(input)
    }

    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> DefenderResult<f64> {
        self.inner_mut().fit(inputs, targets)
    }

    fn parameters(&self) -> Vec<f64> {
        self.inner().parameters()
    }

    fn load_parameters(&mut self, params: &[f64]) -> DefenderResult<()> {
        self.inner_mut().load_parameters(params)
    }

    fn scores_raw_features(&self) -> bool {
        self.inner().scores_raw_features()
    }
}

impl From<TrainedApproximator> for Backend {
    fn from(approximator: TrainedApproximator) -> Self {
        Self::Trained(approximator)
    }
}

impl From<HeuristicApproximator> for Backend {
    fn from(approximator: HeuristicApproximator) -> Self {
        Self::Heuristic(approximator)
    }
}

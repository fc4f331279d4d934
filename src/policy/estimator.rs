//! Action-value estimation
// (c) 2024 Ross Younger

use std::fmt::Display;

use rand::{rngs::StdRng, Rng, SeedableRng as _};
use serde::{Deserialize, Serialize};

use crate::tunnel::{Action, State, ACTION_COUNT, STATE_DIM};

/// Estimated long-run value of each action in some state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActionValues(pub [f64; ACTION_COUNT]);

impl ActionValues {
    /// Value of one action
    #[must_use]
    pub fn get(&self, action: Action) -> f64 {
        self.0[action.index()]
    }

    /// The highest-valued action. Ties go to the lowest index.
    #[must_use]
    pub fn best(&self) -> Action {
        let mut best = 0;
        for (i, v) in self.0.iter().enumerate().skip(1) {
            if *v > self.0[best] {
                best = i;
            }
        }
        Action::from_index(best).unwrap_or(Action::IncreaseMtu)
    }

    /// The highest value
    #[must_use]
    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Iterates over (action, value) pairs in index order
    pub fn pairs(&self) -> impl Iterator<Item = (Action, f64)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, v)| Action::from_index(i).map(|a| (a, *v)))
    }

    /// True if every value is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Display for ActionValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (action, value) in self.pairs() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{action}={value:.4}")?;
            first = false;
        }
        Ok(())
    }
}

/// Something that can estimate action values and learn from targets
pub trait ValueEstimator {
    /// Estimates the value of every action in `state`. Side-effect free.
    fn predict(&self, state: &State) -> ActionValues;

    /// Moves the estimate of `action` in `state` towards `target`.
    ///
    /// Returns the squared error of the estimate before the step.
    fn fit(&mut self, state: &State, action: Action, target: f64, learning_rate: f64) -> f64;

    /// Checks internal consistency, e.g. after deserialization or a training step
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// One fully connected layer; weights are row-major, one row per output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Dense {
    /// Xavier-uniform weights, zero biases
    fn xavier<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            biases: vec![0.; outputs],
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .chunks_exact(self.inputs)
            .zip(&self.biases)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }

    fn validate(&self) -> Result<(), String> {
        if self.inputs == 0 || self.outputs == 0 {
            return Err("empty layer".into());
        }
        if self.weights.len() != self.inputs * self.outputs || self.biases.len() != self.outputs {
            return Err(format!(
                "layer {}x{} has {} weights and {} biases",
                self.inputs,
                self.outputs,
                self.weights.len(),
                self.biases.len()
            ));
        }
        if !self.weights.iter().chain(&self.biases).all(|v| v.is_finite()) {
            return Err("non-finite parameter".into());
        }
        Ok(())
    }
}

/// A small multilayer perceptron estimating Q-values.
///
/// The input is the normalized [`State`], hidden layers use `tanh`, and the output layer
/// is linear with one unit per [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QNetwork {
    layers: Vec<Dense>,
}

/// Hidden layer sizes used unless configured otherwise
pub const DEFAULT_HIDDEN: [usize; 2] = [16, 16];

impl QNetwork {
    /// Creates a network with the given hidden layer sizes, initialised from `rng`
    #[must_use]
    pub fn new<R: Rng + ?Sized>(hidden: &[usize], rng: &mut R) -> Self {
        let mut sizes = Vec::with_capacity(hidden.len() + 2);
        sizes.push(STATE_DIM);
        sizes.extend(hidden.iter().map(|h| (*h).max(1)));
        sizes.push(ACTION_COUNT);
        let layers = sizes
            .windows(2)
            .map(|pair| Dense::xavier(pair[0], pair[1], rng))
            .collect();
        Self { layers }
    }

    /// Creates a network with reproducible initial weights
    #[must_use]
    pub fn seeded(hidden: &[usize], seed: u64) -> Self {
        Self::new(hidden, &mut StdRng::seed_from_u64(seed))
    }

    /// Total number of trainable parameters
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.biases.len())
            .sum()
    }

    /// Returns the input followed by the activation of every layer
    fn activations(&self, state: &State) -> Vec<Vec<f64>> {
        let last = self.layers.len().saturating_sub(1);
        let mut out = Vec::with_capacity(self.layers.len() + 1);
        out.push(state.features().to_vec());
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = layer.forward(&out[i]);
            if i != last {
                z.iter_mut().for_each(|v| *v = v.tanh());
            }
            out.push(z);
        }
        out
    }
}

impl ValueEstimator for QNetwork {
    fn predict(&self, state: &State) -> ActionValues {
        let mut values = [0.; ACTION_COUNT];
        if let Some(output) = self.activations(state).last() {
            for (v, o) in values.iter_mut().zip(output) {
                *v = *o;
            }
        }
        ActionValues(values)
    }

    fn fit(&mut self, state: &State, action: Action, target: f64, learning_rate: f64) -> f64 {
        let activations = self.activations(state);
        let Some(output) = activations.last() else {
            return 0.;
        };
        let error = output[action.index()] - target;

        // Gradient of ½(Q(s,a) - target)² with respect to each layer's pre-activation
        let mut delta = vec![0.; output.len()];
        delta[action.index()] = error;

        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            let input = &activations[i];
            let previous = if i > 0 {
                // Backpropagate through the old weights, then through tanh
                let mut d = vec![0.; layer.inputs];
                for (row, dj) in layer.weights.chunks_exact(layer.inputs).zip(&delta) {
                    for (di, w) in d.iter_mut().zip(row) {
                        *di += w * dj;
                    }
                }
                d.iter_mut()
                    .zip(input)
                    .for_each(|(di, a)| *di *= 1. - a * a);
                Some(d)
            } else {
                None
            };
            for ((row, b), dj) in layer
                .weights
                .chunks_exact_mut(layer.inputs)
                .zip(layer.biases.iter_mut())
                .zip(&delta)
            {
                for (w, x) in row.iter_mut().zip(input) {
                    *w -= learning_rate * dj * x;
                }
                *b -= learning_rate * dj;
            }
            if let Some(d) = previous {
                delta = d;
            }
        }
        error * error
    }

    fn validate(&self) -> Result<(), String> {
        let (Some(first), Some(last)) = (self.layers.first(), self.layers.last()) else {
            return Err("network has no layers".into());
        };
        if first.inputs != STATE_DIM {
            return Err(format!(
                "network expects {} inputs, state has {STATE_DIM}",
                first.inputs
            ));
        }
        if last.outputs != ACTION_COUNT {
            return Err(format!(
                "network has {} outputs, there are {ACTION_COUNT} actions",
                last.outputs
            ));
        }
        for pair in self.layers.windows(2) {
            if pair[0].outputs != pair[1].inputs {
                return Err("layer sizes do not chain".into());
            }
        }
        self.layers.iter().try_for_each(Dense::validate)
    }
}

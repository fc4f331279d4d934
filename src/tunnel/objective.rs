//! The shared objective: one weighting for both the analytical score and the learned reward
// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};

use super::Measurement;

/// Weights of the scalar objective `w1·throughput - w2·latency - w3·loss`.
///
/// Throughput is in Mbps, latency in ms and loss is a fraction.
/// The analytical model scores predictions with these weights, and the learned policy is
/// rewarded with them, so the two are directly comparable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    /// w1
    pub throughput: f64,
    /// w2
    pub latency: f64,
    /// w3
    pub loss: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            throughput: 0.5,
            latency: 0.3,
            loss: 0.2,
        }
    }
}

impl Weights {
    /// Computes the objective for the given quantities
    #[must_use]
    pub fn score(&self, throughput_mbps: f64, latency_ms: f64, loss_fraction: f64) -> f64 {
        self.throughput * throughput_mbps - self.latency * latency_ms - self.loss * loss_fraction
    }

    /// The reward earned by whatever action led to this measurement
    #[must_use]
    pub fn reward(&self, outcome: &Measurement) -> f64 {
        self.score(
            outcome.throughput_mbps,
            outcome.latency_ms,
            outcome.loss_fraction,
        )
    }
}

//! Configuration structure
// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};
use struct_field_names_as_array::FieldNamesAsSlice;

use crate::{
    model::{AnalyticalModel, Link},
    optimizer::DEFAULT_SMOOTHING_WINDOW,
    policy::{LifecycleConfig, PolicyConfig},
    tunnel::Weights,
};

/// The set of configurable options supported by wgtune.
///
/// **Note:** The implementation of `default()` for this struct returns wgtune's hard-wired
/// configuration defaults.
///
/// The structure is deliberately flat, so that every field can be set in a configuration
/// file or on the command line under the same name.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, FieldNamesAsSlice)]
pub struct Configuration {
    // LINK ============================================================================================
    /// Capacity of the local uplink, in Mbps
    pub local_mbps: f64,
    /// Egress capacity of the relay, in Mbps
    pub remote_mbps: f64,
    /// MTU of the path underneath the tunnel, in bytes
    pub path_mtu: u16,
    /// Encapsulation overhead per tunnelled packet, in bytes
    pub tunnel_overhead: u16,
    /// Fixed processing delay, in ms
    pub processing_ms: f64,
    /// Smallest propagation delay the model will infer, in ms
    pub propagation_floor_ms: f64,

    // OBJECTIVE =======================================================================================
    /// Objective weight of throughput (per Mbps)
    pub weight_throughput: f64,
    /// Objective weight of latency (per ms)
    pub weight_latency: f64,
    /// Objective weight of loss (per unit fraction)
    pub weight_loss: f64,

    // LEARNING ========================================================================================
    /// Discount factor
    pub gamma: f64,
    /// SGD step size
    pub learning_rate: f64,
    /// Initial exploration rate of a new policy
    pub epsilon_start: f64,
    /// Exploration rate floor
    pub epsilon_min: f64,
    /// Exploration decay per update
    pub epsilon_decay: f64,
    /// Width of each hidden layer
    pub hidden_units: usize,
    /// Seed for initial weights and simulations
    pub seed: u64,
    /// Experience replay capacity
    pub replay_capacity: usize,
    /// Experience replay batch size (0 to disable)
    pub replay_batch: usize,
    /// Transitions between refreshes of the target estimator (0 to bootstrap from the live one)
    pub target_sync: u64,

    // LIFECYCLE =======================================================================================
    /// Transitions required before the policy starts training
    pub min_transitions: u64,
    /// Consecutive predicted wins required to activate the policy
    pub activation_window: usize,
    /// Trailing reward window for degradation detection
    pub degradation_window: usize,
    /// Permitted mean reward shortfall before the policy is demoted
    pub degradation_margin: f64,
    /// Measurements averaged by the analytical recommendation
    pub smoothing_window: usize,

    // STORAGE =========================================================================================
    /// Where the learned policy is saved. `~` is expanded.
    pub model_file: String,
}

impl Default for Configuration {
    /// **(Unusual!)**
    /// Returns wgtune's hard-wired configuration defaults.
    fn default() -> Self {
        let link = Link::default();
        let weights = Weights::default();
        let policy = PolicyConfig::default();
        Self {
            local_mbps: link.local_mbps,
            remote_mbps: link.remote_mbps,
            path_mtu: link.path_mtu,
            tunnel_overhead: link.tunnel_overhead,
            processing_ms: link.processing_ms,
            propagation_floor_ms: link.propagation_floor_ms,

            weight_throughput: weights.throughput,
            weight_latency: weights.latency,
            weight_loss: weights.loss,

            gamma: policy.gamma,
            learning_rate: policy.learning_rate,
            epsilon_start: policy.epsilon_start,
            epsilon_min: policy.epsilon_min,
            epsilon_decay: policy.epsilon_decay,
            hidden_units: policy.hidden_units,
            seed: policy.seed,
            replay_capacity: policy.replay_capacity,
            replay_batch: policy.replay_batch,
            target_sync: policy.target_sync,

            min_transitions: policy.lifecycle.min_transitions,
            activation_window: policy.lifecycle.activation_window,
            degradation_window: policy.lifecycle.degradation_window,
            degradation_margin: policy.lifecycle.degradation_margin,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,

            model_file: "~/.wgtune-policy.json".into(),
        }
    }
}

/// A configuration value was out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigValueError {
    field: &'static str,
    problem: &'static str,
}

impl std::fmt::Display for ConfigValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration field `{}` {}", self.field, self.problem)
    }
}

impl std::error::Error for ConfigValueError {}

fn check(ok: bool, field: &'static str, problem: &'static str) -> Result<(), ConfigValueError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigValueError { field, problem })
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.
}

fn unit(v: f64) -> bool {
    (0. ..=1.).contains(&v)
}

impl Configuration {
    /// Checks every field is within its legal range
    pub fn validate(&self) -> Result<(), ConfigValueError> {
        check(positive(self.local_mbps), "local_mbps", "must be positive")?;
        check(positive(self.remote_mbps), "remote_mbps", "must be positive")?;
        check(
            self.path_mtu > self.tunnel_overhead,
            "path_mtu",
            "must exceed tunnel_overhead",
        )?;
        check(non_negative(self.processing_ms), "processing_ms", "must not be negative")?;
        check(
            non_negative(self.propagation_floor_ms),
            "propagation_floor_ms",
            "must not be negative",
        )?;
        for (field, w) in [
            ("weight_throughput", self.weight_throughput),
            ("weight_latency", self.weight_latency),
            ("weight_loss", self.weight_loss),
        ] {
            check(non_negative(w), field, "must not be negative")?;
        }
        check(unit(self.gamma) && self.gamma < 1., "gamma", "must be in [0, 1)")?;
        check(positive(self.learning_rate), "learning_rate", "must be positive")?;
        check(unit(self.epsilon_start), "epsilon_start", "must be in [0, 1]")?;
        check(unit(self.epsilon_min), "epsilon_min", "must be in [0, 1]")?;
        check(
            unit(self.epsilon_decay) && self.epsilon_decay > 0.,
            "epsilon_decay",
            "must be in (0, 1]",
        )?;
        check(self.hidden_units > 0, "hidden_units", "must be positive")?;
        check(self.activation_window > 0, "activation_window", "must be positive")?;
        check(self.degradation_window > 0, "degradation_window", "must be positive")?;
        check(self.smoothing_window > 0, "smoothing_window", "must be positive")?;
        check(
            non_negative(self.degradation_margin),
            "degradation_margin",
            "must not be negative",
        )?;
        check(!self.model_file.is_empty(), "model_file", "must not be empty")?;
        Ok(())
    }

    /// The link description
    #[must_use]
    pub fn link(&self) -> Link {
        Link {
            local_mbps: self.local_mbps,
            remote_mbps: self.remote_mbps,
            path_mtu: self.path_mtu,
            tunnel_overhead: self.tunnel_overhead,
            processing_ms: self.processing_ms,
            propagation_floor_ms: self.propagation_floor_ms,
        }
    }

    /// The objective weights
    #[must_use]
    pub fn weights(&self) -> Weights {
        Weights {
            throughput: self.weight_throughput,
            latency: self.weight_latency,
            loss: self.weight_loss,
        }
    }

    /// The analytical model this configuration describes
    #[must_use]
    pub fn analytical_model(&self) -> AnalyticalModel {
        AnalyticalModel::new(self.link(), self.weights())
    }

    /// The learned policy's hyperparameters
    #[must_use]
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            gamma: self.gamma,
            learning_rate: self.learning_rate,
            epsilon_start: self.epsilon_start,
            epsilon_min: self.epsilon_min,
            epsilon_decay: self.epsilon_decay,
            hidden_units: self.hidden_units,
            seed: self.seed,
            replay_capacity: self.replay_capacity,
            replay_batch: self.replay_batch,
            target_sync: self.target_sync,
            lifecycle: LifecycleConfig {
                min_transitions: self.min_transitions,
                activation_window: self.activation_window,
                degradation_window: self.degradation_window,
                degradation_margin: self.degradation_margin,
            },
        }
    }
}

//! Closed-form performance prediction
// (c) 2024 Ross Younger

use human_repr::HumanThroughput as _;
use serde::{Deserialize, Serialize};

use super::queueing::{packet_rate, queueing_delay_ms, Utilisation};
use crate::{
    error::OptimizerError,
    tunnel::{Measurement, ParameterSet, Weights},
};

/// Each extra fragment is lost with at least this probability, even on an apparently clean link.
pub const MIN_FRAGMENT_LOSS: f64 = 0.001;

/// Static description of the tunnel's underlying path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Local uplink capacity (`B_local`), Mbps
    pub local_mbps: f64,
    /// Relay egress capacity (`B_ec2`), Mbps
    pub remote_mbps: f64,
    /// MTU of the path the encrypted packets travel over, bytes
    pub path_mtu: u16,
    /// Bytes of encapsulation added to every tunnelled packet
    pub tunnel_overhead: u16,
    /// Fixed per-packet processing delay, ms
    pub processing_ms: f64,
    /// Lower bound on propagation delay, ms
    pub propagation_floor_ms: f64,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            local_mbps: 1.5,
            remote_mbps: 1000.,
            path_mtu: 1500,
            // WireGuard over IPv6
            tunnel_overhead: 80,
            processing_ms: 1.,
            propagation_floor_ms: 20.,
        }
    }
}

impl Link {
    /// The largest tunnel MTU that does not fragment on the underlying path
    #[must_use]
    pub fn fragmentation_threshold(&self) -> u16 {
        self.path_mtu.saturating_sub(self.tunnel_overhead)
    }

    /// Number of fragments an encapsulated packet of `mtu` bytes turns into
    #[must_use]
    pub fn fragment_count(&self, mtu: u16) -> u32 {
        let outer = u32::from(mtu) + u32::from(self.tunnel_overhead);
        outer.div_ceil(u32::from(self.path_mtu.max(1)))
    }
}

/// Link conditions inferred from a measurement.
///
/// These do not depend on the candidate configuration being assessed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Conditions {
    /// Congestion level, 0 to 1
    pub congestion: f64,
    /// Propagation delay, ms
    pub propagation_ms: f64,
    /// Loss we actually observed
    pub observed_loss: f64,
}

/// What the model expects of a configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// `T_eff`, Mbps
    pub effective_throughput_mbps: f64,
    /// `L_total`, ms
    pub total_latency_ms: f64,
    /// `P_loss`
    pub loss_probability: f64,
    /// Component of loss due to congestion
    pub congestion_loss: f64,
    /// Component of loss due to buffer overflow
    pub buffer_loss: f64,
    /// Component of loss due to fragmentation
    pub fragmentation_loss: f64,
    /// Mean queue length, packets
    pub queue_length: f64,
    /// Mean queueing delay, ms
    pub queueing_delay_ms: f64,
    /// Queue utilisation after clamping
    pub utilisation: f64,
    /// Whether utilisation had to be clamped
    pub saturated: bool,
    /// The weighted objective
    pub score: f64,
}

impl Prediction {
    /// Returns the `UnstableQueue` condition if this prediction is saturated
    #[must_use]
    pub fn instability(&self, unclamped_rho: f64) -> Option<OptimizerError> {
        self.saturated
            .then_some(OptimizerError::UnstableQueue { rho: unclamped_rho })
    }

    /// What a monitor would measure if this prediction came true
    #[must_use]
    pub fn as_measurement(&self, timestamp: f64) -> Measurement {
        Measurement {
            throughput_mbps: self.effective_throughput_mbps,
            latency_ms: self.total_latency_ms,
            loss_fraction: self.loss_probability,
            timestamp,
        }
    }

    /// One-line description for logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "throughput {tp}, latency {lat:.1}ms, loss {loss:.2}%, score {score:.3}{sat}",
            tp = (self.effective_throughput_mbps * 125_000.).human_throughput_bytes(),
            lat = self.total_latency_ms,
            loss = self.loss_probability * 100.,
            score = self.score,
            sat = if self.saturated { " (saturated)" } else { "" },
        )
    }
}

/// Network-flow and queueing model of the tunnel.
///
/// Pure: the same inputs always give the same outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticalModel {
    link: Link,
    weights: Weights,
}

impl AnalyticalModel {
    /// Constructor
    #[must_use]
    pub fn new(link: Link, weights: Weights) -> Self {
        Self { link, weights }
    }

    /// Link accessor
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Weights accessor
    #[must_use]
    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// A copy of this model with a different local capacity
    #[must_use]
    pub fn with_local_capacity(&self, local_mbps: f64) -> Self {
        let mut out = *self;
        out.link.local_mbps = local_mbps;
        out
    }

    /// Congestion level implied by a measurement.
    ///
    /// The mean of latency (saturating at 200ms) and loss (saturating at 10%).
    #[must_use]
    pub fn congestion_level(measurement: &Measurement) -> f64 {
        let latency = (measurement.latency_ms / 200.).clamp(0., 1.);
        let loss = (measurement.loss_fraction / 0.1).clamp(0., 1.);
        (latency + loss) / 2.
    }

    fn utilisation(&self, mtu: u16) -> (Utilisation, f64) {
        let arrival = packet_rate(self.link.local_mbps, mtu);
        let service = packet_rate(self.link.remote_mbps, mtu);
        (Utilisation::new(arrival, service), service)
    }

    /// Infers the conditions on the link from a measurement taken while running `current`.
    ///
    /// Propagation delay is whatever part of the measured latency the model cannot otherwise
    /// account for, but never less than the configured floor.
    #[must_use]
    pub fn conditions(&self, measurement: &Measurement, current: &ParameterSet) -> Conditions {
        let (util, service) = self.utilisation(current.mtu());
        let queueing = queueing_delay_ms(util.mean_queue_length(), service);
        let propagation = (measurement.latency_ms - queueing - self.link.processing_ms)
            .max(self.link.propagation_floor_ms);
        Conditions {
            congestion: Self::congestion_level(measurement),
            propagation_ms: propagation,
            observed_loss: measurement.loss_fraction.clamp(0., 1.),
        }
    }

    /// Probability that a packet is lost because one of its extra fragments was.
    ///
    /// Zero at or below the fragmentation threshold; non-decreasing in MTU.
    #[must_use]
    pub fn fragmentation_loss(&self, mtu: u16, observed_loss: f64) -> f64 {
        let extra = self.link.fragment_count(mtu).saturating_sub(1);
        if extra == 0 {
            return 0.;
        }
        let per_fragment = observed_loss.clamp(MIN_FRAGMENT_LOSS, 1.);
        let survive = (1. - per_fragment).powi(i32::try_from(extra).unwrap_or(i32::MAX));
        (1. - survive).clamp(0., 1.)
    }

    /// Predicts the performance of `params` under `conditions`
    #[must_use]
    pub fn predict(&self, params: &ParameterSet, conditions: &Conditions) -> Prediction {
        let (util, service) = self.utilisation(params.mtu());

        let congestion_loss = 0.1 * conditions.congestion.powi(2);
        let k = f64::from(params.buffer_size()) * (1. - conditions.congestion);
        let buffer_loss = util.overflow_probability(k);
        let fragmentation_loss = self.fragmentation_loss(params.mtu(), conditions.observed_loss);
        let loss = (1.
            - (1. - congestion_loss) * (1. - buffer_loss) * (1. - fragmentation_loss))
            .clamp(0., 1.);

        let throughput =
            (self.link.local_mbps * (1. - loss)).clamp(0., self.link.local_mbps.max(0.));

        let queue_length = util.mean_queue_length();
        let queueing = queueing_delay_ms(queue_length, service);
        let latency = conditions.propagation_ms + queueing + self.link.processing_ms;

        Prediction {
            effective_throughput_mbps: throughput,
            total_latency_ms: latency,
            loss_probability: loss,
            congestion_loss,
            buffer_loss,
            fragmentation_loss,
            queue_length,
            queueing_delay_ms: queueing,
            utilisation: util.rho,
            saturated: util.saturated,
            score: self.weights.score(throughput, latency, loss),
        }
    }

    /// Predicts the performance of `current` itself, calibrated against a measurement taken with it
    #[must_use]
    pub fn evaluate(&self, current: &ParameterSet, measurement: &Measurement) -> Prediction {
        self.predict(current, &self.conditions(measurement, current))
    }

    /// The unclamped utilisation for a given MTU (for reporting)
    #[must_use]
    pub fn raw_utilisation(&self, mtu: u16) -> f64 {
        self.utilisation(mtu).0.raw
    }
}

// (c) 2024 Ross Younger

//! # Analytical performance model
//!
//! A closed-form model of the tunnel, combining network-flow reasoning for throughput
//! with M/M/1 queueing theory for latency and buffer overflow.
//!
//! ## Variables
//!
//! * `B_local`: the local uplink capacity. This is assumed to be very small (1.5 Mbps by default).
//! * `B_ec2`: the relay's egress capacity (1 Gbps by default).
//! * `λ = B_local / (mtu·8e-6)` and `μ = B_ec2 / (mtu·8e-6)`, arrival and service rates
//!   in packets/s.
//! * `ρ = λ/μ`, the utilisation. This must stay below 1; if it does not, it is clamped
//!   to `1 - 0.01` and the prediction is flagged as _saturated_.
//!
//! ## Loss
//!
//! Packet loss is the complement of three independent non-loss probabilities:
//!
//! ```text
//! P_loss = 1 - (1 - p_cong)(1 - p_buf)(1 - p_frag)
//! ```
//!
//! * `p_cong = 0.1·c²`, where `c` is the congestion level inferred from the measured
//!   latency and loss.
//! * `p_buf = ρ^K (1-ρ)` is the M/M/1/K overflow probability, with `K = buffer_size·(1-c)`.
//! * `p_frag` is the chance of losing one of the extra fragments of a packet that no longer
//!   fits in the underlying path MTU once encapsulated.
//!
//! ## Throughput, latency and score
//!
//! ```text
//! T_eff   = B_local·(1 - P_loss)
//! L_total = L_prop + Q_queue/μ·1000 + L_process,   Q_queue = ρ/(1-ρ)
//! score   = w1·T_eff - w2·L_total - w3·P_loss
//! ```
//!
//! `L_prop` is inferred from the measurement (whatever latency the model cannot otherwise explain)
//! and is never less than 20 ms.
//!
//! **Caution:** the formulae are a heuristic prior. They have not been validated against
//! real network traces.

mod analytical;
pub use analytical::{AnalyticalModel, Conditions, Link, Prediction, MIN_FRAGMENT_LOSS};

pub mod queueing;

mod report;
pub use report::{Improvement, Report};

mod search;
pub use search::{
    MtuDirection, Recommendation, BUFFER_SEARCH_STEP, LATENCY_INCREASE_THRESHOLD,
    LOSS_DECREASE_THRESHOLD, LOSS_INCREASE_THRESHOLD, MTU_SEARCH_STEP,
};

mod upgrade;
pub use upgrade::{UpgradeAdvice, UpgradeOption, UPGRADE_OPTIONS};

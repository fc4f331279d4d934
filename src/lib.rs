// (c) 2024 Ross Younger

//! # wgtune: tunnel parameter optimizer
//!
//! wgtune chooses the MTU, queue size and routing flags of a point-to-point encrypted
//! tunnel whose local uplink is very slow (around 1.5 Mbps) while the far end sits on a
//! fast relay.
//!
//! Two decision-makers cooperate:
//!
//! * The [analytical model](model) predicts throughput, latency and loss for any
//!   configuration using M/M/1/K queueing theory, and searches for a better one.
//! * The [learned policy](policy) is an online Q-learning agent. It watches the
//!   outcome of each decision and takes over from the analytical model only once it
//!   has shown it can do better. It is demoted again if its results fall behind.
//!
//! The [`Optimizer`](optimizer::Optimizer) runs the decision loop that ties them together.
//!
//! ## Usage
//!
//! ```text
//! wgtune predict   --throughput 1.2 --latency 60 --loss 0.01 --mtu 1420
//! wgtune recommend --throughput 1.1 --latency 85 --loss 0.06 --mtu 1500
//! wgtune report    --throughput 1.1 --latency 85 --loss 0.06
//! wgtune train     --episodes 200
//! wgtune evaluate  --throughput 1.1 --latency 85 --loss 0.06
//! wgtune decide    --input measurements.jsonl
//! ```
//!
//! Every command accepts `--json` for machine-readable output.
//! See [config] for the configuration files and options.
//!
//! ## Logging
//!
//! Log output goes to stderr and may be tuned with `RUST_LOG` in the usual way,
//! e.g. `RUST_LOG=wgtune::policy=trace`. With `--log-file`, `RUST_LOG_FILE_DETAIL`
//! sets the file's level independently.

mod cli;
pub use cli::cli;

pub mod config;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod policy;
pub mod tunnel;
pub mod util;

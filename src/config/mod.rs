// (c) 2024 Ross Younger
//! # Configuration management
//!
//! wgtune obtains run-time configuration from the following sources,
//! in increasing order of precedence:
//! 1. Hard-wired defaults
//! 2. The system-wide configuration file (`/etc/wgtune.toml`)
//! 3. The user's configuration file (`~/.wgtune.toml`)
//! 4. A configuration file given with `--config`
//! 5. Command-line options
//!
//! Each option may appear in multiple places; the highest precedence source wins.
//!
//! ## File format
//!
//! Configuration files are TOML. All fields live at the top level.
//!
//! ### Example
//!
//! ```toml
//! # We have a 2Mbit VDSL uplink
//! local_mbps = 2.0
//! # The tunnel runs over PPPoE
//! path_mtu = 1492
//! # Latency matters more to us than throughput
//! weight_latency = 0.5
//! weight_throughput = 0.3
//! model_file = "/var/lib/wgtune/policy.json"
//! ```
//!
//! ## Configurable options
//!
//! The full list of supported fields is defined by [Configuration].
//!
//! On the command line:
//! * `wgtune --show-config` outputs a list of supported fields, their current values,
//!   and where each value came from.
//! * `wgtune --config-files` outputs the list of configuration files for the current user.

mod structure;
pub use structure::{ConfigValueError, Configuration};

mod manager;
pub use manager::{DisplayAdapter, Manager};

pub(crate) const BASE_CONFIG_FILENAME: &str = "wgtune.toml";

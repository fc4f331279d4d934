// wgtune command-line arguments
// (c) 2024 Ross Younger

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use figment::{value::Dict, value::Map, Metadata, Profile, Provider};
use serde::Serialize;

use super::styles::CLAP_STYLES;
use crate::tunnel::{Measurement, ParameterSet};

#[derive(Debug, Parser, Clone)]
#[command(
    author,
    version(env!("WGTUNE_VERSION_STRING")),
    about,
    before_help = "e.g.   wgtune recommend --throughput 1.1 --latency 85 --loss 0.06 --mtu 1500",
    infer_long_args(true)
)]
#[command(help_template(
    "\
{name} version {version}
{about-with-newline}
{usage-heading} {usage}
{before-help}
{all-args}{after-help}
"
))]
#[command(styles=CLAP_STYLES)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct CliArgs {
    // CONFIGURATION ===========================================================================
    /// Outputs the configuration, then exits.
    ///
    /// If a subcommand is given, the configuration it would use is shown.
    /// Each value is shown along with where it came from.
    #[arg(long, help_heading("Configuration"), display_order(0))]
    pub show_config: bool,

    /// Outputs the paths of the configuration files we read, then exits
    #[arg(long, help_heading("Configuration"), display_order(0))]
    pub config_files: bool,

    /// Reads an additional configuration file, which must exist.
    /// It takes precedence over the system and user configuration files.
    #[arg(short, long, global(true), value_name("FILE"), help_heading("Configuration"))]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    // OUTPUT ==================================================================================
    /// Quiet mode: reports only errors
    #[arg(short, long, action, global(true), conflicts_with("debug"), help_heading("Output"))]
    pub quiet: bool,

    /// Outputs results as JSON
    #[arg(long, action, global(true), help_heading("Output"))]
    pub json: bool,

    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=wgtune=trace` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, global(true), help_heading("Debug"))]
    pub debug: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL`
    /// (same semantics as `RUST_LOG`).
    #[arg(short('l'), long, action, global(true), help_heading("Debug"), value_name("FILE"))]
    pub log_file: Option<String>,

    // COMMAND =================================================================================
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Command {
    /// Predicts the performance of a configuration with the analytical model
    Predict {
        #[command(flatten)]
        measurement: MeasurementArgs,
        #[command(flatten)]
        parameters: ParameterArgs,
    },
    /// Recommends a configuration with the analytical model
    Recommend {
        #[command(flatten)]
        measurement: MeasurementArgs,
        #[command(flatten)]
        parameters: ParameterArgs,
    },
    /// Runs the full optimizer over a series of measurements, learning as it goes.
    ///
    /// Measurements are read as JSON objects, one per line, with fields
    /// `throughput_mbps`, `latency_ms`, `loss_fraction` and optionally `timestamp`.
    /// Each decision is assumed to have been applied before the next measurement.
    /// The learned policy is saved afterwards.
    Decide {
        /// Reads measurements from this file instead of standard input
        #[arg(short, long, value_name("FILE"))]
        input: Option<PathBuf>,
        /// Disables exploration by the learned policy
        #[arg(long)]
        no_explore: bool,
        #[command(flatten)]
        parameters: ParameterArgs,
    },
    /// Trains the learned policy on simulated episodes, then saves it
    Train {
        /// Number of episodes
        #[arg(short = 'n', long, default_value_t = 100)]
        episodes: usize,
    },
    /// Shows the learned policy's estimated action values for a measurement
    Evaluate {
        #[command(flatten)]
        measurement: MeasurementArgs,
    },
    /// Compares the current configuration with the best the model can find,
    /// and assesses connection upgrades
    Report {
        #[command(flatten)]
        measurement: MeasurementArgs,
        #[command(flatten)]
        parameters: ParameterArgs,
    },
}

/// A measurement given on the command line
#[derive(Debug, Clone, Copy, Args)]
pub(crate) struct MeasurementArgs {
    /// Measured throughput
    #[arg(short, long, value_name("Mbps"), help_heading("Measurement"))]
    pub throughput: f64,
    /// Measured round-trip latency
    #[arg(short = 'L', long, value_name("ms"), help_heading("Measurement"))]
    pub latency: f64,
    /// Measured packet loss, as a fraction
    #[arg(short = 'p', long, value_name("fraction"), help_heading("Measurement"))]
    pub loss: f64,
}

impl From<MeasurementArgs> for Measurement {
    fn from(a: MeasurementArgs) -> Self {
        Measurement::now(a.throughput, a.latency, a.loss)
    }
}

/// The configuration currently in force
#[derive(Debug, Clone, Copy, Args)]
pub(crate) struct ParameterArgs {
    /// Tunnel MTU, bytes
    #[arg(long, default_value_t = 1420, help_heading("Current parameters"))]
    pub mtu: u16,
    /// Queue size, packets
    #[arg(long, default_value_t = 1000, help_heading("Current parameters"))]
    pub buffer: u32,
    /// Split routing is on
    #[arg(long, help_heading("Current parameters"))]
    pub split_routing: bool,
    /// Priority routing is on
    #[arg(long, help_heading("Current parameters"))]
    pub priority: bool,
}

impl From<ParameterArgs> for ParameterSet {
    fn from(a: ParameterArgs) -> Self {
        ParameterSet::clamped(a.mtu, a.buffer, a.split_routing, a.priority)
    }
}

/// Configuration fields that may be set on the command line.
///
/// Anything not given falls through to the configuration files and defaults.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub(crate) struct ConfigOverrides {
    /// Capacity of the local uplink [default: 1.5]
    #[arg(long, global(true), value_name("Mbps"), help_heading("Link"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_mbps: Option<f64>,
    /// Egress capacity of the relay [default: 1000]
    #[arg(long, global(true), value_name("Mbps"), help_heading("Link"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_mbps: Option<f64>,
    /// MTU of the path underneath the tunnel [default: 1500]
    #[arg(long, global(true), value_name("bytes"), help_heading("Link"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_mtu: Option<u16>,
    /// Encapsulation overhead per packet [default: 80]
    #[arg(long, global(true), value_name("bytes"), help_heading("Link"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_overhead: Option<u16>,

    /// Objective weight of throughput [default: 0.5]
    #[arg(long, global(true), help_heading("Objective"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_throughput: Option<f64>,
    /// Objective weight of latency [default: 0.3]
    #[arg(long, global(true), help_heading("Objective"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_latency: Option<f64>,
    /// Objective weight of loss [default: 0.2]
    #[arg(long, global(true), help_heading("Objective"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_loss: Option<f64>,

    /// Discount factor [default: 0.9]
    #[arg(long, global(true), help_heading("Learning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    /// Learning rate [default: 0.01]
    #[arg(long, global(true), help_heading("Learning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    /// Random seed for new policies and simulation [default: 0]
    #[arg(long, global(true), help_heading("Learning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Experience replay batch size; 0 disables [default: 0]
    #[arg(long, global(true), help_heading("Learning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_batch: Option<usize>,
    /// Transitions needed before the policy starts training [default: 50]
    #[arg(long, global(true), help_heading("Learning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_transitions: Option<u64>,

    /// Where the learned policy is kept [default: ~/.wgtune-policy.json]
    #[arg(long, global(true), value_name("FILE"), help_heading("Learning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_file: Option<String>,
}

impl Provider for ConfigOverrides {
    fn metadata(&self) -> Metadata {
        Metadata::named("command-line").interpolater(|_profile, path| {
            let key = path
                .last()
                .map_or("<unknown>".to_string(), |s| s.replace('_', "-"));
            format!("--{key}")
        })
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

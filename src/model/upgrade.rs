//! What-if analysis: would a faster local connection help?
// (c) 2024 Ross Younger

use serde::Serialize;

use super::{AnalyticalModel, Prediction};
use crate::tunnel::{Measurement, ParameterSet};

/// A throughput improvement factor above this makes an upgrade worthwhile
const UPGRADE_THRESHOLD: f64 = 5.0;

/// Connection upgrades we know how to assess: name and capacity in Mbps
pub const UPGRADE_OPTIONS: [(&str, f64); 3] = [
    ("50Mbps Fiber", 50.),
    ("100Mbps Fiber", 100.),
    ("Starlink", 150.),
];

/// Predicted outcome of one upgrade option
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeOption {
    /// Option name
    pub name: String,
    /// Local capacity with this option, Mbps
    pub capacity_mbps: f64,
    /// Predicted performance
    pub prediction: Prediction,
    /// New effective throughput as a multiple of the current one
    pub throughput_factor: f64,
    /// Current latency as a multiple of the new one (higher is better)
    pub latency_factor: f64,
}

/// Outcome of an upgrade assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeAdvice {
    /// Whether the best option is a big enough improvement to be worth it
    pub should_upgrade: bool,
    /// Current effective throughput, Mbps
    pub current_throughput_mbps: f64,
    /// All options, best score first
    pub options: Vec<UpgradeOption>,
}

impl UpgradeAdvice {
    /// The highest scoring option
    #[must_use]
    pub fn best(&self) -> Option<&UpgradeOption> {
        self.options.first()
    }

    /// Human-readable recommendation
    #[must_use]
    pub fn recommendation(&self) -> String {
        let Some(best) = self.best() else {
            return "No upgrade options were assessed.".into();
        };
        format!(
            "Current throughput: {cur:.2} Mbps. Recommended upgrade: {name} with {cap:.0} Mbps \
             would provide {tf:.1}x throughput improvement and {lf:.1}x latency improvement.",
            cur = self.current_throughput_mbps,
            name = best.name,
            cap = best.capacity_mbps,
            tf = best.throughput_factor,
            lf = best.latency_factor,
        )
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0. {
        numerator / denominator
    } else if numerator > 0. {
        f64::INFINITY
    } else {
        1.
    }
}

impl AnalyticalModel {
    /// Assesses each of [`UPGRADE_OPTIONS`] against the current configuration
    #[must_use]
    pub fn assess_upgrades(
        &self,
        measurement: &Measurement,
        current: &ParameterSet,
    ) -> UpgradeAdvice {
        let now = self.evaluate(current, measurement);
        let conditions = self.conditions(measurement, current);
        let mut options: Vec<_> = UPGRADE_OPTIONS
            .iter()
            .map(|(name, capacity)| {
                let prediction = self
                    .with_local_capacity(*capacity)
                    .predict(current, &conditions);
                UpgradeOption {
                    name: (*name).to_string(),
                    capacity_mbps: *capacity,
                    throughput_factor: ratio(
                        prediction.effective_throughput_mbps,
                        now.effective_throughput_mbps,
                    ),
                    latency_factor: ratio(now.total_latency_ms, prediction.total_latency_ms),
                    prediction,
                }
            })
            .collect();
        options.sort_by(|a, b| b.prediction.score.total_cmp(&a.prediction.score));
        let should_upgrade = options
            .first()
            .is_some_and(|o| o.throughput_factor > UPGRADE_THRESHOLD);
        UpgradeAdvice {
            should_upgrade,
            current_throughput_mbps: now.effective_throughput_mbps,
            options,
        }
    }
}

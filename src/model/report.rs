//! Summary of where we are and where the model thinks we could be
// (c) 2024 Ross Younger

use std::fmt::Display;

use serde::Serialize;

use super::{AnalyticalModel, Prediction, UpgradeAdvice};
use crate::tunnel::{Measurement, ParameterSet};

/// Percentage improvements of the optimal configuration over the current one
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Improvement {
    /// Throughput gain, %
    pub throughput_percent: f64,
    /// Latency reduction, %
    pub latency_percent: f64,
    /// Loss reduction, %
    pub loss_percent: f64,
    /// Score change, % of the magnitude of the current score
    pub score_percent: f64,
}

fn percent_gain(now: f64, then: f64) -> f64 {
    if now.abs() < f64::EPSILON {
        0.
    } else {
        (then / now - 1.) * 100.
    }
}

fn percent_reduction(now: f64, then: f64) -> f64 {
    if now.abs() < f64::EPSILON {
        0.
    } else {
        (1. - then / now) * 100.
    }
}

/// A full analytical report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Configuration in use
    pub current: ParameterSet,
    /// Its predicted performance
    pub current_prediction: Prediction,
    /// Best configuration on the search grid
    pub optimal: ParameterSet,
    /// Its predicted performance
    pub optimal_prediction: Prediction,
    /// Optimal versus current
    pub improvement: Improvement,
    /// Connection upgrade assessment
    pub upgrade: UpgradeAdvice,
}

impl AnalyticalModel {
    /// Builds a [`Report`]
    #[must_use]
    pub fn report(&self, measurement: &Measurement, current: &ParameterSet) -> Report {
        let now = self.evaluate(current, measurement);
        let (optimal, best) = self.optimize(measurement, current);
        let improvement = Improvement {
            throughput_percent: percent_gain(
                now.effective_throughput_mbps,
                best.effective_throughput_mbps,
            ),
            latency_percent: percent_reduction(now.total_latency_ms, best.total_latency_ms),
            loss_percent: percent_reduction(now.loss_probability, best.loss_probability),
            score_percent: if now.score.abs() < f64::EPSILON {
                0.
            } else {
                (best.score - now.score) / now.score.abs() * 100.
            },
        };
        Report {
            current: *current,
            current_prediction: now,
            optimal,
            optimal_prediction: best,
            improvement,
            upgrade: self.assess_upgrades(measurement, current),
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Current: {}", self.current)?;
        writeln!(f, "  {}", self.current_prediction.summary())?;
        writeln!(f, "Optimal: {}", self.optimal)?;
        writeln!(f, "  {}", self.optimal_prediction.summary())?;
        writeln!(
            f,
            "Improvement: throughput {:+.1}%, latency {:+.1}%, loss {:+.1}%",
            self.improvement.throughput_percent,
            self.improvement.latency_percent,
            self.improvement.loss_percent
        )?;
        write!(f, "{}", self.upgrade.recommendation())
    }
}

#[cfg(test)]
mod test {
    use assertables::{assert_contains, assert_ge};

    use crate::{
        model::{AnalyticalModel, Link},
        tunnel::{Measurement, ParameterSet, Weights},
    };

    #[test]
    fn oversized_mtu_report() {
        let m = AnalyticalModel::new(Link::default(), Weights::default());
        let meas = Measurement {
            throughput_mbps: 1.1,
            latency_ms: 70.,
            loss_fraction: 0.04,
            timestamp: 0.,
        };
        let current = ParameterSet::clamped(1500, 1000, false, false);
        let report = m.report(&meas, &current);
        // Dropping below the fragmentation threshold removes fragmentation loss
        assert!(report.optimal.mtu() <= 1420);
        assert_ge!(report.improvement.loss_percent, 0.);
        assert_ge!(report.improvement.throughput_percent, 0.);
        let text = report.to_string();
        assert_contains!(text, "Optimal: mtu");
        assert_contains!(text, "Recommended upgrade");
    }
}

//! Error conditions raised inside the optimization core
// (c) 2024 Ross Younger

use std::fmt::Display;

/// Everything that can go wrong inside the optimizer.
///
/// None of these are fatal. The [`Optimizer`](crate::optimizer::Optimizer) logs them
/// and falls back to the analytical recommendation, or to the last valid parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerError {
    /// A measurement field was non-finite or outside its legal range.
    /// The cycle is skipped.
    InvalidMeasurement {
        /// Name of the offending field
        field: &'static str,
        /// The value we were given
        value: f64,
    },
    /// Queue utilisation reached (or exceeded) 1.
    /// This is reported on a prediction; it is never returned from the model.
    UnstableQueue {
        /// The unclamped utilisation
        rho: f64,
    },
    /// A persisted policy snapshot was corrupt or incompatible.
    ModelLoad(String),
    /// The learned policy realised less reward than the analytical baseline.
    DegradedPolicy {
        /// Trailing mean reward shortfall against the baseline
        shortfall: f64,
    },
    /// A transition was unusable for training and has been dropped.
    TrainingAnomaly(String),
}

impl Display for OptimizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerError::InvalidMeasurement { field, value } => {
                write!(f, "invalid measurement: {field} = {value}")
            }
            OptimizerError::UnstableQueue { rho } => {
                write!(f, "queue is saturated (utilisation {rho:.4})")
            }
            OptimizerError::ModelLoad(why) => write!(f, "could not load policy model: {why}"),
            OptimizerError::DegradedPolicy { shortfall } => write!(
                f,
                "learned policy is underperforming the analytical baseline by {shortfall:.3}"
            ),
            OptimizerError::TrainingAnomaly(why) => write!(f, "transition dropped: {why}"),
        }
    }
}

impl std::error::Error for OptimizerError {}

#[cfg(test)]
mod test {
    use super::OptimizerError;

    #[test]
    fn display() {
        let e = OptimizerError::InvalidMeasurement {
            field: "latency_ms",
            value: f64::NAN,
        };
        assert_eq!(e.to_string(), "invalid measurement: latency_ms = NaN");
        let e = OptimizerError::DegradedPolicy { shortfall: 1.5 };
        assert!(e.to_string().contains("1.500"));
    }

    #[test]
    fn converts_to_anyhow() {
        let e: anyhow::Error = OptimizerError::ModelLoad("truncated".into()).into();
        assert_eq!(e.to_string(), "could not load policy model: truncated");
    }
}

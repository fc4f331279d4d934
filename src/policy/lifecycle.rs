//! When the learned policy is trusted
// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{error::OptimizerError, util::RollingWindow};

/// A learned proposal must out-score the analytical one by more than this to count as a win
pub const ACTIVATION_MARGIN: f64 = 1e-4;

/// Stage of the learned policy's lifecycle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Too little experience; only the analytical model decides
    #[default]
    Untrained,
    /// Learning while the analytical model decides
    Training,
    /// The learned policy decides
    Active,
}

/// Which component made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DecisionSource {
    /// The analytical model's recommendation
    Analytical,
    /// The learned policy's action
    Learned,
    /// Neither; the previous parameters were kept
    Fallback,
}

/// Lifecycle thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Accepted transitions needed before training starts
    pub min_transitions: u64,
    /// Consecutive cycles in which the learned proposal must out-score the analytical
    /// recommendation before the learned policy is activated
    pub activation_window: usize,
    /// Length of the trailing reward windows used to detect degradation
    pub degradation_window: usize,
    /// Permitted shortfall of the learned policy's trailing mean reward
    pub degradation_margin: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_transitions: 50,
            activation_window: 10,
            degradation_window: 10,
            degradation_margin: 0.5,
        }
    }
}

/// The lifecycle state machine
#[derive(Debug, Clone, PartialEq)]
pub struct Lifecycle {
    config: LifecycleConfig,
    stage: Stage,
    transitions: u64,
    consecutive_wins: usize,
    analytical_rewards: RollingWindow,
    learned_rewards: RollingWindow,
}

impl Lifecycle {
    /// A fresh lifecycle, with no experience
    #[must_use]
    pub fn new(config: LifecycleConfig) -> Self {
        Self::resume(config, 0)
    }

    /// Picks up with a given amount of previous experience.
    ///
    /// The learned policy is never activated immediately; it must re-earn that.
    #[must_use]
    pub fn resume(config: LifecycleConfig, transitions: u64) -> Self {
        let stage = if transitions >= config.min_transitions {
            Stage::Training
        } else {
            Stage::Untrained
        };
        Self {
            config,
            stage,
            transitions,
            consecutive_wins: 0,
            analytical_rewards: RollingWindow::new(config.degradation_window),
            learned_rewards: RollingWindow::new(config.degradation_window),
        }
    }

    /// Current stage
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Accepted transitions seen so far
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Current run of cycles in which the learned proposal out-scored the analytical one
    #[must_use]
    pub fn consecutive_wins(&self) -> usize {
        self.consecutive_wins
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Counts an accepted transition. Returns the new stage, if it changed.
    pub fn record_transition(&mut self) -> Option<Stage> {
        self.transitions += 1;
        if self.stage == Stage::Untrained && self.transitions >= self.config.min_transitions {
            info!(
                "learned policy has seen {} transitions; now training",
                self.transitions
            );
            self.stage = Stage::Training;
            return Some(Stage::Training);
        }
        None
    }

    /// Records one held-out comparison: the analytical model's score for the learned
    /// policy's proposal against its score for its own recommendation, both under the
    /// same conditions. Only meaningful in [`Stage::Training`].
    ///
    /// A proposal that merely ties (within [`ACTIVATION_MARGIN`]) is not a win.
    /// Returns the new stage, if it changed.
    pub fn record_comparison(&mut self, learned: f64, analytical: f64) -> Option<Stage> {
        if self.stage != Stage::Training {
            return None;
        }
        if learned > analytical + ACTIVATION_MARGIN {
            self.consecutive_wins += 1;
        } else {
            self.consecutive_wins = 0;
        }
        debug!(
            "learned {learned:.4} vs analytical {analytical:.4}: {} consecutive wins",
            self.consecutive_wins
        );
        if self.consecutive_wins >= self.config.activation_window {
            info!(
                "learned proposals beat the analytical model {} times running; activating",
                self.consecutive_wins
            );
            self.stage = Stage::Active;
            self.consecutive_wins = 0;
            self.learned_rewards.clear();
            return Some(Stage::Active);
        }
        None
    }

    /// Records the reward realised by a decision.
    ///
    /// If the learned policy is active and its trailing mean reward falls short of the
    /// analytical baseline by more than the margin, it is demoted to [`Stage::Training`]
    /// and the [`OptimizerError::DegradedPolicy`] condition is returned.
    pub fn record_reward(&mut self, source: DecisionSource, reward: f64) -> Option<OptimizerError> {
        match source {
            DecisionSource::Analytical => self.analytical_rewards.push(reward),
            DecisionSource::Learned => self.learned_rewards.push(reward),
            DecisionSource::Fallback => return None,
        }
        if self.stage != Stage::Active || !self.learned_rewards.is_full() {
            return None;
        }
        let (Some(learned), Some(baseline)) =
            (self.learned_rewards.mean(), self.analytical_rewards.mean())
        else {
            return None;
        };
        let shortfall = baseline - learned;
        if shortfall <= self.config.degradation_margin {
            return None;
        }
        let err = OptimizerError::DegradedPolicy { shortfall };
        warn!("{err}; reverting to analytical control");
        self.stage = Stage::Training;
        self.consecutive_wins = 0;
        self.learned_rewards.clear();
        Some(err)
    }
}

//! The unit of online learning
// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};

use super::{Action, Measurement, State, Weights};

/// One observed step: in `state` we took `action`, earned `reward` and arrived in `next_state`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Where we were
    pub state: State,
    /// What we did
    pub action: Action,
    /// What it earned
    pub reward: f64,
    /// Where we ended up
    pub next_state: State,
    /// The episode ended here, so nothing is bootstrapped from `next_state`
    #[serde(default)]
    pub done: bool,
}

impl Transition {
    /// Builds a transition from two consecutive measurements.
    ///
    /// The reward is computed from `after`, with the given weights.
    /// Live links never end, so the transition is not terminal.
    #[must_use]
    pub fn between(
        before: &Measurement,
        action: Action,
        after: &Measurement,
        weights: &Weights,
    ) -> Self {
        Self {
            state: before.state(),
            action,
            reward: weights.reward(after),
            next_state: after.state(),
            done: false,
        }
    }

    /// Marks this transition as the last of its episode
    #[must_use]
    pub fn terminal(self) -> Self {
        Self { done: true, ..self }
    }

    /// True if every number in this transition is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.reward.is_finite() && self.state.is_finite() && self.next_state.is_finite()
    }
}

//! Discrete adjustments the learned policy can make
// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};

use super::ParameterSet;

/// MTU adjustment made by a single learned action, in bytes
pub const ACTION_MTU_STEP: i32 = 40;

/// Number of distinct actions
pub const ACTION_COUNT: usize = 4;
static_assertions::const_assert_eq!(ACTION_COUNT, <Action as strum::EnumCount>::COUNT);

/// One adjustment to a [`ParameterSet`].
///
/// The discriminants are stable; they index the estimator's outputs.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumCount,
    strum::VariantArray,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Raise the MTU by [`ACTION_MTU_STEP`] bytes
    IncreaseMtu = 0,
    /// Lower the MTU by [`ACTION_MTU_STEP`] bytes
    DecreaseMtu = 1,
    /// Switch between full and split routing
    ToggleSplitRouting = 2,
    /// Switch the routing priority flag
    TogglePriority = 3,
}

impl Action {
    /// Index of this action in the estimator's output vector
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`Action::index`]
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        <Self as strum::VariantArray>::VARIANTS.get(index).copied()
    }

    /// Applies this action. MTU changes are clamped into range.
    #[must_use]
    pub fn apply(self, params: &ParameterSet) -> ParameterSet {
        let mut out = *params;
        match self {
            Action::IncreaseMtu => out = out.with_mtu_delta(ACTION_MTU_STEP),
            Action::DecreaseMtu => out = out.with_mtu_delta(-ACTION_MTU_STEP),
            Action::ToggleSplitRouting => out.split_routing = !out.split_routing,
            Action::TogglePriority => out.priority_aws = !out.priority_aws,
        }
        out
    }

    /// Works out which single action explains a change of configuration, if any.
    ///
    /// MTU movement takes precedence over flag changes; buffer changes are not attributable.
    #[must_use]
    pub fn between(before: &ParameterSet, after: &ParameterSet) -> Option<Self> {
        use std::cmp::Ordering;
        match after.mtu().cmp(&before.mtu()) {
            Ordering::Greater => return Some(Action::IncreaseMtu),
            Ordering::Less => return Some(Action::DecreaseMtu),
            Ordering::Equal => (),
        }
        if after.split_routing != before.split_routing {
            Some(Action::ToggleSplitRouting)
        } else if after.priority_aws != before.priority_aws {
            Some(Action::TogglePriority)
        } else {
            None
        }
    }
}

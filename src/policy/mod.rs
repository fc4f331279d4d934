// (c) 2024 Ross Younger

//! # Learned policy
//!
//! An online Q-learning agent over the discrete [`Action`](crate::tunnel::Action)s.
//!
//! The agent's estimator sits behind the [`ValueEstimator`] trait; [`QNetwork`], a small
//! multilayer perceptron, is the default. Rewards use the same [`Weights`](crate::tunnel::Weights)
//! as the analytical model's score.
//!
//! A [`PolicyModel`] is only trusted once it has earned it. Its [`Lifecycle`] starts
//! out [`Stage::Untrained`], moves to [`Stage::Training`] after enough experience, and
//! to [`Stage::Active`] once the analytical model itself consistently rates the policy's
//! proposals above its own recommendations.
//! If its realised rewards then fall short of the analytical baseline it goes back to
//! training.

mod estimator;
pub use estimator::{ActionValues, QNetwork, ValueEstimator, DEFAULT_HIDDEN};

mod lifecycle;
pub use lifecycle::{DecisionSource, Lifecycle, LifecycleConfig, Stage, ACTIVATION_MARGIN};

mod model;
pub use model::{Diagnostics, PolicyConfig, PolicyModel, RESTORED_EPSILON, SNAPSHOT_FORMAT};

mod replay;
pub use replay::ReplayBuffer;

pub mod simulate;

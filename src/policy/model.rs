//! The learned policy
// (c) 2024 Ross Younger

use std::fmt::Display;

use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{
    estimator::{ActionValues, QNetwork, ValueEstimator},
    lifecycle::{Lifecycle, LifecycleConfig, Stage},
    replay::ReplayBuffer,
};
use crate::{
    error::OptimizerError,
    tunnel::{Action, State, Transition, ACTION_COUNT},
    util::RollingWindow,
};

/// Version number of the serialized snapshot format
pub const SNAPSHOT_FORMAT: u32 = 1;

/// A restored policy explores at least this much
pub const RESTORED_EPSILON: f64 = 0.2;

/// Length of the windows behind [`Diagnostics`]
const DIAGNOSTIC_WINDOW: usize = 100;

/// Hyperparameters of the learned policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Discount factor γ
    pub gamma: f64,
    /// SGD step size
    pub learning_rate: f64,
    /// Initial exploration rate
    pub epsilon_start: f64,
    /// Exploration rate floor
    pub epsilon_min: f64,
    /// Multiplicative exploration decay per accepted update
    pub epsilon_decay: f64,
    /// Units in each of the two hidden layers
    pub hidden_units: usize,
    /// Seed for the initial weights
    pub seed: u64,
    /// Experience replay capacity
    pub replay_capacity: usize,
    /// Experience replay minibatch size; 0 disables replay
    pub replay_batch: usize,
    /// Accepted transitions between refreshes of the frozen target estimator.
    /// 0 bootstraps from the online estimator instead.
    pub target_sync: u64,
    /// Lifecycle thresholds
    pub lifecycle: LifecycleConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            learning_rate: 0.01,
            epsilon_start: 1.0,
            epsilon_min: 0.1,
            epsilon_decay: 0.995,
            hidden_units: 16,
            seed: 0,
            replay_capacity: 1000,
            replay_batch: 0,
            // Ten simulated episodes
            target_sync: 50,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Persisted form of a [`PolicyModel`]
#[derive(Serialize, Deserialize)]
struct Snapshot<E> {
    format: u32,
    epsilon: f64,
    updates: u64,
    transitions: u64,
    estimator: E,
}

/// A snapshot of the learned policy's health
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Lifecycle stage
    pub stage: Stage,
    /// Current exploration rate
    pub epsilon: f64,
    /// Accepted updates, including replays
    pub updates: u64,
    /// Accepted transitions
    pub transitions: u64,
    /// Transitions held for replay
    pub replay_len: usize,
    /// Trailing mean reward of learned-from transitions
    pub mean_reward: Option<f64>,
    /// Trailing mean squared training error
    pub mean_error: Option<f64>,
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stage {}, epsilon {:.3}, {} updates from {} transitions, {} in replay",
            self.stage, self.epsilon, self.updates, self.transitions, self.replay_len
        )?;
        if let Some(r) = self.mean_reward {
            write!(f, ", mean reward {r:.3}")?;
        }
        if let Some(e) = self.mean_error {
            write!(f, ", mean error {e:.5}")?;
        }
        Ok(())
    }
}

/// An epsilon-greedy Q-learning policy over [`Action`]s, with its lifecycle.
///
/// Nothing here is shared or global; the owner holds one per tunnel.
#[derive(Debug, Clone)]
pub struct PolicyModel<E = QNetwork> {
    estimator: E,
    /// Frozen copy that TD targets are computed from
    target: E,
    config: PolicyConfig,
    epsilon: f64,
    updates: u64,
    lifecycle: Lifecycle,
    replay: ReplayBuffer,
    rewards: RollingWindow,
    errors: RollingWindow,
}

impl PolicyModel<QNetwork> {
    /// A fresh, untrained policy with reproducible initial weights
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        let estimator = QNetwork::seeded(&[config.hidden_units; 2], config.seed);
        Self::with_estimator(estimator, config)
    }

    /// Restores a policy from a serialized snapshot.
    /// If there is none, or it cannot be loaded, starts afresh.
    #[must_use]
    pub fn restore_or_new(blob: Option<&[u8]>, config: PolicyConfig) -> Self {
        let Some(blob) = blob else {
            debug!("no saved policy; starting afresh");
            return Self::new(config);
        };
        match Self::deserialize(blob, config) {
            Ok(model) => {
                info!(
                    "restored policy: {} transitions, stage {}",
                    model.lifecycle.transitions(),
                    model.stage()
                );
                model
            }
            Err(e) => {
                warn!("{e}; starting afresh");
                Self::new(config)
            }
        }
    }
}

impl<E: ValueEstimator + Clone> PolicyModel<E> {
    /// Wraps an estimator. The policy starts untrained.
    #[must_use]
    pub fn with_estimator(estimator: E, config: PolicyConfig) -> Self {
        Self {
            target: estimator.clone(),
            estimator,
            config,
            epsilon: config.epsilon_start,
            updates: 0,
            lifecycle: Lifecycle::new(config.lifecycle),
            replay: ReplayBuffer::new(config.replay_capacity),
            rewards: RollingWindow::new(DIAGNOSTIC_WINDOW),
            errors: RollingWindow::new(DIAGNOSTIC_WINDOW),
        }
    }

    /// Chooses an action.
    ///
    /// When `explore` is set, a uniformly random action is taken with probability ε.
    /// Otherwise (and always when `explore` is clear) the highest-valued action is taken.
    /// `rng` is only consulted when exploring.
    pub fn select_action<R: Rng + ?Sized>(
        &self,
        state: &State,
        explore: bool,
        rng: &mut R,
    ) -> Action {
        if explore && rng.gen::<f64>() < self.epsilon {
            let action = Action::from_index(rng.gen_range(0..ACTION_COUNT))
                .unwrap_or(Action::IncreaseMtu);
            trace!("exploring: {action}");
            return action;
        }
        self.evaluate(state).best()
    }

    /// Estimated values of every action in `state`
    #[must_use]
    pub fn evaluate(&self, state: &State) -> ActionValues {
        self.estimator.predict(state)
    }

    /// Learns from one observed transition.
    ///
    /// Returns the squared error of the estimate before the update.
    /// Unusable transitions, and updates that would corrupt the estimator, are rejected
    /// with [`OptimizerError::TrainingAnomaly`] and leave the policy unchanged.
    ///
    /// Every [`PolicyConfig::target_sync`] accepted transitions, the target estimator is
    /// refreshed from the online one.
    pub fn update(&mut self, transition: &Transition) -> Result<f64, OptimizerError> {
        let error = self.learn(transition)?;
        self.rewards.push(transition.reward);
        self.replay.push(*transition);
        let _ = self.lifecycle.record_transition();
        let interval = self.config.target_sync;
        if interval > 0 && self.lifecycle.transitions() % interval == 0 {
            self.target = self.estimator.clone();
            debug!(
                "target estimator refreshed after {} transitions",
                self.lifecycle.transitions()
            );
        }
        Ok(error)
    }

    /// Re-learns from a random minibatch of stored transitions.
    /// Returns the number of accepted updates.
    pub fn replay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        if self.config.replay_batch == 0 {
            return 0;
        }
        let batch = self.replay.sample(self.config.replay_batch, rng);
        batch.iter().filter(|t| self.learn(t).is_ok()).count()
    }

    fn learn(&mut self, transition: &Transition) -> Result<f64, OptimizerError> {
        if !transition.is_finite() {
            let err = OptimizerError::TrainingAnomaly("non-finite reward or state".into());
            warn!("{err}");
            return Err(err);
        }
        let next = if transition.done {
            0.
        } else if self.config.target_sync == 0 {
            self.estimator.predict(&transition.next_state).max()
        } else {
            self.target.predict(&transition.next_state).max()
        };
        let target = transition.reward + self.config.gamma * next;
        if !target.is_finite() {
            let err = OptimizerError::TrainingAnomaly(format!("non-finite target {target}"));
            warn!("{err}");
            return Err(err);
        }
        let backup = self.estimator.clone();
        let error = self.estimator.fit(
            &transition.state,
            transition.action,
            target,
            self.config.learning_rate,
        );
        if let Err(why) = self.estimator.validate() {
            self.estimator = backup;
            let err = OptimizerError::TrainingAnomaly(format!("update rolled back: {why}"));
            warn!("{err}");
            return Err(err);
        }
        if !error.is_finite() {
            self.estimator = backup;
            let err =
                OptimizerError::TrainingAnomaly(format!("update rolled back: error {error}"));
            warn!("{err}");
            return Err(err);
        }
        self.updates += 1;
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        self.errors.push(error);
        trace!(
            "learned {} -> target {target:.4}, error {error:.6}",
            transition.action
        );
        Ok(error)
    }

    /// Lifecycle stage
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.lifecycle.stage()
    }

    /// The lifecycle state machine
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(crate) fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    /// Current exploration rate
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Accepted updates so far, including replays
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Hyperparameters in use
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// The underlying estimator
    #[must_use]
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// The frozen estimator TD targets bootstrap from
    #[must_use]
    pub fn target_estimator(&self) -> &E {
        &self.target
    }

    /// Health summary
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            stage: self.stage(),
            epsilon: self.epsilon,
            updates: self.updates,
            transitions: self.lifecycle.transitions(),
            replay_len: self.replay.len(),
            mean_reward: self.rewards.mean(),
            mean_error: self.errors.mean(),
        }
    }
}

impl<E: ValueEstimator + Clone + Serialize + DeserializeOwned> PolicyModel<E> {
    /// Serializes the estimator and learning progress.
    ///
    /// The replay buffer and the lifecycle's reward history are not saved.
    pub fn serialize(&self) -> Result<Vec<u8>, OptimizerError> {
        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            epsilon: self.epsilon,
            updates: self.updates,
            transitions: self.lifecycle.transitions(),
            estimator: &self.estimator,
        };
        serde_json::to_vec(&snapshot).map_err(|e| OptimizerError::ModelLoad(e.to_string()))
    }

    /// Restores a policy serialized by [`PolicyModel::serialize`].
    ///
    /// The restored policy explores with `ε = max(0.2, ε_min)`, and resumes in
    /// [`Stage::Training`] if it had enough experience.
    pub fn deserialize(blob: &[u8], config: PolicyConfig) -> Result<Self, OptimizerError> {
        let snapshot: Snapshot<E> =
            serde_json::from_slice(blob).map_err(|e| OptimizerError::ModelLoad(e.to_string()))?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(OptimizerError::ModelLoad(format!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT})",
                snapshot.format
            )));
        }
        if !(0. ..=1.).contains(&snapshot.epsilon) {
            return Err(OptimizerError::ModelLoad(format!(
                "invalid exploration rate {}",
                snapshot.epsilon
            )));
        }
        snapshot
            .estimator
            .validate()
            .map_err(OptimizerError::ModelLoad)?;
        let mut model = Self::with_estimator(snapshot.estimator, config);
        model.epsilon = RESTORED_EPSILON.max(config.epsilon_min);
        model.updates = snapshot.updates;
        model.lifecycle = Lifecycle::resume(config.lifecycle, snapshot.transitions);
        Ok(model)
    }
}

#[cfg(test)]
mod test {
    use assertables::{assert_gt, assert_in_delta, assert_lt};
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    use super::{PolicyConfig, PolicyModel, RESTORED_EPSILON};
    use crate::{
        error::OptimizerError,
        policy::{lifecycle::Stage, ActionValues, ValueEstimator},
        tunnel::{Action, State, Transition},
    };

    /// Values every action at 10, and remembers what it was asked to fit
    #[derive(Debug, Clone, Default)]
    struct Recorder {
        targets: Vec<f64>,
    }

    impl ValueEstimator for Recorder {
        fn predict(&self, _: &State) -> ActionValues {
            ActionValues([10.; 4])
        }

        fn fit(&mut self, _: &State, _: Action, target: f64, _: f64) -> f64 {
            self.targets.push(target);
            0.
        }
    }

    fn random_state(rng: &mut StdRng) -> State {
        State([rng.gen(), rng.gen(), rng.gen()])
    }

    #[test]
    fn greedy_ignores_rng() {
        let policy = PolicyModel::new(PolicyConfig::default());
        let state = State([0.1, 0.3, 0.2]);
        let mut a = StdRng::seed_from_u64(1);
        let b = a.clone();
        let action = policy.select_action(&state, false, &mut a);
        assert_eq!(action, policy.evaluate(&state).best());
        // not consumed
        assert_eq!(a.gen::<u64>(), b.clone().gen::<u64>());
    }

    #[test]
    fn full_exploration_is_uniformish() {
        let policy = PolicyModel::new(PolicyConfig::default());
        assert_in_delta!(policy.epsilon(), 1.0, f64::EPSILON);
        let state = State([0.1, 0.3, 0.2]);
        let mut rng = StdRng::seed_from_u64(9);
        let mut counts = [0usize; 4];
        for _ in 0..400 {
            counts[policy.select_action(&state, true, &mut rng).index()] += 1;
        }
        for c in counts {
            assert_gt!(c, 50);
        }
    }

    #[test]
    fn epsilon_decays_to_floor() {
        let mut policy = PolicyModel::new(PolicyConfig::default());
        let t = Transition {
            state: State([0.1, 0.1, 0.1]),
            action: Action::IncreaseMtu,
            reward: -1.,
            next_state: State([0.1, 0.1, 0.1]),
            done: false,
        };
        let _ = policy.update(&t).unwrap();
        assert_in_delta!(policy.epsilon(), 0.995, 1e-12);
        for _ in 0..1000 {
            let _ = policy.update(&t).unwrap();
        }
        assert_in_delta!(policy.epsilon(), 0.1, 1e-12);
        assert_eq!(policy.updates(), 1001);
        assert_eq!(policy.stage(), Stage::Training);
    }

    #[test]
    fn non_finite_transitions_are_dropped() {
        let mut policy = PolicyModel::new(PolicyConfig::default());
        let before = policy.estimator().clone();
        let t = Transition {
            state: State([f64::NAN, 0., 0.]),
            action: Action::DecreaseMtu,
            reward: 1.,
            next_state: State([0.; 3]),
            done: false,
        };
        assert!(matches!(
            policy.update(&t),
            Err(OptimizerError::TrainingAnomaly(_))
        ));
        let t = Transition {
            state: State([0.; 3]),
            reward: f64::INFINITY,
            ..t
        };
        assert!(policy.update(&t).is_err());
        assert_eq!(policy.estimator(), &before);
        assert_eq!(policy.updates(), 0);
        assert_eq!(policy.lifecycle().transitions(), 0);
    }

    #[test]
    fn divergent_update_is_rolled_back() {
        let config = PolicyConfig {
            learning_rate: 1e308,
            ..PolicyConfig::default()
        };
        let mut policy = PolicyModel::new(config);
        let before = policy.estimator().clone();
        let t = Transition {
            state: State([1., 1., 1.]),
            action: Action::TogglePriority,
            reward: 1e6,
            next_state: State([1., 1., 1.]),
            done: false,
        };
        assert!(policy.update(&t).is_err());
        assert_eq!(policy.estimator(), &before);
    }

    #[test]
    fn learns_immediate_rewards() {
        // With no discounting, the estimate should converge on the mean reward
        let config = PolicyConfig {
            gamma: 0.,
            ..PolicyConfig::default()
        };
        let mut policy = PolicyModel::new(config);
        let mut rng = StdRng::seed_from_u64(5);
        let mut first = 0.;
        let mut last = 0.;
        for i in 0..2000 {
            let state = random_state(&mut rng);
            let t = Transition {
                state,
                action: Action::DecreaseMtu,
                reward: 0.5,
                next_state: state,
                done: false,
            };
            let err = policy.update(&t).unwrap();
            if i < 100 {
                first += err;
            } else if i >= 1900 {
                last += err;
            }
        }
        assert_lt!(last, first);
        let q = policy.evaluate(&State([0.5, 0.5, 0.5])).get(Action::DecreaseMtu);
        assert_in_delta!(q, 0.5, 0.1);
    }

    #[test]
    fn round_trip_is_exact() {
        let mut policy = PolicyModel::new(PolicyConfig::default());
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..60 {
            let t = Transition {
                state: random_state(&mut rng),
                action: Action::ToggleSplitRouting,
                reward: rng.gen_range(-20.0..0.0),
                next_state: random_state(&mut rng),
                done: false,
            };
            let _ = policy.update(&t).unwrap();
        }
        let blob = policy.serialize().unwrap();
        let restored: PolicyModel =
            PolicyModel::deserialize(&blob, PolicyConfig::default()).unwrap();
        assert_eq!(restored.estimator(), policy.estimator());
        for _ in 0..50 {
            let s = random_state(&mut rng);
            let a = policy.evaluate(&s);
            let b = restored.evaluate(&s);
            for (x, y) in a.0.iter().zip(b.0.iter()) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
        assert_eq!(restored.updates(), 60);
        assert_eq!(restored.stage(), Stage::Training);
        assert_in_delta!(restored.epsilon(), RESTORED_EPSILON, f64::EPSILON);
    }

    #[test]
    fn corrupt_snapshots_are_rejected() {
        let policy = PolicyModel::new(PolicyConfig::default());
        let blob = policy.serialize().unwrap();
        let load = |b: &[u8]| {
            PolicyModel::<crate::policy::QNetwork>::deserialize(b, PolicyConfig::default())
        };

        assert!(matches!(load(b"{nope"), Err(OptimizerError::ModelLoad(_))));
        assert!(load(&blob[..blob.len() / 2]).is_err());

        let text = String::from_utf8(blob).unwrap();
        let wrong_version = text.replacen("\"format\":1", "\"format\":99", 1);
        assert!(load(wrong_version.as_bytes()).is_err());

        let mut json: serde_json::Value = serde_json::from_str(&text).unwrap();
        json["estimator"]["layers"][0]["inputs"] = serde_json::json!(5);
        assert!(load(json.to_string().as_bytes()).is_err());
    }

    #[test]
    fn restore_or_new_recovers() {
        let policy = PolicyModel::restore_or_new(Some(b"garbage"), PolicyConfig::default());
        assert_eq!(policy.stage(), Stage::Untrained);
        assert_eq!(policy.updates(), 0);
        let fresh = PolicyModel::restore_or_new(None, PolicyConfig::default());
        assert_eq!(fresh.estimator(), policy.estimator());
        assert!(fresh.estimator().validate().is_ok());
    }

    #[test]
    fn replay_trains() {
        let config = PolicyConfig {
            replay_batch: 8,
            ..PolicyConfig::default()
        };
        let mut policy = PolicyModel::new(config);
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(policy.replay(&mut rng), 0);
        for _ in 0..20 {
            let t = Transition {
                state: random_state(&mut rng),
                action: Action::IncreaseMtu,
                reward: -1.,
                next_state: random_state(&mut rng),
                done: false,
            };
            let _ = policy.update(&t).unwrap();
        }
        assert_eq!(policy.replay(&mut rng), 8);
        assert_eq!(policy.updates(), 28);
        assert_eq!(policy.lifecycle().transitions(), 20);
        assert_eq!(policy.diagnostics().replay_len, 20);
    }

    #[test]
    fn terminal_transitions_do_not_bootstrap() {
        let mut policy = PolicyModel::with_estimator(Recorder::default(), PolicyConfig::default());
        let t = Transition {
            state: State([0.2, 0.2, 0.2]),
            action: Action::DecreaseMtu,
            reward: 1.,
            next_state: State([0.3, 0.3, 0.3]),
            done: false,
        };
        let _ = policy.update(&t).unwrap();
        let _ = policy.update(&t.terminal()).unwrap();
        let targets = &policy.estimator().targets;
        assert_in_delta!(targets[0], 1. + 0.9 * 10., 1e-12);
        assert_in_delta!(targets[1], 1., 1e-12);
    }

    #[test]
    fn target_lags_until_sync() {
        let config = PolicyConfig {
            target_sync: 3,
            ..PolicyConfig::default()
        };
        let mut policy = PolicyModel::new(config);
        let initial = policy.estimator().clone();
        let mut rng = StdRng::seed_from_u64(21);
        let mut step = |policy: &mut PolicyModel| {
            let t = Transition {
                state: random_state(&mut rng),
                action: Action::TogglePriority,
                reward: -5.,
                next_state: random_state(&mut rng),
                done: false,
            };
            let _ = policy.update(&t).unwrap();
        };

        step(&mut policy);
        step(&mut policy);
        assert_eq!(policy.target_estimator(), &initial);
        assert_ne!(policy.estimator(), &initial);

        step(&mut policy);
        assert_eq!(policy.target_estimator(), policy.estimator());

        step(&mut policy);
        assert_ne!(policy.target_estimator(), policy.estimator());
    }

    #[test]
    fn restored_target_matches_estimator() {
        let mut policy = PolicyModel::new(PolicyConfig::default());
        let t = Transition {
            state: State([0.4, 0.1, 0.0]),
            action: Action::IncreaseMtu,
            reward: -2.,
            next_state: State([0.4, 0.1, 0.0]),
            done: false,
        };
        let _ = policy.update(&t).unwrap();
        let blob = policy.serialize().unwrap();
        let restored: PolicyModel =
            PolicyModel::deserialize(&blob, PolicyConfig::default()).unwrap();
        assert_eq!(restored.target_estimator(), restored.estimator());
    }
}

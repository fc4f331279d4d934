//! The decision loop: analytical model and learned policy together
// (c) 2024 Ross Younger

use std::fmt::Display;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::OptimizerError,
    model::{AnalyticalModel, Recommendation},
    policy::{DecisionSource, PolicyModel, QNetwork, Stage, ValueEstimator},
    tunnel::{Action, Measurement, MeasurementWindow, ParameterSet, Transition},
};

/// Measurements averaged by the analytical recommendation unless configured otherwise
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

/// The outcome of one optimization cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    /// The parameters to apply
    pub parameters: ParameterSet,
    /// The learned action, if the learned policy decided
    pub action: Option<Action>,
    /// Who decided
    pub source: DecisionSource,
    /// The analytical recommendation, unless the measurement was unusable
    pub recommendation: Option<Recommendation>,
    /// Lifecycle stage of the learned policy when the decision was made
    pub stage: Stage,
}

impl Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} decision ({} policy): {}", self.source, self.stage, self.parameters)?;
        if let Some(action) = self.action {
            write!(f, " via {action}")?;
        }
        Ok(())
    }
}

/// A decision awaiting the measurement that tells us how it went
#[derive(Debug, Clone, Copy)]
struct Pending {
    measurement: Measurement,
    previous: ParameterSet,
    parameters: ParameterSet,
    action: Option<Action>,
    source: DecisionSource,
}

/// Owns the analytical model and the learned policy for one tunnel.
///
/// Call [`Optimizer::cycle`] with each new measurement and the parameters currently in force.
/// The outcome of each decision is learned from on the following cycle.
#[derive(Debug, Clone)]
pub struct Optimizer<E = QNetwork> {
    model: AnalyticalModel,
    policy: PolicyModel<E>,
    explore: bool,
    pending: Option<Pending>,
    recent: MeasurementWindow,
    counterfactuals: u64,
}

impl<E: ValueEstimator + Clone> Optimizer<E> {
    /// Constructor. Exploration is enabled.
    #[must_use]
    pub fn new(model: AnalyticalModel, policy: PolicyModel<E>) -> Self {
        Self {
            model,
            policy,
            explore: true,
            pending: None,
            recent: MeasurementWindow::new(DEFAULT_SMOOTHING_WINDOW),
            counterfactuals: 0,
        }
    }

    /// Sets how many recent measurements the analytical recommendation averages over
    #[must_use]
    pub fn smoothing(mut self, window: usize) -> Self {
        self.recent = MeasurementWindow::new(window);
        self
    }

    /// Enables or disables exploration by the learned policy
    #[must_use]
    pub fn exploring(mut self, explore: bool) -> Self {
        self.explore = explore;
        self
    }

    /// The analytical recommendation for a single measurement, without smoothing
    #[must_use]
    pub fn recommend_analytical(
        &self,
        measurement: &Measurement,
        current: &ParameterSet,
    ) -> Recommendation {
        self.model.recommend(measurement, current)
    }

    /// Runs one decision cycle.
    ///
    /// * An unusable measurement keeps `current` in force and forgets the previous decision.
    /// * Otherwise the outcome of the previous decision is learned from, the analytical
    ///   recommendation is computed from the trailing mean of recent measurements, and the
    ///   lifecycle stage decides which of that and the learned action to apply.
    /// * While training, the analytical model scores the learned policy's greedy proposal
    ///   under the same conditions as its own recommendation; that comparison decides
    ///   activation.
    ///
    /// `rng` is consulted for exploration and experience replay only.
    pub fn cycle<R: Rng + ?Sized>(
        &mut self,
        measurement: &Measurement,
        current: &ParameterSet,
        rng: &mut R,
    ) -> Decision {
        if let Err(e) = measurement.validate() {
            warn!("{e}; keeping current parameters");
            self.pending = None;
            return Decision {
                parameters: *current,
                action: None,
                source: DecisionSource::Fallback,
                recommendation: None,
                stage: self.policy.stage(),
            };
        }

        if let Some(pending) = self.pending.take() {
            self.learn_from(&pending, measurement, current, rng);
        }

        self.recent.push(measurement);
        let smoothed = self.recent.mean().unwrap_or(*measurement);
        let recommendation = self.model.recommend(&smoothed, current);
        if let Some(e) = recommendation
            .prediction
            .instability(self.model.raw_utilisation(recommendation.parameters.mtu()))
        {
            warn!("{e}");
        }

        let stage = self.policy.stage();
        let state = measurement.state();
        let (parameters, action, source) = match stage {
            Stage::Untrained => (recommendation.parameters, None, DecisionSource::Analytical),
            Stage::Training => {
                let learned = self.policy.select_action(&state, false, rng);
                let conditions = self.model.conditions(&smoothed, current);
                let proposal = self.model.predict(&learned.apply(current), &conditions);
                debug!(
                    "learned policy would {learned} (score {:.3}); analytical scores {:.3}",
                    proposal.score, recommendation.prediction.score
                );
                let _ = self
                    .policy
                    .lifecycle_mut()
                    .record_comparison(proposal.score, recommendation.prediction.score);
                (recommendation.parameters, None, DecisionSource::Analytical)
            }
            Stage::Active => {
                let learned = self.policy.select_action(&state, self.explore, rng);
                debug!("analytical would choose {}", recommendation.parameters);
                (learned.apply(current), Some(learned), DecisionSource::Learned)
            }
        };

        let decision = Decision {
            parameters,
            action,
            source,
            recommendation: Some(recommendation),
            stage,
        };
        info!("{decision}");
        self.pending = Some(Pending {
            measurement: *measurement,
            previous: *current,
            parameters,
            action,
            source,
        });
        decision
    }

    /// Learns from the outcome of the previous decision
    fn learn_from<R: Rng + ?Sized>(
        &mut self,
        pending: &Pending,
        outcome: &Measurement,
        current: &ParameterSet,
        rng: &mut R,
    ) {
        let weights = *self.model.weights();
        let reward = weights.reward(outcome);
        let _ = self
            .policy
            .lifecycle_mut()
            .record_reward(pending.source, reward);

        // If the decision was not applied as made, learn from what actually happened
        let action = match pending.action {
            Some(a) if pending.parameters == *current => Some(a),
            _ => Action::between(&pending.previous, current),
        };
        let transition = match action {
            Some(action) => Transition::between(&pending.measurement, action, outcome, &weights),
            None => {
                // Nothing changed; learn what the policy would have got from the model instead
                self.counterfactuals += 1;
                let state = pending.measurement.state();
                let action = self.policy.select_action(&state, self.explore, rng);
                debug!(
                    "no attributable action since last cycle ({} so far); learning from the \
                     model's view of {action}",
                    self.counterfactuals
                );
                self.counterfactual(&pending.measurement, &pending.previous, action)
            }
        };
        if self.policy.update(&transition).is_ok() {
            let _ = self.policy.replay(rng);
        }
    }

    /// The transition the analytical model predicts for taking `action` from `params`
    fn counterfactual(
        &self,
        before: &Measurement,
        params: &ParameterSet,
        action: Action,
    ) -> Transition {
        let conditions = self.model.conditions(before, params);
        let outcome = self
            .model
            .predict(&action.apply(params), &conditions)
            .as_measurement(before.timestamp);
        Transition::between(before, action, &outcome, self.model.weights())
    }

    /// Learns from an externally observed transition
    pub fn update(&mut self, transition: &Transition) -> Result<f64, OptimizerError> {
        self.policy.update(transition)
    }

    /// The analytical model
    #[must_use]
    pub fn model(&self) -> &AnalyticalModel {
        &self.model
    }

    /// The learned policy
    #[must_use]
    pub fn policy(&self) -> &PolicyModel<E> {
        &self.policy
    }

    /// Cycles whose outcome could not be attributed to any action, and were learned
    /// from the model's prediction instead
    #[must_use]
    pub fn counterfactuals(&self) -> u64 {
        self.counterfactuals
    }

    /// Consumes the optimizer, returning the learned policy
    #[must_use]
    pub fn into_policy(self) -> PolicyModel<E> {
        self.policy
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::Optimizer;
    use crate::{
        model::{AnalyticalModel, Link, MtuDirection},
        policy::{
            ActionValues, DecisionSource, LifecycleConfig, PolicyConfig, PolicyModel, Stage,
            ValueEstimator,
        },
        tunnel::{Action, Measurement, ParameterSet, State, Transition, Weights},
    };

    /// Always wants to do the given action, and is wildly optimistic about it
    #[derive(Debug, Clone, Copy)]
    struct Stubborn(Action);

    impl ValueEstimator for Stubborn {
        fn predict(&self, _state: &State) -> ActionValues {
            let mut v = [0.; 4];
            v[self.0.index()] = 1000.;
            ActionValues(v)
        }

        fn fit(&mut self, _: &State, _: Action, _: f64, _: f64) -> f64 {
            0.
        }
    }

    fn model() -> AnalyticalModel {
        AnalyticalModel::new(Link::default(), Weights::default())
    }

    fn measurement(latency_ms: f64, loss_fraction: f64) -> Measurement {
        Measurement {
            throughput_mbps: 1.3,
            latency_ms,
            loss_fraction,
            timestamp: 0.,
        }
    }

    #[test]
    fn untrained_policy_never_decides() {
        let stub = Stubborn(Action::IncreaseMtu);
        let policy = PolicyModel::with_estimator(stub, PolicyConfig::default());
        let mut opt = Optimizer::new(model(), policy);
        let mut rng = StdRng::seed_from_u64(1);
        let mut current = ParameterSet::clamped(1500, 1000, false, false);
        for i in 0..49 {
            // Lossy: the analytical model wants the MTU down, the stub wants it up
            let m = measurement(60. + f64::from(i), 0.08);
            let d = opt.cycle(&m, &current, &mut rng);
            assert_eq!(d.source, DecisionSource::Analytical);
            assert_eq!(d.stage, Stage::Untrained);
            assert_eq!(Some(d.parameters), d.recommendation.map(|r| r.parameters));
            assert!(d.action.is_none());
            current = d.parameters;
        }
        assert!(opt.policy().lifecycle().transitions() < 50);
    }

    #[test]
    fn invalid_measurement_keeps_parameters() {
        let mut opt = Optimizer::new(model(), PolicyModel::new(PolicyConfig::default()));
        let mut rng = StdRng::seed_from_u64(2);
        let current = ParameterSet::clamped(1380, 700, true, false);
        let d = opt.cycle(&measurement(f64::NAN, 0.01), &current, &mut rng);
        assert_eq!(d.source, DecisionSource::Fallback);
        assert_eq!(d.parameters, current);
        assert!(d.recommendation.is_none());
        let d = opt.cycle(&measurement(50., 1.5), &current, &mut rng);
        assert_eq!(d.source, DecisionSource::Fallback);
        // Nothing was pending, so nothing was learned
        assert_eq!(opt.policy().lifecycle().transitions(), 0);
    }

    #[test]
    fn sustained_loss_walks_mtu_down() {
        let mut opt = Optimizer::new(model(), PolicyModel::new(PolicyConfig::default()));
        let mut rng = StdRng::seed_from_u64(3);
        let mut current = ParameterSet::clamped(1500, 1000, false, false);
        for expected in [1480, 1460, 1440] {
            let d = opt.cycle(&measurement(60., 0.08), &current, &mut rng);
            assert_eq!(d.parameters.mtu(), expected);
            current = d.parameters;
        }
        // Two completed decisions were learned from
        assert_eq!(opt.policy().lifecycle().transitions(), 2);
    }

    #[test]
    fn unapplied_decisions_learn_counterfactually() {
        let mut opt = Optimizer::new(model(), PolicyModel::new(PolicyConfig::default()));
        let mut rng = StdRng::seed_from_u64(4);
        let current = ParameterSet::clamped(1500, 1000, false, false);
        let _ = opt.cycle(&measurement(60., 0.08), &current, &mut rng);
        // The host ignored us: nothing attributable happened
        let _ = opt.cycle(&measurement(60., 0.08), &current, &mut rng);
        assert_eq!(opt.counterfactuals(), 1);
        assert_eq!(opt.policy().lifecycle().transitions(), 1);
    }

    #[test]
    fn steady_link_keeps_learning() {
        // A clean link at the top MTU: the analytical model has nothing to change
        let clean = Measurement {
            throughput_mbps: 1.4,
            latency_ms: 40.,
            loss_fraction: 0.,
            timestamp: 0.,
        };
        let mut opt = Optimizer::new(model(), PolicyModel::new(PolicyConfig::default()));
        let mut rng = StdRng::seed_from_u64(8);
        let mut current = ParameterSet::clamped(1500, 1000, false, false);
        for _ in 0..60 {
            let d = opt.cycle(&clean, &current, &mut rng);
            assert_eq!(d.source, DecisionSource::Analytical);
            assert_eq!(d.parameters, current);
            current = d.parameters;
        }
        assert_eq!(opt.counterfactuals(), 59);
        assert_eq!(opt.policy().lifecycle().transitions(), 59);
        assert_ne!(opt.policy().stage(), Stage::Untrained);
    }

    #[test]
    fn under_trained_network_is_not_activated() {
        let mut policy = PolicyModel::new(PolicyConfig::default());
        let lossy = measurement(60., 0.08);
        let t = Transition::between(&lossy, Action::DecreaseMtu, &lossy, &Weights::default());
        for _ in 0..50 {
            let _ = policy.update(&t).unwrap();
        }
        assert_eq!(policy.stage(), Stage::Training);

        let mut opt = Optimizer::new(model(), policy).exploring(false);
        let mut rng = StdRng::seed_from_u64(6);
        let mut current = ParameterSet::clamped(1500, 1000, false, false);
        for _ in 0..20 {
            let d = opt.cycle(&lossy, &current, &mut rng);
            assert_eq!(d.source, DecisionSource::Analytical);
            current = d.parameters;
        }
        assert_eq!(opt.policy().stage(), Stage::Training);
    }

    #[test]
    fn one_noisy_sample_does_not_flip_direction() {
        let mut opt = Optimizer::new(model(), PolicyModel::new(PolicyConfig::default()));
        let mut rng = StdRng::seed_from_u64(7);
        let current = ParameterSet::clamped(1400, 1000, false, false);
        let _ = opt.cycle(&measurement(40., 0.), &current, &mut rng);
        let _ = opt.cycle(&measurement(40., 0.), &current, &mut rng);

        let spike = measurement(150., 0.09);
        let alone = opt.recommend_analytical(&spike, &current);
        assert_eq!(alone.direction, MtuDirection::Decrease);
        let d = opt.cycle(&spike, &current, &mut rng);
        assert_eq!(d.recommendation.map(|r| r.direction), Some(MtuDirection::Hold));

        // Without smoothing the spike gets its way
        let mut raw = Optimizer::new(model(), PolicyModel::new(PolicyConfig::default()))
            .smoothing(1);
        let _ = raw.cycle(&measurement(40., 0.), &current, &mut rng);
        let d = raw.cycle(&spike, &current, &mut rng);
        assert_eq!(d.recommendation.map(|r| r.direction), Some(MtuDirection::Decrease));
    }

    #[test]
    fn degraded_policy_is_demoted() {
        let config = PolicyConfig {
            epsilon_start: 0.,
            epsilon_min: 0.,
            lifecycle: LifecycleConfig {
                min_transitions: 2,
                activation_window: 2,
                degradation_window: 3,
                degradation_margin: 0.5,
            },
            ..PolicyConfig::default()
        };
        let policy = PolicyModel::with_estimator(Stubborn(Action::ToggleSplitRouting), config);
        let mut opt = Optimizer::new(model(), policy).exploring(false);
        let mut rng = StdRng::seed_from_u64(5);

        let good = measurement(40., 0.);
        let bad = measurement(250., 0.09);
        // The host holds the MTU at the fragmentation threshold. On a clean link the analytical
        // model still pushes it up a step, which fragments; the stub's proposal keeps it.
        let current = ParameterSet::clamped(1420, 1000, false, false);
        let mut last = DecisionSource::Analytical;
        let mut activated_at = None;
        let mut demoted_at = None;
        for i in 0..20 {
            let m = if last == DecisionSource::Learned { bad } else { good };
            let d = opt.cycle(&m, &current, &mut rng);
            match (activated_at, d.source) {
                (None, DecisionSource::Learned) => activated_at = Some(i),
                (Some(_), DecisionSource::Analytical) if demoted_at.is_none() => {
                    demoted_at = Some(i);
                    assert_eq!(d.stage, Stage::Training);
                }
                _ => (),
            }
            last = d.source;
        }
        let activated_at = activated_at.expect("policy was never activated");
        let demoted_at = demoted_at.expect("policy was never demoted");
        // Three learned decisions fill the window; the next cycle is analytical again
        assert!(demoted_at > activated_at);
        assert!(demoted_at - activated_at <= 3);
    }
}

//! Offline training against the analytical model
// (c) 2024 Ross Younger

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use super::{PolicyModel, ValueEstimator};
use crate::{
    model::AnalyticalModel,
    tunnel::{Measurement, ParameterSet, Transition},
};

/// Decisions per simulated episode
pub const STEPS_PER_EPISODE: usize = 5;

/// Simulated congestion levels are drawn from `0, 0.1, ... 0.9`
const CONGESTION_STEPS: u8 = 10;
/// Simulated uplink capacities are drawn from `0.5, 1.0, ... 5.0` Mbps
const CAPACITY_STEPS: u8 = 10;
const CAPACITY_STEP_MBPS: f64 = 0.5;

/// Progress is logged every this many episodes
const LOG_INTERVAL: usize = 10;

/// Outcome of a simulated training run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    /// Mean reward per step of each episode, in order
    pub episode_rewards: Vec<f64>,
    /// Transitions the policy accepted
    pub accepted: usize,
    /// Transitions the policy rejected
    pub rejected: usize,
}

impl SimulationSummary {
    /// Mean reward of the last `n` episodes
    #[must_use]
    pub fn trailing_mean(&self, n: usize) -> Option<f64> {
        let n = n.min(self.episode_rewards.len());
        if n == 0 {
            return None;
        }
        let tail = &self.episode_rewards[self.episode_rewards.len() - n..];
        #[allow(clippy::cast_precision_loss)]
        let count = n as f64;
        Some(tail.iter().sum::<f64>() / count)
    }
}

/// The starting point of an episode: an uplink of some capacity under some congestion
fn initial_conditions<R: Rng + ?Sized>(rng: &mut R) -> (f64, Measurement) {
    let congestion = f64::from(rng.gen_range(0..CONGESTION_STEPS)) / f64::from(CONGESTION_STEPS);
    let capacity = CAPACITY_STEP_MBPS * f64::from(rng.gen_range(1..=CAPACITY_STEPS));
    let loss_fraction = 0.1 * congestion;
    let measurement = Measurement {
        throughput_mbps: capacity * (1. - loss_fraction),
        latency_ms: 20. + 200. * congestion,
        loss_fraction,
        timestamp: 0.,
    };
    (capacity, measurement)
}

/// Trains `policy` on simulated episodes, using `model` (with a randomly chosen uplink
/// capacity) as the environment.
///
/// Each episode starts from the default parameters and takes [`STEPS_PER_EPISODE`]
/// exploring decisions. The outcome of each decision is the model's prediction, which
/// becomes the next measurement. The last step of an episode is terminal.
pub fn train_on_simulated<E, R>(
    policy: &mut PolicyModel<E>,
    model: &AnalyticalModel,
    episodes: usize,
    rng: &mut R,
) -> SimulationSummary
where
    E: ValueEstimator + Clone,
    R: Rng + ?Sized,
{
    let mut summary = SimulationSummary {
        episode_rewards: Vec::with_capacity(episodes),
        accepted: 0,
        rejected: 0,
    };

    for episode in 1..=episodes {
        let (capacity, mut measurement) = initial_conditions(rng);
        let env = model.with_local_capacity(capacity);
        let mut params = ParameterSet::default();
        let mut total = 0.;

        for step in 1..=STEPS_PER_EPISODE {
            let action = policy.select_action(&measurement.state(), true, rng);
            let next_params = action.apply(&params);
            let conditions = env.conditions(&measurement, &params);
            let outcome = env
                .predict(&next_params, &conditions)
                .as_measurement(measurement.timestamp + 1.);
            let mut transition =
                Transition::between(&measurement, action, &outcome, env.weights());
            if step == STEPS_PER_EPISODE {
                transition = transition.terminal();
            }
            total += transition.reward;
            if policy.update(&transition).is_ok() {
                summary.accepted += 1;
                let _ = policy.replay(rng);
            } else {
                summary.rejected += 1;
            }
            measurement = outcome;
            params = next_params;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = total / STEPS_PER_EPISODE as f64;
        debug!("episode {episode} ({capacity:.1} Mbps): mean reward {mean:.3}");
        summary.episode_rewards.push(mean);
        if episode % LOG_INTERVAL == 0 {
            info!(
                "episode {episode}/{episodes}: trailing reward {:.3}; {}",
                summary.trailing_mean(LOG_INTERVAL).unwrap_or(mean),
                policy.diagnostics()
            );
        }
    }
    summary
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::{initial_conditions, train_on_simulated, SimulationSummary, STEPS_PER_EPISODE};
    use crate::{
        model::{AnalyticalModel, Link},
        policy::{ActionValues, PolicyConfig, PolicyModel, Stage, ValueEstimator},
        tunnel::{Action, State, Weights},
    };

    #[test]
    fn episodes_feed_the_policy() {
        let model = AnalyticalModel::new(Link::default(), Weights::default());
        let mut policy = PolicyModel::new(PolicyConfig::default());
        let mut rng = StdRng::seed_from_u64(17);
        let summary = train_on_simulated(&mut policy, &model, 20, &mut rng);
        assert_eq!(summary.episode_rewards.len(), 20);
        assert!(summary.episode_rewards.iter().all(|r| r.is_finite()));
        assert_eq!(summary.accepted, 20 * STEPS_PER_EPISODE);
        assert_eq!(summary.rejected, 0);
        assert_eq!(policy.lifecycle().transitions(), 100);
        assert_eq!(policy.stage(), Stage::Training);
    }

    #[test]
    fn reproducible() {
        let model = AnalyticalModel::new(Link::default(), Weights::default());
        let run = || {
            let mut policy = PolicyModel::new(PolicyConfig::default());
            let mut rng = StdRng::seed_from_u64(99);
            let summary = train_on_simulated(&mut policy, &model, 5, &mut rng);
            (summary, policy.serialize().unwrap())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn initial_conditions_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let (capacity, m) = initial_conditions(&mut rng);
            assert!((0.5..=5.0).contains(&capacity));
            assert!((0.0..0.1).contains(&m.loss_fraction));
            assert!(m.validate().is_ok());
        }
    }

    #[test]
    fn trailing_mean() {
        let s = SimulationSummary {
            episode_rewards: vec![1., 2., 3., 4.],
            accepted: 0,
            rejected: 0,
        };
        assert_eq!(s.trailing_mean(2), Some(3.5));
        assert_eq!(s.trailing_mean(10), Some(2.5));
        assert_eq!(s.trailing_mean(0), None);
    }

    /// Counts bootstrapped and terminal fits by the target it is given
    #[derive(Debug, Clone, Default)]
    struct Tally {
        terminal: usize,
        other: usize,
    }

    impl ValueEstimator for Tally {
        fn predict(&self, _: &State) -> ActionValues {
            ActionValues([1e6; 4])
        }

        fn fit(&mut self, _: &State, _: Action, target: f64, _: f64) -> f64 {
            // Rewards are far smaller than the bootstrapped value
            if target.abs() < 1e5 {
                self.terminal += 1;
            } else {
                self.other += 1;
            }
            0.
        }
    }

    #[test]
    fn last_step_of_each_episode_is_terminal() {
        let model = AnalyticalModel::new(Link::default(), Weights::default());
        let mut policy = PolicyModel::with_estimator(Tally::default(), PolicyConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let _ = train_on_simulated(&mut policy, &model, 4, &mut rng);
        assert_eq!(policy.estimator().terminal, 4);
        assert_eq!(policy.estimator().other, 4 * (STEPS_PER_EPISODE - 1));
    }
}

//! Choosing a configuration with the analytical model
// (c) 2024 Ross Younger

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, trace};

use super::{AnalyticalModel, Prediction};
use crate::tunnel::{Measurement, ParameterSet};

/// MTU step of the neighbourhood search, in bytes
pub const MTU_SEARCH_STEP: i32 = 20;
/// Buffer step of the neighbourhood search, as a fraction of the current size
pub const BUFFER_SEARCH_STEP: f64 = 0.10;

/// Above this predicted loss, the MTU must come down
pub const LOSS_DECREASE_THRESHOLD: f64 = 0.05;
/// Below this predicted loss (and [`LATENCY_INCREASE_THRESHOLD`]), the MTU should go up
pub const LOSS_INCREASE_THRESHOLD: f64 = 0.01;
/// Below this predicted latency (and [`LOSS_INCREASE_THRESHOLD`]), the MTU should go up
pub const LATENCY_INCREASE_THRESHOLD: f64 = 100.0;

/// Measured loss above which we prioritise the relay's route
const PRIORITY_LOSS_THRESHOLD: f64 = 0.05;
/// Measured latency above which we recommend split routing
const SPLIT_LATENCY_THRESHOLD: f64 = 150.;
/// Measured loss above which we recommend split routing
const SPLIT_LOSS_THRESHOLD: f64 = 0.10;

/// Scores closer than this are considered equal
const SCORE_TOLERANCE: f64 = 1e-4;

/// MTU values covered by [`AnalyticalModel::optimize`]
const GRID_MTUS: [u16; 4] = [1280, 1380, 1420, 1480];
/// Buffer sizes covered by [`AnalyticalModel::optimize`]
const GRID_BUFFERS: [u32; 5] = [100, 500, 1000, 1500, 2000];

/// Which way the loss/latency policy allows the MTU to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MtuDirection {
    /// Loss is too high: the MTU must shrink
    Decrease,
    /// The link is clean and quick: the MTU should grow
    Increase,
    /// Let the score decide
    Hold,
}

impl MtuDirection {
    fn for_prediction(p: &Prediction) -> Self {
        if p.loss_probability > LOSS_DECREASE_THRESHOLD {
            MtuDirection::Decrease
        } else if p.loss_probability < LOSS_INCREASE_THRESHOLD
            && p.total_latency_ms < LATENCY_INCREASE_THRESHOLD
        {
            MtuDirection::Increase
        } else {
            MtuDirection::Hold
        }
    }

    fn mtu_deltas(self) -> &'static [i32] {
        match self {
            MtuDirection::Decrease => &[-MTU_SEARCH_STEP],
            MtuDirection::Increase => &[MTU_SEARCH_STEP],
            MtuDirection::Hold => &[-MTU_SEARCH_STEP, 0, MTU_SEARCH_STEP],
        }
    }
}

/// The analytical model's choice of configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Recommendation {
    /// What we recommend
    pub parameters: ParameterSet,
    /// How we expect it to perform
    pub prediction: Prediction,
    /// How we expect the current configuration to perform
    pub baseline: Prediction,
    /// The MTU policy that applied
    pub direction: MtuDirection,
}

impl Recommendation {
    /// True if the recommended configuration drives the queue to saturation
    #[must_use]
    pub fn saturated(&self) -> bool {
        self.prediction.saturated
    }

    /// Expected score improvement over the current configuration
    #[must_use]
    pub fn gain(&self) -> f64 {
        self.prediction.score - self.baseline.score
    }
}

fn routing_flags(measurement: &Measurement, current: &ParameterSet) -> ParameterSet {
    let mut out = *current;
    if measurement.loss_fraction > PRIORITY_LOSS_THRESHOLD {
        out.priority_aws = true;
    }
    if measurement.latency_ms > SPLIT_LATENCY_THRESHOLD
        || measurement.loss_fraction > SPLIT_LOSS_THRESHOLD
    {
        out.split_routing = true;
    }
    out
}

impl AnalyticalModel {
    /// Recommends a configuration, searching the neighbourhood of the current one.
    ///
    /// The MTU moves by one step in the direction required by the predicted loss and
    /// latency of the current configuration (see [`MtuDirection`]); the buffer may stay put
    /// or move by ±10%. The candidate with the best score wins.
    /// Ties go to the candidate closest to `current`, then to the smaller MTU and buffer.
    ///
    /// Deterministic, and always within the legal ranges.
    #[must_use]
    pub fn recommend(&self, measurement: &Measurement, current: &ParameterSet) -> Recommendation {
        let conditions = self.conditions(measurement, current);
        let baseline = self.predict(current, &conditions);
        let direction = MtuDirection::for_prediction(&baseline);
        let start = routing_flags(measurement, current);

        let mut best: Option<(ParameterSet, Prediction, f64)> = None;
        for &delta in direction.mtu_deltas() {
            for factor in [1. - BUFFER_SEARCH_STEP, 1., 1. + BUFFER_SEARCH_STEP] {
                let candidate = start.with_mtu_delta(delta).with_buffer_scaled(factor);
                let prediction = self.predict(&candidate, &conditions);
                let distance = current.perturbation(&candidate);
                trace!("candidate {candidate}: {}", prediction.summary());
                let better = match &best {
                    None => true,
                    Some((incumbent, inc_prediction, inc_distance)) => prefer(
                        &candidate,
                        &prediction,
                        distance,
                        incumbent,
                        inc_prediction,
                        *inc_distance,
                    ),
                };
                if better {
                    best = Some((candidate, prediction, distance));
                }
            }
        }
        // The candidate set is never empty
        let (parameters, prediction, _) = best.unwrap_or((*current, baseline, 0.));

        debug!(
            "analytical recommendation ({direction} mtu): {parameters}; {}",
            prediction.summary()
        );
        Recommendation {
            parameters,
            prediction,
            baseline,
            direction,
        }
    }

    /// Exhaustive search over a coarse grid of MTU and buffer sizes.
    ///
    /// Routing flags are carried over from `current`. The first best-scoring
    /// configuration wins.
    #[must_use]
    pub fn optimize(
        &self,
        measurement: &Measurement,
        current: &ParameterSet,
    ) -> (ParameterSet, Prediction) {
        let conditions = self.conditions(measurement, current);
        let mut best = (*current, self.predict(current, &conditions));
        let mut first = true;
        for mtu in GRID_MTUS {
            for buffer in GRID_BUFFERS {
                let candidate = current.with_mtu(mtu).with_buffer_size(buffer);
                let prediction = self.predict(&candidate, &conditions);
                if first || prediction.score > best.1.score {
                    trace!("new best configuration: {candidate}; {}", prediction.summary());
                    best = (candidate, prediction);
                    first = false;
                }
            }
        }
        best
    }
}

/// Is the candidate better than the incumbent?
fn prefer(
    candidate: &ParameterSet,
    prediction: &Prediction,
    distance: f64,
    incumbent: &ParameterSet,
    inc_prediction: &Prediction,
    inc_distance: f64,
) -> bool {
    let diff = prediction.score - inc_prediction.score;
    if diff > SCORE_TOLERANCE {
        return true;
    }
    if diff < -SCORE_TOLERANCE {
        return false;
    }
    let ordering = distance
        .total_cmp(&inc_distance)
        .then(candidate.mtu().cmp(&incumbent.mtu()))
        .then(candidate.buffer_size().cmp(&incumbent.buffer_size()));
    ordering == Ordering::Less
}

#[cfg(test)]
mod test {
    use assertables::{assert_ge, assert_le, assert_lt};

    use super::MtuDirection;
    use crate::{
        model::{AnalyticalModel, Link},
        tunnel::{Measurement, ParameterSet, Weights, BUFFER_RANGE, MTU_RANGE},
    };

    fn model() -> AnalyticalModel {
        AnalyticalModel::new(Link::default(), Weights::default())
    }

    fn measurement(latency_ms: f64, loss_fraction: f64) -> Measurement {
        Measurement {
            throughput_mbps: 1.2,
            latency_ms,
            loss_fraction,
            timestamp: 0.,
        }
    }

    #[test]
    fn deterministic_and_in_range() {
        let m = model();
        for mtu in [1280, 1300, 1420, 1490, 1500] {
            for buffer in [100, 105, 1000, 1950, 2000] {
                for (lat, loss) in [(20., 0.), (60., 0.02), (120., 0.08), (500., 1.)] {
                    let current = ParameterSet::clamped(mtu, buffer, false, false);
                    let meas = measurement(lat, loss);
                    let a = m.recommend(&meas, &current);
                    let b = m.recommend(&meas, &current);
                    assert_eq!(a, b);
                    assert!(MTU_RANGE.contains(&a.parameters.mtu()));
                    assert!(BUFFER_RANGE.contains(&a.parameters.buffer_size()));
                }
            }
        }
    }

    #[test]
    fn loss_spike_walks_mtu_down() {
        let m = model();
        let spike = measurement(60., 0.08);
        let mut current = ParameterSet::clamped(1500, 1000, false, false);
        for _ in 0..3 {
            let rec = m.recommend(&spike, &current);
            if rec.baseline.loss_probability > 0.05 && current.mtu() > 1280 {
                assert_eq!(rec.direction, MtuDirection::Decrease);
                assert_lt!(rec.parameters.mtu(), current.mtu());
            }
            current = rec.parameters;
        }
        // From 1500, every one of those three steps was a decrease
        assert_eq!(current.mtu(), 1440);
        assert!(current.priority_aws);
    }

    #[test]
    fn persistent_heavy_loss_reaches_floor() {
        let m = model();
        // High latency plus high loss keeps predicted congestion loss above the threshold
        let bad = measurement(180., 0.08);
        let mut current = ParameterSet::clamped(1400, 1000, false, false);
        for _ in 0..20 {
            let rec = m.recommend(&bad, &current);
            assert_le!(rec.parameters.mtu(), current.mtu());
            current = rec.parameters;
        }
        assert_eq!(current.mtu(), 1280);
        assert!(current.split_routing);
    }

    #[test]
    fn clean_link_grows_mtu() {
        let m = model();
        let good = measurement(40., 0.);
        let current = ParameterSet::clamped(1400, 1000, false, false);
        let rec = m.recommend(&good, &current);
        assert_eq!(rec.direction, MtuDirection::Increase);
        assert_eq!(rec.parameters.mtu(), 1420);
        let top = ParameterSet::clamped(1500, 1000, false, false);
        assert_eq!(m.recommend(&good, &top).parameters.mtu(), 1500);
    }

    #[test]
    fn ties_favour_least_change() {
        let m = model();
        // Middling loss: MTU may hold, and buffer changes make no measurable difference
        let meh = measurement(120., 0.02);
        let current = ParameterSet::clamped(1400, 1000, false, false);
        let rec = m.recommend(&meh, &current);
        assert_eq!(rec.direction, MtuDirection::Hold);
        assert_eq!(rec.parameters, current);
        assert_ge!(rec.gain(), -1e-4);
    }

    #[test]
    fn grid_search() {
        let m = model();
        let (best, prediction) = m.optimize(&measurement(60., 0.03), &ParameterSet::default());
        // Anything above the fragmentation threshold loses
        assert_le!(best.mtu(), 1420);
        assert!(!prediction.saturated);
        assert!(super::GRID_MTUS.contains(&best.mtu()));
    }
}

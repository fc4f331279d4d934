//! Live link measurements and the learned policy's view of them
// (c) 2024 Ross Younger

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{error::OptimizerError, util::RollingWindow};

/// A snapshot of the tunnel's observed performance, as sampled by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Delivered throughput, in megabits per second
    pub throughput_mbps: f64,
    /// Round-trip latency, in milliseconds
    pub latency_ms: f64,
    /// Fraction of packets lost, 0 to 1
    pub loss_fraction: f64,
    /// When the sample was taken, in seconds since the Unix epoch
    #[serde(default)]
    pub timestamp: f64,
}

impl Measurement {
    /// Creates a measurement stamped with the current time.
    ///
    /// No validation is performed here; see [`Measurement::validate`].
    #[must_use]
    pub fn now(throughput_mbps: f64, latency_ms: f64, loss_fraction: f64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            throughput_mbps,
            latency_ms,
            loss_fraction,
            timestamp,
        }
    }

    /// Checks that every field is finite and within its legal range.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |field, value| Err(OptimizerError::InvalidMeasurement { field, value });
        if !self.throughput_mbps.is_finite() || self.throughput_mbps < 0. {
            return invalid("throughput_mbps", self.throughput_mbps);
        }
        if !self.latency_ms.is_finite() || self.latency_ms < 0. {
            return invalid("latency_ms", self.latency_ms);
        }
        if !(0. ..=1.).contains(&self.loss_fraction) {
            // NaN is not contained in any range
            return invalid("loss_fraction", self.loss_fraction);
        }
        if !self.timestamp.is_finite() {
            return invalid("timestamp", self.timestamp);
        }
        Ok(())
    }

    /// The normalised state vector used by the learned policy
    #[must_use]
    pub fn state(&self) -> State {
        State::from(self)
    }
}

/// Field-by-field trailing means of the most recent measurements
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementWindow {
    throughput: RollingWindow,
    latency: RollingWindow,
    loss: RollingWindow,
    timestamp: f64,
}

impl MeasurementWindow {
    /// An empty window over the last `len` measurements (at least one)
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            throughput: RollingWindow::new(len),
            latency: RollingWindow::new(len),
            loss: RollingWindow::new(len),
            timestamp: 0.,
        }
    }

    /// Adds a measurement, dropping the oldest if the window is full
    pub fn push(&mut self, m: &Measurement) {
        self.throughput.push(m.throughput_mbps);
        self.latency.push(m.latency_ms);
        self.loss.push(m.loss_fraction);
        self.timestamp = m.timestamp;
    }

    /// The mean measurement, stamped with the time of the latest, if there is one
    #[must_use]
    pub fn mean(&self) -> Option<Measurement> {
        Some(Measurement {
            throughput_mbps: self.throughput.mean()?,
            latency_ms: self.latency.mean()?,
            loss_fraction: self.loss.mean()?,
            timestamp: self.timestamp,
        })
    }

    /// Number of measurements held
    #[must_use]
    pub fn len(&self) -> usize {
        self.throughput.len()
    }

    /// Whether no measurements are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.throughput.is_empty()
    }
}

/// Upper end of the normalisation range for throughput (Mbps)
const THROUGHPUT_SCALE: f64 = 10.0;
/// Upper end of the normalisation range for latency (ms)
const LATENCY_SCALE: f64 = 300.0;
/// Upper end of the normalisation range for loss (fraction)
const LOSS_SCALE: f64 = 0.10;

/// Number of features in a [`State`]
pub const STATE_DIM: usize = 3;

/// `[throughput, latency, loss]`, each scaled into `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State(pub [f64; STATE_DIM]);

impl State {
    /// Feature accessor
    #[must_use]
    pub fn features(&self) -> &[f64; STATE_DIM] {
        &self.0
    }

    /// True if every feature is a finite number
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

fn scale(value: f64, range: f64) -> f64 {
    (value / range).clamp(0., 1.)
}

impl From<&Measurement> for State {
    fn from(m: &Measurement) -> Self {
        Self([
            scale(m.throughput_mbps, THROUGHPUT_SCALE),
            scale(m.latency_ms, LATENCY_SCALE),
            scale(m.loss_fraction, LOSS_SCALE),
        ])
    }
}

#[cfg(test)]
mod test {
    use assertables::assert_in_delta;

    use super::{Measurement, MeasurementWindow, State};
    use crate::error::OptimizerError;

    fn m(t: f64, l: f64, p: f64) -> Measurement {
        Measurement {
            throughput_mbps: t,
            latency_ms: l,
            loss_fraction: p,
            timestamp: 0.,
        }
    }

    #[test]
    fn valid() {
        m(1.5, 40., 0.01).validate().unwrap();
        m(0., 0., 1.).validate().unwrap();
        Measurement::now(1., 1., 0.).validate().unwrap();
    }

    #[test]
    fn invalid_fields() {
        let cases = [
            (m(f64::NAN, 1., 0.), "throughput_mbps"),
            (m(-1., 1., 0.), "throughput_mbps"),
            (m(1., f64::INFINITY, 0.), "latency_ms"),
            (m(1., 1., 1.5), "loss_fraction"),
            (m(1., 1., f64::NAN), "loss_fraction"),
        ];
        for (meas, expected) in cases {
            match meas.validate() {
                Err(OptimizerError::InvalidMeasurement { field, .. }) => {
                    assert_eq!(field, expected);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn normalised() {
        let s = State::from(&m(5., 150., 0.05));
        assert_eq!(s.features(), &[0.5, 0.5, 0.5]);
        // out of range values saturate
        let s = m(100., 1000., 1.).state();
        assert_eq!(s.features(), &[1., 1., 1.]);
        assert!(s.is_finite());
    }

    #[test]
    fn window_smooths_a_spike() {
        let mut w = MeasurementWindow::new(3);
        assert!(w.mean().is_none());
        w.push(&m(1.2, 60., 0.));
        w.push(&m(1.2, 60., 0.));
        w.push(&Measurement {
            timestamp: 7.,
            ..m(0.9, 150., 0.09)
        });
        let mean = w.mean().unwrap();
        assert_in_delta!(mean.loss_fraction, 0.03, 1e-12);
        assert_in_delta!(mean.latency_ms, 90., 1e-12);
        assert_in_delta!(mean.timestamp, 7., f64::EPSILON);

        // The spike ages out
        for _ in 0..3 {
            w.push(&m(1.2, 60., 0.));
        }
        assert_eq!(w.len(), 3);
        assert_in_delta!(w.mean().unwrap().loss_fraction, 0., f64::EPSILON);
    }
}

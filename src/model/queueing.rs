//! M/M/1 and M/M/1/K queue formulae
// (c) 2024 Ross Younger

/// Utilisation is never allowed to reach 1; this is how close we let it get.
pub const SATURATION_EPSILON: f64 = 0.01;

/// Converts a link capacity in Mbps to a packet rate, for packets of `mtu` bytes
#[must_use]
pub fn packet_rate(capacity_mbps: f64, mtu: u16) -> f64 {
    capacity_mbps / (f64::from(mtu) * 8e-6)
}

/// Queue utilisation (ρ), clamped for stability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utilisation {
    /// The clamped value, `0 <= rho < 1`
    pub rho: f64,
    /// The value as computed, before clamping
    pub raw: f64,
    /// Whether clamping was necessary
    pub saturated: bool,
}

impl Utilisation {
    /// Computes `λ/μ`. A value at or above `1 - SATURATION_EPSILON` (or a meaningless one,
    /// such as arises from a zero service rate) is clamped and marked saturated.
    #[must_use]
    pub fn new(arrival_rate: f64, service_rate: f64) -> Self {
        let raw = arrival_rate / service_rate;
        let ceiling = 1. - SATURATION_EPSILON;
        if raw.is_finite() && raw < ceiling {
            Self {
                rho: raw.max(0.),
                raw,
                saturated: false,
            }
        } else {
            Self {
                rho: ceiling,
                raw,
                saturated: true,
            }
        }
    }

    /// Mean number of packets in an M/M/1 system, `ρ/(1-ρ)`
    #[must_use]
    pub fn mean_queue_length(&self) -> f64 {
        self.rho / (1. - self.rho)
    }

    /// Probability that an M/M/1/K birth-death queue with `k` places is full, `ρ^K (1-ρ)`.
    ///
    /// A queue with no room at all loses everything.
    #[must_use]
    pub fn overflow_probability(&self, k: f64) -> f64 {
        if k <= 0. {
            return 1.;
        }
        (self.rho.powf(k) * (1. - self.rho)).clamp(0., 1.)
    }
}

/// Mean time spent queueing, in milliseconds
#[must_use]
pub fn queueing_delay_ms(queue_length: f64, service_rate: f64) -> f64 {
    if service_rate > 0. {
        queue_length / service_rate * 1000.
    } else {
        0.
    }
}

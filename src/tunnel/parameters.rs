//! The tunnel configuration under optimization
// (c) 2024 Ross Younger

use std::{fmt::Display, ops::RangeInclusive};

use serde::{Deserialize, Serialize};

/// Legal MTU values, in bytes
pub const MTU_RANGE: RangeInclusive<u16> = 1280..=1500;
/// Legal buffer sizes, in packets
pub const BUFFER_RANGE: RangeInclusive<u32> = 100..=2000;

static_assertions::const_assert!(*MTU_RANGE.start() < *MTU_RANGE.end());
static_assertions::const_assert!(*BUFFER_RANGE.start() < *BUFFER_RANGE.end());

/// A candidate tunnel configuration.
///
/// `mtu` and `buffer_size` are kept inside [`MTU_RANGE`] and [`BUFFER_RANGE`].
/// Out of range requests are clamped rather than rejected, so an instance of this struct
/// always describes a configuration that can be applied.
/// (Deserialization clamps too.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawParameterSet")]
pub struct ParameterSet {
    mtu: u16,
    buffer_size: u32,
    /// Route only selected traffic through the tunnel
    pub split_routing: bool,
    /// Prefer the route towards the relay's cloud provider
    pub priority_aws: bool,
}

#[derive(Deserialize)]
struct RawParameterSet {
    mtu: u16,
    buffer_size: u32,
    #[serde(default)]
    split_routing: bool,
    #[serde(default)]
    priority_aws: bool,
}

impl From<RawParameterSet> for ParameterSet {
    fn from(raw: RawParameterSet) -> Self {
        Self::clamped(raw.mtu, raw.buffer_size, raw.split_routing, raw.priority_aws)
    }
}

impl Default for ParameterSet {
    /// The usual `WireGuard` MTU, with a mid-range buffer
    fn default() -> Self {
        Self::clamped(1420, 1000, false, false)
    }
}

impl ParameterSet {
    /// Constructor. Clamps `mtu` and `buffer_size` into range.
    #[must_use]
    pub fn clamped(mtu: u16, buffer_size: u32, split_routing: bool, priority_aws: bool) -> Self {
        Self {
            mtu: mtu.clamp(*MTU_RANGE.start(), *MTU_RANGE.end()),
            buffer_size: buffer_size.clamp(*BUFFER_RANGE.start(), *BUFFER_RANGE.end()),
            split_routing,
            priority_aws,
        }
    }

    /// MTU accessor
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Buffer size accessor (packets)
    #[must_use]
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Returns a copy with the MTU moved by `delta` bytes (clamped)
    #[must_use]
    pub fn with_mtu_delta(&self, delta: i32) -> Self {
        let mtu = i32::from(self.mtu).saturating_add(delta);
        let mtu = u16::try_from(mtu.max(0)).unwrap_or(u16::MAX);
        Self::clamped(mtu, self.buffer_size, self.split_routing, self.priority_aws)
    }

    /// Returns a copy with a different MTU (clamped)
    #[must_use]
    pub fn with_mtu(&self, mtu: u16) -> Self {
        Self::clamped(mtu, self.buffer_size, self.split_routing, self.priority_aws)
    }

    /// Returns a copy with a different buffer size (clamped)
    #[must_use]
    pub fn with_buffer_size(&self, buffer_size: u32) -> Self {
        Self::clamped(self.mtu, buffer_size, self.split_routing, self.priority_aws)
    }

    /// Returns a copy with the buffer size scaled by `factor` (rounded, then clamped)
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn with_buffer_scaled(&self, factor: f64) -> Self {
        let scaled = (f64::from(self.buffer_size) * factor).round();
        // clamp() happens afterwards; this cast saturates, and NaN becomes 0
        self.with_buffer_size(scaled as u32)
    }

    /// A unitless measure of how far `other` is from `self`.
    ///
    /// One unit is one analytical search step: 20 bytes of MTU, or 10% of our buffer size.
    /// Each differing routing flag also counts as one unit.
    #[must_use]
    pub fn perturbation(&self, other: &ParameterSet) -> f64 {
        let mtu = f64::from(self.mtu.abs_diff(other.mtu)) / 20.;
        let buffer = f64::from(self.buffer_size.abs_diff(other.buffer_size))
            / (0.1 * f64::from(self.buffer_size));
        let flags = u8::from(self.split_routing != other.split_routing)
            + u8::from(self.priority_aws != other.priority_aws);
        mtu + buffer + f64::from(flags)
    }
}

impl Display for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mtu {}, buffer {} packets, split routing {}, priority {}",
            self.mtu,
            self.buffer_size,
            if self.split_routing { "on" } else { "off" },
            if self.priority_aws { "on" } else { "off" },
        )
    }
}

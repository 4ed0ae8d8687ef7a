//! Performance measurements and candidate ranking.
//!
//! A measurement is a single observed round-trip time. An rtt of zero is the
//! sentinel for "ping did not complete" and always ranks as failure - it is
//! never treated as an infinitely fast peer.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One latency observation for a remote peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfMeasurement {
    /// Observed round-trip time. Zero means the probe did not complete.
    pub rtt: Duration,
}

impl PerfMeasurement {
    /// A completed measurement.
    pub const fn from_rtt(rtt: Duration) -> Self {
        Self { rtt }
    }

    /// The failure sentinel (zero rtt).
    pub const fn failed() -> Self {
        Self {
            rtt: Duration::ZERO,
        }
    }

    /// True if this measurement is the failure sentinel.
    pub fn is_failure(&self) -> bool {
        self.rtt.is_zero()
    }

    /// Ranking order for candidate selection: lower rtt ranks earlier, the
    /// failure sentinel ranks last, equal measurements compare equal so a
    /// stable sort preserves insertion order among ties.
    pub fn rank(&self, other: &PerfMeasurement) -> Ordering {
        match (self.is_failure(), other.is_failure()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.rtt.cmp(&other.rtt),
        }
    }

    /// True if this measurement strictly outranks `other`.
    pub fn is_better_than(&self, other: &PerfMeasurement) -> bool {
        self.rank(other) == Ordering::Less
    }
}

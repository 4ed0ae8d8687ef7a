//! Provider records and the reliability counter.

use svcfab_common::{NodeId, PerfMeasurement};

/// Reliability counter bounds.
pub const RELIABILITY_MAX: u8 = 100;

/// Counter assigned to new records and to records demoted a band - high
/// enough that one bad tick cannot chain a record across multiple bands.
pub const RELIABILITY_INITIAL: u8 = 50;

/// A band-0 record dropping below this is demoted.
pub const TOP_BAND_FLOOR: u8 = 90;

/// A middle-band record rising above this is promoted.
pub const PROMOTE_ABOVE: u8 = 90;

/// A middle-band record dropping below this is demoted.
pub const DEMOTE_BELOW: u8 = 10;

/// Penalty applied on a soft probe failure.
pub const SOFT_FAIL_PENALTY: u8 = 10;

/// Request to track a provider, as learned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub peer: NodeId,
    pub service_name: String,
    pub service_hash: String,
    /// Opaque routing string. Stored and returned, never parsed.
    pub address: String,
}

/// One tracked remote Manager.
///
/// Owned exclusively by the cache; external code only ever receives copies
/// or projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub peer: NodeId,
    pub service_hash: String,
    pub service_name: String,
    pub address: String,
    /// Most recent probe result. Empty (zero) until the first sweep.
    pub last_perf: PerfMeasurement,
    /// Reliability counter in `[0, 100]`.
    pub reliability: u8,
}

impl ProviderRecord {
    pub fn new(request: ProviderRequest) -> Self {
        Self {
            peer: request.peer,
            service_hash: request.service_hash,
            service_name: request.service_name,
            address: request.address,
            last_perf: PerfMeasurement::default(),
            reliability: RELIABILITY_INITIAL,
        }
    }

    /// Reward a passing probe: +1, saturating at the ceiling.
    pub fn reward(&mut self) {
        if self.reliability < RELIABILITY_MAX {
            self.reliability += 1;
        }
    }

    /// Penalize a soft failure: −10, saturating at zero.
    pub fn penalize(&mut self) {
        self.reliability = self.reliability.saturating_sub(SOFT_FAIL_PENALTY);
    }
}

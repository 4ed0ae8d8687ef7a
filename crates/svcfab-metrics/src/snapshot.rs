use serde::{Deserialize, Serialize};

/// Serializable point-in-time view of the fabric counters.
///
/// This is the payload served by the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub discovery_resolutions: u64,
    pub allocation_resolutions: u64,
    pub resolve_failures: u64,
    pub sweep_passes: u64,
    pub sweep_evictions: u64,
    pub allocations_served: u64,
    pub allocations_failed: u64,
    pub requests_proxied: u64,
    pub requests_failed: u64,
}

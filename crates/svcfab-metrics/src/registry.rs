use std::sync::atomic::{AtomicU64, Ordering};

use crate::snapshot::MetricsSnapshot;

/// Counter registry shared across the fabric.
///
/// One instance per process, shared by `Arc`. Increments use relaxed
/// ordering - counters are monotonic and never read back on the hot path.
#[derive(Debug, Default)]
pub struct FabricMetrics {
    /// Resolutions served straight from the peer cache.
    cache_hits: AtomicU64,
    /// Resolutions served via overlay discovery.
    discovery_resolutions: AtomicU64,
    /// Resolutions served by remote allocation.
    allocation_resolutions: AtomicU64,
    /// Resolutions that exhausted every path.
    resolve_failures: AtomicU64,
    /// Completed sweep passes.
    sweep_passes: AtomicU64,
    /// Records evicted by sweeps (hard failures plus trash flushes).
    sweep_evictions: AtomicU64,
    /// Instances spawned by the local allocator role.
    allocations_served: AtomicU64,
    /// Allocation commands that failed locally.
    allocations_failed: AtomicU64,
    /// Application requests proxied by the local manager role.
    requests_proxied: AtomicU64,
    /// Application requests answered with the dead-service sentinel.
    requests_failed: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $add:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl FabricMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_cache_hit, add_cache_hits, cache_hits);
    counter!(
        record_discovery_resolution,
        add_discovery_resolutions,
        discovery_resolutions
    );
    counter!(
        record_allocation_resolution,
        add_allocation_resolutions,
        allocation_resolutions
    );
    counter!(record_resolve_failure, add_resolve_failures, resolve_failures);
    counter!(record_sweep_pass, add_sweep_passes, sweep_passes);
    counter!(record_sweep_eviction, add_sweep_evictions, sweep_evictions);
    counter!(
        record_allocation_served,
        add_allocations_served,
        allocations_served
    );
    counter!(
        record_allocation_failed,
        add_allocations_failed,
        allocations_failed
    );
    counter!(record_request_proxied, add_requests_proxied, requests_proxied);
    counter!(record_request_failed, add_requests_failed, requests_failed);

    /// Point-in-time view of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            discovery_resolutions: self.discovery_resolutions.load(Ordering::Relaxed),
            allocation_resolutions: self.allocation_resolutions.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            sweep_passes: self.sweep_passes.load(Ordering::Relaxed),
            sweep_evictions: self.sweep_evictions.load(Ordering::Relaxed),
            allocations_served: self.allocations_served.load(Ordering::Relaxed),
            allocations_failed: self.allocations_failed.load(Ordering::Relaxed),
            requests_proxied: self.requests_proxied.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

//! The background reliability sweep.
//!
//! One pass probes every tracked provider with its service's hard rtt budget
//! as the ping timeout, classifies the result against the hard/soft
//! requirements, re-bands by reliability, flushes the trash tier, and
//! re-sorts every band by observed rtt. The whole pass runs under the cache
//! lock as one atomic critical section.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use svcfab_common::overlay::Overlay;
use svcfab_common::registry::{NetRequirement, RegistryCache};
use svcfab_metrics::FabricMetrics;

use crate::cache::PeerCache;

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Delay between the end of one sweep and the start of the next.
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// The sweeper task.
///
/// Owns shared handles to the cache, the overlay (for pings), and the
/// registry cache (for per-service budgets).
pub struct Sweeper {
    cache: Arc<PeerCache>,
    overlay: Arc<dyn Overlay>,
    registry: Arc<RegistryCache>,
    metrics: Arc<FabricMetrics>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        cache: Arc<PeerCache>,
        overlay: Arc<dyn Overlay>,
        registry: Arc<RegistryCache>,
        metrics: Arc<FabricMetrics>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            cache,
            overlay,
            registry,
            metrics,
            config,
        }
    }

    /// Run sweeps until the root token is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.config.interval, "cache sweeper starting");
        loop {
            // The timer is armed only after the previous sweep completes, so
            // sweeps never overlap regardless of how long one takes.
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("cache sweeper stopping");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
            self.sweep().await;
        }
    }

    /// One sweep pass. Public so tests can drive the cache deterministically
    /// without the background task.
    pub async fn sweep(&self) {
        let mut table = self.cache.lock().await;
        let mut evicted = 0u64;

        // Probe pass: update rtt and reliability, evicting hard failures.
        for band in 0..table.num_bands() {
            let mut i = 0;
            while i < table.band_len(band) {
                let (peer, service_name) = table.probe_target(band, i);

                let net = match self.registry.get_or_request(&service_name).await {
                    Ok(info) => info.net,
                    Err(e) => {
                        tracing::warn!(
                            service = %service_name,
                            error = %e,
                            "unable to get service requirements; probing degraded"
                        );
                        NetRequirement::default()
                    }
                };

                let perf = self.overlay.ping(&peer, net.rtt_hard).await;
                let class = net.classify(perf.rtt);
                if table.apply_probe(band, i, class, perf.rtt) {
                    tracing::debug!(peer = %peer.short(), "provider hard-failed, evicted");
                    evicted += 1;
                } else {
                    i += 1;
                }
            }
        }

        table.reband();
        evicted += table.flush_trash() as u64;
        table.sort_bands();

        self.metrics.record_sweep_pass();
        if evicted > 0 {
            self.metrics.add_sweep_evictions(evicted);
        }
    }
}

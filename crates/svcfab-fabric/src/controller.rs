//! The allocation controller.
//!
//! Resolves a service hash to a usable provider through three stages: the
//! peer cache, overlay discovery, and remote allocation by a ranked set of
//! allocators. Transport and protocol failures against individual candidates
//! are absorbed - iteration simply advances - so the surface error is always
//! "nothing usable" (or, for the better-than variant, "no improvement").

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use svcfab_common::overlay::Overlay;
use svcfab_common::protocol::alloc::{is_instance_addr, read_line, write_line, AllocCommand};
use svcfab_common::protocol::{
    ALLOCATOR_RENDEZVOUS, ALLOC_PROTOCOL_ID, MAX_MESSAGE_SIZE, REQUEST_PROTOCOL_ID, SERVICE_DEAD,
};
use svcfab_common::{FabricError, NodeId, PerfMeasurement, Result};
use svcfab_metrics::FabricMetrics;

use crate::cache::PeerCache;
use crate::record::ProviderRequest;

/// Probe budget for ranking candidates whose service requirements are not
/// yet known. The sweeper applies the per-service budgets from then on.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Per-candidate deadline for the allocation exchange (stream open, command
/// write, reply read).
pub const ALLOC_DEADLINE: Duration = Duration::from_secs(5);

/// A resolved provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub peer: NodeId,
    /// Opaque routing string, when one is known: the cached address on a
    /// cache hit, the allocator's reply on the allocation path. Discovery
    /// hits carry none - traffic goes to the peer's manager, not an address.
    pub address: Option<String>,
    /// Measured perf of the chosen candidate. Unspecified on a cache hit.
    pub perf: Option<PerfMeasurement>,
}

/// Resolves service hashes to providers and forwards application requests.
pub struct Controller {
    overlay: Arc<dyn Overlay>,
    cache: Arc<PeerCache>,
    metrics: Arc<FabricMetrics>,
}

impl Controller {
    pub fn new(
        overlay: Arc<dyn Overlay>,
        cache: Arc<PeerCache>,
        metrics: Arc<FabricMetrics>,
    ) -> Self {
        Self {
            overlay,
            cache,
            metrics,
        }
    }

    /// Resolve `service_hash` to a usable provider.
    ///
    /// Stages: cache hit, then overlay discovery ranked by probe, then
    /// remote allocation by ranked allocators. Providers learned on the way
    /// are reported to the cache so future requests hit it.
    pub async fn resolve(&self, service_name: &str, service_hash: &str) -> Result<Resolution> {
        // Cache path.
        if let Some((peer, address)) = self.cache.get(service_hash).await {
            self.metrics.record_cache_hit();
            return Ok(Resolution {
                peer,
                address: Some(address),
                perf: None,
            });
        }

        // Discovery path.
        let ranked = self.ranked_peers(service_hash).await;
        if let Some((peer, perf)) = ranked.into_iter().next() {
            tracing::info!(
                peer = %peer.short(),
                rtt = ?perf.rtt,
                service = %service_hash,
                "resolved via discovery"
            );
            self.cache
                .add(ProviderRequest {
                    peer,
                    service_name: service_name.to_string(),
                    service_hash: service_hash.to_string(),
                    address: String::new(),
                })
                .await;
            self.metrics.record_discovery_resolution();
            return Ok(Resolution {
                peer,
                address: None,
                perf: Some(perf),
            });
        }

        // Allocation path.
        match self.allocate(service_hash, None).await {
            Ok((peer, address, perf)) => {
                self.cache
                    .add(ProviderRequest {
                        peer,
                        service_name: service_name.to_string(),
                        service_hash: service_hash.to_string(),
                        address: address.clone(),
                    })
                    .await;
                self.metrics.record_allocation_resolution();
                Ok(Resolution {
                    peer,
                    address: Some(address),
                    perf: Some(perf),
                })
            }
            Err(e) => {
                self.metrics.record_resolve_failure();
                Err(e)
            }
        }
    }

    /// Allocate a fresh instance, but only on an allocator strictly better
    /// than `floor`. Errors with [`FabricError::NoImprovement`] the moment
    /// the ranked iteration reaches a candidate that is not.
    pub async fn resolve_better_than(
        &self,
        service_hash: &str,
        floor: PerfMeasurement,
    ) -> Result<Resolution> {
        let (peer, address, perf) = self.allocate(service_hash, Some(floor)).await?;
        Ok(Resolution {
            peer,
            address: Some(address),
            perf: Some(perf),
        })
    }

    /// Send a serialized application request to `peer`'s manager and return
    /// the serialized response.
    ///
    /// Surfaces [`FabricError::ServiceDead`] when the manager answers with
    /// the dead-service sentinel.
    pub async fn forward(&self, peer: &NodeId, request: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self.overlay.open_stream(peer, REQUEST_PROTOCOL_ID).await?;
        stream.send.write_all(request).await?;
        stream.finish().await?;

        let mut response = Vec::new();
        (&mut stream.recv)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_to_end(&mut response)
            .await?;
        if response.len() > MAX_MESSAGE_SIZE {
            return Err(FabricError::Protocol("response exceeds size limit".to_string()));
        }
        if response.starts_with(SERVICE_DEAD.as_bytes()) {
            return Err(FabricError::ServiceDead);
        }
        Ok(response)
    }

    /// Discover and rank peers under `rendezvous`: probe every candidate
    /// with the default budget, drop the unreachable, and stable-sort by
    /// ascending rtt (insertion order breaks ties). Discovery errors rank as
    /// an empty candidate list.
    async fn ranked_peers(&self, rendezvous: &str) -> Vec<(NodeId, PerfMeasurement)> {
        let peers = match self.overlay.find_peers(rendezvous).await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!(rendezvous, error = %e, "peer discovery failed");
                return Vec::new();
            }
        };

        let probes = peers.into_iter().map(|peer| {
            let overlay = self.overlay.clone();
            async move {
                let perf = overlay.ping(&peer, DEFAULT_PROBE_TIMEOUT).await;
                (peer, perf)
            }
        });
        let mut ranked: Vec<(NodeId, PerfMeasurement)> = join_all(probes)
            .await
            .into_iter()
            .filter(|(_, perf)| !perf.is_failure())
            .collect();
        ranked.sort_by(|a, b| a.1.rank(&b.1));
        ranked
    }

    /// The allocation path: iterate allocators in rank order until one
    /// produces a well-formed instance address.
    async fn allocate(
        &self,
        service_hash: &str,
        floor: Option<PerfMeasurement>,
    ) -> Result<(NodeId, String, PerfMeasurement)> {
        let ranked = self.ranked_peers(ALLOCATOR_RENDEZVOUS).await;
        if ranked.is_empty() {
            return Err(FabricError::NotFound(format!(
                "no allocators available for {}",
                service_hash
            )));
        }

        for (peer, perf) in ranked {
            if let Some(floor) = &floor {
                // Ranked ascending: once one candidate is not strictly
                // better, none after it can be.
                if !perf.is_better_than(floor) {
                    return Err(FabricError::NoImprovement);
                }
            }

            tracing::info!(peer = %peer.short(), service = %service_hash, "requesting allocation");
            match tokio::time::timeout(ALLOC_DEADLINE, self.request_alloc(&peer, service_hash))
                .await
            {
                Ok(Ok(address)) => return Ok((peer, address, perf)),
                Ok(Err(e)) => {
                    tracing::warn!(peer = %peer.short(), error = %e, "allocation attempt failed");
                }
                Err(_) => {
                    tracing::warn!(peer = %peer.short(), "allocation attempt timed out");
                }
            }
        }

        Err(FabricError::NotFound(format!(
            "no allocator could spawn {}",
            service_hash
        )))
    }

    /// One allocation exchange against one allocator.
    async fn request_alloc(&self, peer: &NodeId, service_hash: &str) -> Result<String> {
        let mut stream = self.overlay.open_stream(peer, ALLOC_PROTOCOL_ID).await?;
        let command = AllocCommand::StartProgram {
            service_hash: service_hash.to_string(),
        };
        write_line(&mut stream.send, &command.encode()).await?;
        stream.finish().await?;

        let reply = read_line(&mut stream.recv).await?;
        if is_instance_addr(&reply) {
            tracing::info!(instance = %reply, "new instance allocated");
            Ok(reply)
        } else {
            Err(FabricError::Protocol(format!(
                "allocator reply does not match the address grammar: {}",
                reply
            )))
        }
    }
}

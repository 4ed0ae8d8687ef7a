//! The peer cache.
//!
//! A [`TierTable`] behind the single mutex that serializes adds, removals,
//! look-ups, and sweeps. Readers observe either the pre-sweep or post-sweep
//! state, never a partial one: the sweeper holds the lock for the entire
//! sweep, including its probes.

use tokio::sync::{Mutex, MutexGuard};

use svcfab_common::NodeId;

use crate::record::ProviderRequest;
use crate::tiers::TierTable;

/// Shared, mutex-guarded tier table.
///
/// This is the only mutable shared state in the fabric core.
#[derive(Debug, Default)]
pub struct PeerCache {
    table: Mutex<TierTable>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(TierTable::new()),
        }
    }

    /// Wrap a pre-populated table (bootstrap and tests).
    pub fn from_table(table: TierTable) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    /// Track a new provider. Never fails; blocks briefly on the cache lock.
    pub async fn add(&self, request: ProviderRequest) {
        tracing::info!(
            peer = %request.peer.short(),
            service = %request.service_hash,
            "tracking new provider"
        );
        self.table.lock().await.insert(request);
    }

    /// Untrack the provider matching `(peer, address)` if it is among the
    /// top-ranked records of any live band. Silent no-op otherwise.
    pub async fn remove(&self, peer: &NodeId, address: &str) {
        let removed = self.table.lock().await.remove(peer, address);
        if removed {
            tracing::info!(peer = %peer.short(), address, "provider removed from cache");
        }
    }

    /// Best known provider of `service_hash`, or `None` on a miss.
    pub async fn get(&self, service_hash: &str) -> Option<(NodeId, String)> {
        let hit = self.table.lock().await.get(service_hash);
        if let Some((peer, _)) = &hit {
            tracing::debug!(peer = %peer.short(), service = %service_hash, "cache hit");
        }
        hit
    }

    /// Exclusive access to the underlying table, held across the whole sweep.
    pub async fn lock(&self) -> MutexGuard<'_, TierTable> {
        self.table.lock().await
    }
}

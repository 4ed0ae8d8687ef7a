//! Service registry adapter.
//!
//! Resolves a service name to its descriptor - content hash plus hard/soft
//! network requirements - with TTL caching in front of whatever client backs
//! the lookup. The sweeper consults this on every probe, so lookups must be
//! cheap in the steady state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::protocol::error::{FabricError, Result};

/// Default registry cache TTL.
pub const DEFAULT_REGISTRY_TTL: Duration = Duration::from_secs(600);

/// Per-service latency budgets.
///
/// `rtt_hard` is the outright reject threshold - a provider exceeding it (or
/// failing the probe entirely) is evicted. `rtt_soft` is the "acceptable but
/// penalize" threshold. The zero value is the degraded requirement used when
/// a registry lookup fails; under it any real measurement hard-fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetRequirement {
    pub rtt_hard: Duration,
    pub rtt_soft: Duration,
}

/// Outcome of classifying one probe against a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeClass {
    /// Probe failed or exceeded the hard budget - evict.
    HardFail,
    /// Probe exceeded the soft budget - record the rtt, penalize.
    SoftFail,
    /// Probe within budget - record the rtt, reward.
    Pass,
}

impl NetRequirement {
    /// Classify an observed rtt. Zero is the "probe did not complete"
    /// sentinel and always hard-fails.
    pub fn classify(&self, rtt: Duration) -> ProbeClass {
        if rtt.is_zero() || rtt > self.rtt_hard {
            ProbeClass::HardFail
        } else if rtt > self.rtt_soft {
            ProbeClass::SoftFail
        } else {
            ProbeClass::Pass
        }
    }
}

/// A service descriptor as resolved from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    /// Content-addressable identifier of the service.
    pub hash: String,
    pub net: NetRequirement,
}

/// Content hash for a service descriptor without an explicit hash.
pub fn service_hash(name: &str) -> String {
    blake3::hash(name.as_bytes()).to_hex().to_string()
}

/// Capability that resolves service names to descriptors.
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    async fn lookup(&self, service_name: &str) -> Result<ServiceInfo>;
}

/// Registry client backed by a static descriptor table.
///
/// Loaded from the node's service descriptor file; entries without an
/// explicit hash get the content hash of their name.
pub struct StaticRegistry {
    services: HashMap<String, ServiceInfo>,
}

impl StaticRegistry {
    pub fn new(services: impl IntoIterator<Item = ServiceInfo>) -> Self {
        Self {
            services: services
                .into_iter()
                .map(|mut info| {
                    if info.hash.is_empty() {
                        info.hash = service_hash(&info.name);
                    }
                    (info.name.clone(), info)
                })
                .collect(),
        }
    }

    /// Load a JSON array of [`ServiceInfo`] entries.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let services: Vec<ServiceInfo> = serde_json::from_str(&contents)?;
        Ok(Self::new(services))
    }

    /// Look up a descriptor by its service hash instead of its name.
    pub fn by_hash(&self, hash: &str) -> Option<&ServiceInfo> {
        self.services.values().find(|info| info.hash == hash)
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn lookup(&self, service_name: &str) -> Result<ServiceInfo> {
        self.services
            .get(service_name)
            .cloned()
            .ok_or_else(|| FabricError::NotFound(format!("service {}", service_name)))
    }
}

/// TTL cache in front of a [`RegistryClient`].
pub struct RegistryCache {
    client: Arc<dyn RegistryClient>,
    ttl: Duration,
    entries: Mutex<HashMap<String, (ServiceInfo, Instant)>>,
}

impl RegistryCache {
    pub fn new(client: Arc<dyn RegistryClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl(client: Arc<dyn RegistryClient>) -> Self {
        Self::new(client, DEFAULT_REGISTRY_TTL)
    }

    /// Resolve `service_name`, serving from cache while the entry is fresh.
    pub async fn get_or_request(&self, service_name: &str) -> Result<ServiceInfo> {
        {
            let entries = self.entries.lock().await;
            if let Some((info, fetched_at)) = entries.get(service_name) {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(info.clone());
                }
            }
        }

        let info = self.client.lookup(service_name).await?;
        self.entries
            .lock()
            .await
            .insert(service_name.to_string(), (info.clone(), Instant::now()));
        Ok(info)
    }
}

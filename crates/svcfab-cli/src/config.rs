//! Node configuration.
//!
//! One JSON file per node; CLI flags override individual fields. Every
//! section has working defaults so a bare `{}` is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use svcfab_common::registry::{NetRequirement, ServiceInfo};
use svcfab_common::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network interface for discovery multicast. Empty = OS default.
    pub interface: String,
    /// UDP port for the overlay endpoint. 0 = ephemeral.
    pub overlay_port: u16,
    /// Node identity key. Auto-generated on first run.
    pub key_path: PathBuf,
    /// Pre-shared key separating co-located fabrics.
    pub psk: String,
    /// Local metrics endpoint port.
    pub metrics_port: u16,
    /// Delay between cache sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Peers to pin into discovery at startup.
    pub bootstrap_peers: Vec<BootstrapPeer>,
    /// Services this node knows requirements for.
    pub services: Vec<ServiceEntry>,
    pub manager: ManagerSection,
    pub allocator: AllocatorSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: String::new(),
            overlay_port: 0,
            key_path: PathBuf::from("svcfab-node.key"),
            psk: "svcfab".to_string(),
            metrics_port: 9101,
            sweep_interval_ms: 1000,
            bootstrap_peers: Vec::new(),
            services: Vec::new(),
            manager: ManagerSection::default(),
            allocator: AllocatorSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapPeer {
    /// Rendezvous key the peer serves (a service hash or the allocator
    /// rendezvous).
    pub rendezvous: String,
    /// Hex node id.
    pub node_id: String,
    /// Socket address of the peer's overlay endpoint.
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    pub name: String,
    /// Content hash; empty = derived from the name.
    pub hash: String,
    pub rtt_hard_ms: u64,
    pub rtt_soft_ms: u64,
}

impl Default for ServiceEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            hash: String::new(),
            rtt_hard_ms: 100,
            rtt_soft_ms: 40,
        }
    }
}

impl ServiceEntry {
    pub fn to_info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            hash: self.hash.clone(),
            net: NetRequirement {
                rtt_hard: Duration::from_millis(self.rtt_hard_ms),
                rtt_soft: Duration::from_millis(self.rtt_soft_ms),
            },
        }
    }
}

/// Manager role settings: which service this node fronts and where the
/// instance listens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    pub service: String,
    pub service_addr: String,
}

/// Allocator role settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorSection {
    /// Spawn command template. `{hash}` and `{addr}` are substituted.
    pub spawn_command: Vec<String>,
    /// Address spawned instances listen on.
    pub instance_addr: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn service_infos(&self) -> Vec<ServiceInfo> {
        self.services.iter().map(ServiceEntry::to_info).collect()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_a_valid_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.metrics_port, 9101);
        assert_eq!(config.sweep_interval_ms, 1000);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_load_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svcfab.json");
        std::fs::write(
            &path,
            r#"{
                "psk": "prod-fabric",
                "services": [
                    {"name": "imgproc", "rtt_hard_ms": 80, "rtt_soft_ms": 30}
                ],
                "manager": {"service": "imgproc", "service_addr": "127.0.0.1:9000"}
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.psk, "prod-fabric");
        assert_eq!(config.manager.service, "imgproc");

        let infos = config.service_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].net.rtt_hard, Duration::from_millis(80));
    }

    #[test]
    fn test_unknown_service_fields_keep_defaults() {
        let entry: ServiceEntry = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(entry.rtt_hard_ms, 100);
        assert_eq!(entry.rtt_soft_ms, 40);
    }
}

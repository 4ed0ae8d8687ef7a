//! The instance spawner capability.

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use svcfab_common::{FabricError, Result};

/// Brings up a local instance of a service and reports where it listens.
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    /// Spawn an instance of the service named by `service_hash` and return
    /// its `host:port`.
    async fn spawn(&self, service_hash: &str) -> Result<String>;
}

/// Spawner backed by a configured command template.
///
/// Each `{hash}` in the template is replaced with the requested service
/// hash, and `{addr}` with the configured instance address. Spawned children
/// are retained so they are not reaped while the node runs; instance
/// lifecycle beyond the spawn is out of scope.
pub struct ProcessSpawner {
    command: Vec<String>,
    instance_addr: String,
    children: Mutex<Vec<Child>>,
}

impl ProcessSpawner {
    pub fn new(command: Vec<String>, instance_addr: String) -> Self {
        Self {
            command,
            instance_addr,
            children: Mutex::new(Vec::new()),
        }
    }

    fn argv(&self, service_hash: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|part| {
                part.replace("{hash}", service_hash)
                    .replace("{addr}", &self.instance_addr)
            })
            .collect()
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self, service_hash: &str) -> Result<String> {
        let argv = self.argv(service_hash);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| FabricError::Config("empty spawn command".to_string()))?;

        let child = Command::new(program).args(args).spawn().map_err(|e| {
            FabricError::Internal(format!("failed to spawn {}: {}", program, e))
        })?;
        tracing::info!(
            service = %service_hash,
            pid = child.id().unwrap_or(0),
            addr = %self.instance_addr,
            "service instance spawned"
        );

        self.children.lock().await.push(child);
        Ok(self.instance_addr.clone())
    }
}

//! The Allocator role.
//!
//! One command line in, one reply line out. `START-PROGRAM <hash>` spawns an
//! instance through the [`Spawner`] capability and answers with its
//! `host:port`; anything else - unknown verbs, spawn failures, a spawner
//! reply that does not satisfy the address grammar - answers with the error
//! token and closes.

use std::sync::Arc;

use async_trait::async_trait;

use svcfab_common::overlay::{OverlayStream, StreamHandler};
use svcfab_common::protocol::alloc::{is_instance_addr, read_line, write_line, AllocCommand};
use svcfab_common::protocol::ERROR_TOKEN;
use svcfab_common::Result;
use svcfab_metrics::FabricMetrics;

use crate::spawner::Spawner;

/// Stream handler for the allocation protocol.
pub struct AllocatorHandler {
    spawner: Arc<dyn Spawner>,
    metrics: Arc<FabricMetrics>,
}

impl AllocatorHandler {
    pub fn new(spawner: Arc<dyn Spawner>, metrics: Arc<FabricMetrics>) -> Self {
        Self { spawner, metrics }
    }

    async fn reply_for(&self, line: &str) -> String {
        let command = match AllocCommand::parse(line) {
            Some(command) => command,
            None => {
                tracing::warn!(line, "unknown allocation command");
                self.metrics.record_allocation_failed();
                return ERROR_TOKEN.to_string();
            }
        };

        let AllocCommand::StartProgram { service_hash } = command;
        match self.spawner.spawn(&service_hash).await {
            Ok(address) if is_instance_addr(&address) => {
                self.metrics.record_allocation_served();
                address
            }
            Ok(address) => {
                tracing::error!(
                    address = %address,
                    "spawner produced an address outside the reply grammar"
                );
                self.metrics.record_allocation_failed();
                ERROR_TOKEN.to_string()
            }
            Err(e) => {
                tracing::warn!(service = %service_hash, error = %e, "spawn failed");
                self.metrics.record_allocation_failed();
                ERROR_TOKEN.to_string()
            }
        }
    }
}

#[async_trait]
impl StreamHandler for AllocatorHandler {
    async fn handle(&self, mut stream: OverlayStream) -> Result<()> {
        tracing::debug!(peer = %stream.peer.short(), "allocation request received");
        let line = read_line(&mut stream.recv).await?;
        let reply = self.reply_for(&line).await;
        write_line(&mut stream.send, &reply).await?;
        stream.finish().await?;
        Ok(())
    }
}

//! Shared test infrastructure: a scripted in-memory overlay.
//!
//! `MockOverlay` answers discovery from a scripted rendezvous table, pings
//! from a scripted rtt table, and `open_stream` by wiring an in-memory
//! duplex pipe to the handler registered for the target peer - so the
//! controller, the sweeper, and the role handlers run their real protocol
//! code without any networking.

// Each test binary compiles its own copy; not every binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use svcfab_common::overlay::{Overlay, OverlayStream, StreamHandler};
use svcfab_common::protocol::alloc::{read_line, write_line};
use svcfab_common::{FabricError, NodeId, PerfMeasurement, Result};

pub struct MockOverlay {
    id: NodeId,
    rendezvous: DashMap<String, Vec<NodeId>>,
    rtts: DashMap<NodeId, Duration>,
    handlers: DashMap<(NodeId, String), Arc<dyn StreamHandler>>,
}

impl MockOverlay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::generate(),
            rendezvous: DashMap::new(),
            rtts: DashMap::new(),
            handlers: DashMap::new(),
        })
    }

    /// Advertise `peer` under `rendezvous` with a scripted rtt.
    pub fn add_peer(&self, rendezvous: &str, peer: NodeId, rtt: Duration) {
        self.rendezvous
            .entry(rendezvous.to_string())
            .or_default()
            .push(peer);
        self.rtts.insert(peer, rtt);
    }

    pub fn set_rtt(&self, peer: NodeId, rtt: Duration) {
        self.rtts.insert(peer, rtt);
    }

    /// Install the handler a remote `peer` serves for `protocol_id`.
    pub fn serve(&self, peer: NodeId, protocol_id: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert((peer, protocol_id.to_string()), handler);
    }
}

#[async_trait]
impl Overlay for MockOverlay {
    fn local_id(&self) -> NodeId {
        self.id
    }

    async fn find_peers(&self, rendezvous: &str) -> Result<Vec<NodeId>> {
        Ok(self
            .rendezvous
            .get(rendezvous)
            .map(|peers| peers.value().clone())
            .unwrap_or_default())
    }

    async fn open_stream(&self, peer: &NodeId, protocol_id: &str) -> Result<OverlayStream> {
        let handler = self
            .handlers
            .get(&(*peer, protocol_id.to_string()))
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                FabricError::Transport(format!(
                    "peer {} serves no handler for {}",
                    peer.short(),
                    protocol_id
                ))
            })?;

        let (near, far) = tokio::io::duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);

        let remote_stream = OverlayStream::new(self.id, far_write, far_read);
        tokio::spawn(async move {
            let _ = handler.handle(remote_stream).await;
        });

        Ok(OverlayStream::new(*peer, near_write, near_read))
    }

    async fn ping(&self, peer: &NodeId, timeout: Duration) -> PerfMeasurement {
        let rtt = self.rtts.get(peer).map(|r| *r).unwrap_or(Duration::ZERO);
        if rtt.is_zero() || rtt > timeout {
            PerfMeasurement::failed()
        } else {
            PerfMeasurement::from_rtt(rtt)
        }
    }

    fn register_handler(&self, protocol_id: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers
            .insert((self.id, protocol_id.to_string()), handler);
    }
}

/// Handler that answers any single command line with a fixed reply line -
/// stands in for a remote allocator.
pub struct ScriptedReply(pub String);

#[async_trait]
impl StreamHandler for ScriptedReply {
    async fn handle(&self, mut stream: OverlayStream) -> Result<()> {
        let _command = read_line(&mut stream.recv).await?;
        write_line(&mut stream.send, &self.0).await?;
        stream.finish().await?;
        Ok(())
    }
}

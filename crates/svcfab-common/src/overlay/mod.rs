//! Overlay adapter.
//!
//! The fabric core consumes the overlay network through the [`Overlay`]
//! capability trait: peer discovery by rendezvous key, stream open by
//! protocol id, RTT ping with an explicit timeout, and handler registration.
//! The shipped implementation is [`quic::QuicOverlay`] (quinn streams plus
//! [`discovery`] multicast rendezvous); tests substitute scripted overlays.

pub mod discovery;
pub mod quic;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::identity::NodeId;
use crate::perf::PerfMeasurement;
use crate::protocol::error::Result;

pub use quic::QuicOverlay;

/// A bidirectional stream to a remote peer, already bound to a protocol.
///
/// The reader and writer halves are owned by the handling task and released
/// when the stream is dropped.
pub struct OverlayStream {
    /// The remote end of this stream.
    pub peer: NodeId,
    pub send: Box<dyn AsyncWrite + Send + Unpin>,
    pub recv: Box<dyn AsyncRead + Send + Unpin>,
}

impl OverlayStream {
    pub fn new(
        peer: NodeId,
        send: impl AsyncWrite + Send + Unpin + 'static,
        recv: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            peer,
            send: Box::new(send),
            recv: Box::new(recv),
        }
    }

    /// Finish the send side so the remote reader observes EOF.
    pub async fn finish(&mut self) -> Result<()> {
        self.send.shutdown().await?;
        Ok(())
    }
}

/// An inbound-stream handler bound to a protocol id.
///
/// Handlers are capability functions bound to local state captured at
/// registration time (e.g. the Manager handler captures the local service
/// address). They must not assume anything about the order or concurrency of
/// invocations: one task is spawned per accepted stream.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn handle(&self, stream: OverlayStream) -> Result<()>;
}

/// The overlay capability consumed by the fabric core.
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// This node's stable overlay identity.
    fn local_id(&self) -> NodeId;

    /// Peers currently advertising under `rendezvous`, in no particular
    /// order.
    async fn find_peers(&self, rendezvous: &str) -> Result<Vec<NodeId>>;

    /// Open a bidirectional stream to `peer` bound to `protocol_id`.
    async fn open_stream(&self, peer: &NodeId, protocol_id: &str) -> Result<OverlayStream>;

    /// Measure the round-trip time to `peer`, bounded by `timeout`.
    ///
    /// Returns the failure sentinel (zero rtt) if the peer is unreachable or
    /// the deadline expires - this never errors.
    async fn ping(&self, peer: &NodeId, timeout: Duration) -> PerfMeasurement;

    /// Register `handler` for inbound streams opened under `protocol_id`.
    ///
    /// Re-registering a protocol id replaces the previous handler.
    fn register_handler(&self, protocol_id: &str, handler: Arc<dyn StreamHandler>);
}

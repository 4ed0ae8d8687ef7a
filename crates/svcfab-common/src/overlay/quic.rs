//! QUIC-backed overlay.
//!
//! One quinn endpoint per node serves both directions: inbound connections
//! are accepted on it and outbound connections are dialed from it, with the
//! discovery registry supplying dial addresses. Every stream opens with a
//! header line `"<protocol-id> <sender-node-id>"`; the accept side reads the
//! header and dispatches to the handler registered for that protocol id, one
//! task per stream.
//!
//! Certificates are self-signed and unverified - the fabric does not
//! authenticate peers beyond the transport, and announcements already carry
//! the PSK-derived network tag.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use quinn::{ClientConfig, Connection, Endpoint, ServerConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::identity::NodeId;
use crate::overlay::discovery::MulticastDiscovery;
use crate::overlay::{Overlay, OverlayStream, StreamHandler};
use crate::perf::PerfMeasurement;
use crate::protocol::alloc::{read_line, write_line};
use crate::protocol::error::{FabricError, Result};
use crate::protocol::{PING_LINE, PING_PROTOCOL_ID, PONG_LINE};

/// How long the accept side waits for the stream header line.
const HEADER_DEADLINE: Duration = Duration::from_secs(10);

/// QUIC overlay configuration.
#[derive(Debug, Clone)]
pub struct QuicOverlayConfig {
    /// UDP bind address for the endpoint. Port 0 binds an ephemeral port,
    /// which is then published through discovery announcements.
    pub bind_addr: SocketAddr,
    /// SNI name presented when dialing. Purely cosmetic - certificates are
    /// not verified.
    pub server_name: String,
}

impl Default for QuicOverlayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "[::]:0".parse().expect("bind addr literal"),
            server_name: "svcfab".to_string(),
        }
    }
}

/// The shipped [`Overlay`] implementation.
pub struct QuicOverlay {
    id: NodeId,
    endpoint: Endpoint,
    discovery: Arc<MulticastDiscovery>,
    handlers: DashMap<String, Arc<dyn StreamHandler>>,
    connections: DashMap<NodeId, Connection>,
    server_name: String,
    cancel: CancellationToken,
}

impl QuicOverlay {
    /// Build the endpoint (server + client halves on one socket) and publish
    /// its port to discovery. Call [`QuicOverlay::spawn_accept`] to start
    /// serving inbound streams.
    pub fn new(
        id: NodeId,
        config: QuicOverlayConfig,
        discovery: Arc<MulticastDiscovery>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        // Self-signed certificate for the server half.
        let cert = rcgen::generate_simple_self_signed(vec![config.server_name.clone()])
            .map_err(|e| FabricError::Transport(format!("certificate generation: {}", e)))?;
        let cert_der = rustls::pki_types::CertificateDer::from(cert.cert.der().to_vec());
        let key_der =
            rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());

        let server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)?;
        let server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| FabricError::Transport(format!("QUIC server config: {}", e)))?,
        ));

        let socket = std::net::UdpSocket::bind(config.bind_addr)?;
        let runtime = quinn::default_runtime()
            .ok_or_else(|| FabricError::Transport("no async runtime available".to_string()))?;
        let mut endpoint = Endpoint::new(
            quinn::EndpointConfig::default(),
            Some(server_config),
            socket,
            runtime,
        )?;

        // Client half: skip certificate verification, as above.
        let client_crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(SkipServerVerification::new())
            .with_no_client_auth();
        endpoint.set_default_client_config(ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| FabricError::Transport(format!("QUIC client config: {}", e)))?,
        )));

        let local_port = endpoint.local_addr()?.port();
        discovery.set_overlay_port(local_port);

        let overlay = Arc::new(Self {
            id,
            endpoint,
            discovery,
            handlers: DashMap::new(),
            connections: DashMap::new(),
            server_name: config.server_name,
            cancel,
        });
        // The echo responder every node answers RTT probes with.
        overlay.register_handler(PING_PROTOCOL_ID, Arc::new(PingHandler));
        Ok(overlay)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accept inbound connections until the root token is cancelled.
    pub fn spawn_accept(self: Arc<Self>) -> JoinHandle<()> {
        let this = self;
        tokio::spawn(async move {
            tracing::info!(id = %this.id.short(), "overlay accept loop starting");
            loop {
                let incoming = tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    incoming = this.endpoint.accept() => match incoming {
                        Some(incoming) => incoming,
                        None => return,
                    }
                };
                let this = this.clone();
                tokio::spawn(async move {
                    let connection = match incoming.await {
                        Ok(c) => c,
                        Err(e) => {
                            tracing::debug!(error = %e, "inbound connection failed");
                            return;
                        }
                    };
                    this.serve_connection(connection).await;
                });
            }
        })
    }

    async fn serve_connection(self: Arc<Self>, connection: Connection) {
        tracing::debug!(remote = %connection.remote_address(), "connection established");
        loop {
            let (send, recv) = tokio::select! {
                _ = self.cancel.cancelled() => return,
                bi = connection.accept_bi() => match bi {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::debug!(error = %e, "connection closed");
                        return;
                    }
                }
            };
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_stream(send, recv).await;
            });
        }
    }

    /// Read the header line and hand the stream to the registered handler.
    ///
    /// Handler panics are trapped here: the panic is logged and the stream is
    /// dropped, the process survives.
    async fn dispatch_stream(&self, send: quinn::SendStream, recv: quinn::RecvStream) {
        let mut recv = recv;
        let header =
            match tokio::time::timeout(HEADER_DEADLINE, read_line(&mut recv)).await {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "failed to read stream header");
                    return;
                }
                Err(_) => {
                    tracing::debug!("stream header deadline expired");
                    return;
                }
            };

        let (protocol_id, peer) = match parse_header(&header) {
            Some(parsed) => parsed,
            None => {
                tracing::debug!(header = %header, "malformed stream header");
                return;
            }
        };

        let handler = match self.handlers.get(protocol_id) {
            Some(handler) => handler.value().clone(),
            None => {
                tracing::debug!(protocol = %protocol_id, "no handler registered");
                return;
            }
        };

        let stream = OverlayStream::new(peer, send, recv);
        match AssertUnwindSafe(handler.handle(stream)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(protocol = %protocol_id, error = %e, "stream handler failed");
            }
            Err(panic) => {
                tracing::error!(
                    protocol = %protocol_id,
                    payload = %panic_message(&panic),
                    "stream handler panicked; stream dropped"
                );
            }
        }
    }

    /// Pooled connection to `peer`, dialing through discovery when absent.
    async fn connection_to(&self, peer: &NodeId) -> Result<Connection> {
        if let Some(existing) = self.connections.get(peer) {
            if existing.close_reason().is_none() {
                return Ok(existing.value().clone());
            }
        }
        self.connections.remove(peer);

        let addr = self.discovery.addr_of(peer).ok_or_else(|| {
            FabricError::Transport(format!("no known address for peer {}", peer.short()))
        })?;
        let connection = self.endpoint.connect(addr, &self.server_name)?.await?;
        self.connections.insert(*peer, connection.clone());
        Ok(connection)
    }
}

fn parse_header(header: &str) -> Option<(&str, NodeId)> {
    let mut parts = header.splitn(2, ' ');
    let protocol_id = parts.next()?;
    let peer: NodeId = parts.next()?.parse().ok()?;
    Some((protocol_id, peer))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[async_trait]
impl Overlay for QuicOverlay {
    fn local_id(&self) -> NodeId {
        self.id
    }

    async fn find_peers(&self, rendezvous: &str) -> Result<Vec<NodeId>> {
        Ok(self.discovery.find(rendezvous))
    }

    async fn open_stream(&self, peer: &NodeId, protocol_id: &str) -> Result<OverlayStream> {
        let connection = self.connection_to(peer).await?;
        let (mut send, recv) = connection.open_bi().await?;
        write_line(&mut send, &format!("{} {}", protocol_id, self.id)).await?;
        Ok(OverlayStream::new(*peer, send, recv))
    }

    async fn ping(&self, peer: &NodeId, timeout: Duration) -> PerfMeasurement {
        if timeout.is_zero() {
            return PerfMeasurement::failed();
        }
        let start = Instant::now();
        let round_trip = async {
            let mut stream = self.open_stream(peer, PING_PROTOCOL_ID).await?;
            write_line(&mut stream.send, PING_LINE).await?;
            stream.finish().await?;
            let reply = read_line(&mut stream.recv).await?;
            if reply == PONG_LINE {
                Ok(())
            } else {
                Err(FabricError::Protocol(format!("unexpected ping reply: {}", reply)))
            }
        };
        match tokio::time::timeout(timeout, round_trip).await {
            // A measured rtt of zero would read as the failure sentinel, so
            // successful probes report at least one microsecond.
            Ok(Ok(())) => {
                PerfMeasurement::from_rtt(start.elapsed().max(Duration::from_micros(1)))
            }
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer.short(), error = %e, "ping failed");
                PerfMeasurement::failed()
            }
            Err(_) => PerfMeasurement::failed(),
        }
    }

    fn register_handler(&self, protocol_id: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol_id.to_string(), handler);
    }
}

/// Echo responder for the ping protocol.
struct PingHandler;

#[async_trait]
impl StreamHandler for PingHandler {
    async fn handle(&self, mut stream: OverlayStream) -> Result<()> {
        let line = read_line(&mut stream.recv).await?;
        if line != PING_LINE {
            return Err(FabricError::Protocol(format!("unexpected ping line: {}", line)));
        }
        write_line(&mut stream.send, PONG_LINE).await?;
        stream.finish().await?;
        Ok(())
    }
}

/// Accept any server certificate - peers are not authenticated at the
/// transport layer.
#[derive(Debug)]
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

//! The Manager role.
//!
//! Fronts a running service instance. Each inbound stream carries one
//! serialized HTTP/1.1 application request; the first path segment of its
//! target selected this service at the caller's proxy and is stripped before
//! forwarding. The rewritten request is dispatched to the local instance
//! over plain TCP and the instance's response is relayed back verbatim. Any
//! failure before the response is written surfaces as the `SERVICE-DEAD`
//! sentinel followed by close.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use svcfab_common::overlay::{OverlayStream, StreamHandler};
use svcfab_common::protocol::{MAX_MESSAGE_SIZE, SERVICE_DEAD};
use svcfab_common::{FabricError, Result};
use svcfab_metrics::FabricMetrics;

/// Stream handler for the request-forward protocol.
///
/// Bound at registration time to the address of the service instance it
/// fronts; concurrent handler invocations share no mutable state.
pub struct ManagerHandler {
    service_name: String,
    service_addr: String,
    metrics: Arc<FabricMetrics>,
}

impl ManagerHandler {
    pub fn new(
        service_name: impl Into<String>,
        service_addr: impl Into<String>,
        metrics: Arc<FabricMetrics>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_addr: service_addr.into(),
            metrics,
        }
    }

    /// Health hook for the fronted instance.
    ///
    /// Currently always healthy; the contract requires the hook so the
    /// dead-service path exists independently of dispatch failures.
    async fn ping_service(&self) -> Result<()> {
        Ok(())
    }

    async fn proxy(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.ping_service().await?;

        let rewritten = rewrite_request(request, &self.service_addr)?;

        let mut upstream = TcpStream::connect(&self.service_addr).await.map_err(|e| {
            FabricError::Transport(format!(
                "could not connect to service at {}: {}",
                self.service_addr, e
            ))
        })?;
        upstream.write_all(&rewritten).await?;
        upstream.shutdown().await?;

        let mut response = Vec::new();
        (&mut upstream)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_to_end(&mut response)
            .await?;
        if response.is_empty() {
            return Err(FabricError::Transport(
                "service closed the connection without responding".to_string(),
            ));
        }
        if response.len() > MAX_MESSAGE_SIZE {
            return Err(FabricError::Protocol(
                "service response exceeds size limit".to_string(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl StreamHandler for ManagerHandler {
    async fn handle(&self, mut stream: OverlayStream) -> Result<()> {
        tracing::debug!(
            peer = %stream.peer.short(),
            service = %self.service_name,
            "application request received"
        );

        let mut request = Vec::new();
        (&mut stream.recv)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_to_end(&mut request)
            .await?;
        if request.len() > MAX_MESSAGE_SIZE {
            return Err(FabricError::Protocol(
                "request exceeds size limit".to_string(),
            ));
        }

        match self.proxy(&request).await {
            Ok(response) => {
                stream.send.write_all(&response).await?;
                stream.finish().await?;
                self.metrics.record_request_proxied();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    service = %self.service_name,
                    error = %e,
                    "proxying failed, answering with dead-service sentinel"
                );
                self.metrics.record_request_failed();
                stream.send.write_all(SERVICE_DEAD.as_bytes()).await?;
                stream.finish().await?;
                Ok(())
            }
        }
    }
}

/// Rewrite a serialized request for the local hop.
///
/// The request line's target loses its first path segment (the service name
/// used for routing), `Host` is pointed at the instance, and
/// `Connection: close` is forced so the instance's response is EOF-delimited
/// and can be relayed verbatim. The body is untouched.
fn rewrite_request(raw: &[u8], upstream: &str) -> Result<Vec<u8>> {
    let head_end = find_head_end(raw)
        .ok_or_else(|| FabricError::Protocol("request head is not terminated".to_string()))?;
    let head = std::str::from_utf8(&raw[..head_end])
        .map_err(|_| FabricError::Protocol("request head is not UTF-8".to_string()))?;
    let body = &raw[head_end + 4..];

    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| FabricError::Protocol("empty request head".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(_version)) => (method, target),
        _ => {
            return Err(FabricError::Protocol(format!(
                "malformed request line: {}",
                request_line
            )))
        }
    };

    let remainder = strip_first_segment(target);

    let mut out = Vec::with_capacity(raw.len() + 64);
    out.extend_from_slice(format!("{} /{} HTTP/1.1\r\n", method, remainder).as_bytes());
    for line in lines {
        let lowered = line.to_ascii_lowercase();
        if lowered.starts_with("host:") || lowered.starts_with("connection:") {
            continue;
        }
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Host: {}\r\n", upstream).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(body);
    Ok(out)
}

fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Drop the first path segment of `path?query`; the remainder keeps its own
/// query string.
fn strip_first_segment(target: &str) -> &str {
    let mut parts = target.splitn(3, '/');
    parts.next(); // empty leading segment
    parts.next(); // the routing segment
    parts.next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    use svcfab_common::NodeId;

    // ========================================================================
    // Rewriting
    // ========================================================================

    #[test]
    fn test_strip_first_segment() {
        assert_eq!(strip_first_segment("/imgproc/v1/resize"), "v1/resize");
        assert_eq!(strip_first_segment("/imgproc/v1/resize?w=10"), "v1/resize?w=10");
        assert_eq!(strip_first_segment("/imgproc"), "");
        assert_eq!(strip_first_segment("/"), "");
    }

    #[test]
    fn test_rewrite_strips_routing_segment_and_pins_upstream() {
        let raw = b"GET /imgproc/v1/resize?w=10 HTTP/1.1\r\nHost: fabric\r\nAccept: */*\r\n\r\n";
        let rewritten = rewrite_request(raw, "127.0.0.1:9000").unwrap();
        let text = String::from_utf8(rewritten).unwrap();

        assert!(text.starts_with("GET /v1/resize?w=10 HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1:9000\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Accept: */*\r\n"));
        assert!(!text.contains("Host: fabric"));
    }

    #[test]
    fn test_rewrite_preserves_the_body() {
        let raw = b"POST /svc/submit HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata";
        let rewritten = rewrite_request(raw, "127.0.0.1:9000").unwrap();
        let text = String::from_utf8(rewritten).unwrap();
        assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(text.ends_with("\r\n\r\ndata"));
    }

    #[test]
    fn test_rewrite_rejects_unterminated_head() {
        assert!(rewrite_request(b"GET /svc HTTP/1.1\r\nHost: x", "a").is_err());
    }

    #[test]
    fn test_rewrite_rejects_malformed_request_line() {
        assert!(rewrite_request(b"NONSENSE\r\n\r\n", "a").is_err());
    }

    // ========================================================================
    // End-to-end proxying
    // ========================================================================

    async fn run_handler(handler: ManagerHandler, request: &[u8]) -> Vec<u8> {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (mut far_read, mut far_write) = tokio::io::split(far);

        let stream = OverlayStream::new(NodeId::generate(), near_write, near_read);
        let server = tokio::spawn(async move { handler.handle(stream).await });

        far_write.write_all(request).await.unwrap();
        far_write.shutdown().await.unwrap();

        let mut response = Vec::new();
        far_read.read_to_end(&mut response).await.unwrap();
        server.await.unwrap().unwrap();
        response
    }

    #[tokio::test]
    async fn test_manager_relays_service_response_verbatim() {
        // A one-shot "service" that answers any request with a fixed body.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            conn.read_to_end(&mut request).await.unwrap();
            let request = String::from_utf8(request).unwrap();
            assert!(request.starts_with("GET /v1/status HTTP/1.1\r\n"));
            assert!(request.contains("Connection: close"));
            conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
        });

        let handler = ManagerHandler::new(
            "imgproc",
            addr.to_string(),
            Arc::new(FabricMetrics::new()),
        );
        let response = run_handler(
            handler,
            b"GET /imgproc/v1/status HTTP/1.1\r\nHost: fabric\r\n\r\n",
        )
        .await;

        assert_eq!(
            response,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()
        );
        service.await.unwrap();
    }

    #[tokio::test]
    async fn test_manager_answers_sentinel_when_service_is_down() {
        // Nothing listens on this address.
        let unused = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let metrics = Arc::new(FabricMetrics::new());
        let handler = ManagerHandler::new("imgproc", unused.to_string(), metrics.clone());
        let response = run_handler(
            handler,
            b"GET /imgproc/v1/status HTTP/1.1\r\nHost: fabric\r\n\r\n",
        )
        .await;

        assert_eq!(response, SERVICE_DEAD.as_bytes().to_vec());
        assert_eq!(metrics.snapshot().requests_failed, 1);
    }

    #[tokio::test]
    async fn test_manager_answers_sentinel_for_malformed_requests() {
        let handler = ManagerHandler::new(
            "imgproc",
            "127.0.0.1:1".to_string(),
            Arc::new(FabricMetrics::new()),
        );
        let response = run_handler(handler, b"garbage with no head terminator").await;
        assert_eq!(response, SERVICE_DEAD.as_bytes().to_vec());
    }
}

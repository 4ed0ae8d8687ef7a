//! Local metrics endpoint.
//!
//! Serves the current [`MetricsSnapshot`](crate::MetricsSnapshot) as JSON on
//! a fixed local port. Observational only - nothing in the fabric reads it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::FabricMetrics;

/// Serve metrics on `addr` until the root token is cancelled.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<FabricMetrics>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics endpoint listening");

    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |_req| {
                let metrics = metrics.clone();
                async move { render(&metrics) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %err, "metrics connection error");
            }
        });
    }
}

fn render(metrics: &FabricMetrics) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match serde_json::to_vec_pretty(&metrics.snapshot()) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .expect("static response"),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize metrics snapshot");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()))
                .expect("static response")
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_binds_and_stops_on_cancel() {
        let metrics = Arc::new(FabricMetrics::new());
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let server = tokio::spawn(serve(addr, metrics, cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let joined = tokio::time::timeout(std::time::Duration::from_secs(1), server)
            .await
            .expect("server did not stop on cancel")
            .unwrap();
        assert!(joined.is_ok());
    }

    #[test]
    fn test_render_produces_json_body() {
        let metrics = FabricMetrics::new();
        metrics.record_cache_hit();
        let response = render(&metrics).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! Axum HTTP server for metrics and health

use std::future::Future;
use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{Error, Result};

/// Metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    match encode(&mut buffer, &crate::controller::metrics::REGISTRY) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves
pub async fn run_server(
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Metrics server listening on {}", addr);

    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;
    Ok(())
}

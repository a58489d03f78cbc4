// src/server/metrics_server.rs

use super::router::ConnectionRouter;
use crate::core::delivery::DeliveryQueue;
use crate::core::metrics::{self, gather_metrics};
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// The server components whose sizes are sampled on every scrape.
#[derive(Clone)]
pub struct MetricsSources {
    pub queue: Arc<DeliveryQueue>,
    pub router: Arc<ConnectionRouter>,
}

/// Handles HTTP requests to the /metrics endpoint.
///
/// Gauges that are cheaper to sample than to track are refreshed before all
/// registered metrics are encoded in the Prometheus text format.
async fn metrics_handler(State(sources): State<MetricsSources>) -> impl IntoResponse {
    metrics::QUEUED_USERS.set(sources.queue.user_count() as f64);
    metrics::ASSOCIATED_USERS.set(sources.queue.directory().len() as f64);
    metrics::AWAITING_REPLIES.set(sources.router.pending_count() as f64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Builds the exporter's routes.
pub fn metrics_router(sources: MetricsSources) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(sources)
}

/// Serves the metrics routes on `port` until `shutdown_rx` fires.
pub async fn run_metrics_server(
    port: u16,
    sources: MetricsSources,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let shutdown = async move {
        shutdown_rx.recv().await.ok();
        info!("Metrics server shutting down.");
    };
    if let Err(e) = axum::serve(listener, metrics_router(sources))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Metrics server failed: {}", e);
    }
}

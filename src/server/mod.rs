// src/server/mod.rs

use crate::config::Config;
use crate::connection::{Connection, MessageHandler, SharedSession};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::{debug, info};

mod context;
mod initialization;
mod listener;
mod metrics_server;
mod router;

pub use context::Server;
pub use initialization::read_tls_files;
pub use listener::Listener;
pub use router::ConnectionRouter;

/// The main server startup function: binds the listener, serves connections and
/// shuts down on SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    info!(
        "Idle timeout {:?}, max frame size {} bytes.",
        config.idle_timeout, config.max_frame_size
    );
    let (cert, key) = read_tls_files(&config.tls)?;
    let listener =
        Listener::bind_with(&cert, &key, &config.bind_addr(), config.connection_options()).await?;
    info!("Titan server listening on {}", listener.local_addr());

    let server = Server::new(listener, Arc::new(LoggingHandler))
        .with_purge_interval(config.queue.purge_interval);

    let (shutdown_tx, _) = broadcast::channel(1);
    if config.metrics.enabled {
        let sources = metrics_server::MetricsSources {
            queue: server.queue(),
            router: server.router(),
        };
        tokio::spawn(metrics_server::run_metrics_server(
            config.metrics.port,
            sources,
            shutdown_tx.subscribe(),
        ));
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    let result = tokio::select! {
        res = server.run() => res.map_err(|e| anyhow!("Listener stopped: {}", e)),
        _ = sigint.recv() => {
            info!("SIGINT received, initiating graceful shutdown.");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, initiating graceful shutdown.");
            Ok(())
        }
    };

    server.shutdown();
    let _ = shutdown_tx.send(());
    info!("Server shutdown complete.");
    result
}

/// The application handler of the standalone binary. Authentication and
/// method routing are supplied by embedding applications; the binary only
/// records what it receives.
struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn on_message(&self, connection: Connection, _session: SharedSession, payload: Bytes) {
        debug!(
            "Connection {} sent {} bytes.",
            connection.id(),
            payload.len()
        );
    }

    async fn on_disconnect(&self, connection: Connection, session: SharedSession) {
        let user_id = session.lock().user_id.clone();
        info!(
            "Connection {} from {} disconnected (user: {}).",
            connection.id(),
            connection.addr(),
            user_id.as_deref().unwrap_or("-")
        );
    }
}

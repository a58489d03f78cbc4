// src/core/delivery/purger.rs

//! A background task to periodically drop empty per-user queues.

use super::queue::DeliveryQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// The background task struct for the queue purger.
pub struct QueuePurgerTask {
    queue: Arc<DeliveryQueue>,
    interval: Duration,
}

impl QueuePurgerTask {
    pub fn new(queue: Arc<DeliveryQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// The main run loop for the purger task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Delivery queue purger task started.");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = self.queue.purge_idle();
                    if purged > 0 {
                        debug!("Purged {} idle user queue(s).", purged);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Delivery queue purger task shutting down.");
                    return;
                }
            }
        }
    }
}

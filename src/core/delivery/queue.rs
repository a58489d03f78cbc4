// src/core/delivery/queue.rs

//! Ordered, at-least-once delivery of server-originated requests to users.
//!
//! # Core Design: One Drain Per User
//!
//! Every user owns a `UserQueue` held by `Arc` in the queue map. It carries two
//! locks with different jobs:
//!
//! - `pending` is a short synchronous lock around the FIFO itself. Enqueue only
//!   ever takes this lock, so appends happen in call order and never wait on a
//!   slow hand-off.
//! - `drain_lock` is held for the whole duration of a drain, across every
//!   router hand-off. Only the holder pops from the front of the FIFO, so the
//!   request it just handed off is still the front when it removes it.
//!
//! The locks live inside the shared `UserQueue` and are only ever reached
//! through the `Arc`; nothing copies them out of the map.

use super::directory::Directory;
use super::router::{Params, QueuedRequest, ResponseHandler, Router};
use crate::core::ConnectionId;
use crate::core::metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// The pending requests of a single user.
#[derive(Debug, Default)]
struct UserQueue {
    pending: Mutex<VecDeque<QueuedRequest>>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl UserQueue {
    fn front(&self) -> Option<QueuedRequest> {
        self.pending.lock().front().cloned()
    }

    fn pop_front(&self) {
        self.pending.lock().pop_front();
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Routes requests to the connection currently representing a user, queueing
/// them while the user has no connection.
pub struct DeliveryQueue {
    directory: Directory,
    queues: DashMap<String, Arc<UserQueue>>,
    router: Arc<dyn Router>,
}

impl DeliveryQueue {
    /// Creates an empty queue that hands requests off through `router`.
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self {
            directory: Directory::new(),
            queues: DashMap::new(),
            router,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Associates a user with a connection and starts delivering its pending
    /// requests. A no-op returning `false` if the user already has a connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn associate(self: &Arc<Self>, user_id: &str, connection_id: ConnectionId) -> bool {
        if !self.directory.associate(user_id, connection_id) {
            return false;
        }
        debug!("User {} associated with connection {}.", user_id, connection_id);
        self.trigger_drain(user_id);
        true
    }

    /// Removes the user's connection. Pending requests stay queued.
    pub fn disassociate(&self, user_id: &str) -> Option<ConnectionId> {
        let removed = self.directory.disassociate(user_id);
        if let Some(connection_id) = removed {
            debug!(
                "User {} disassociated from connection {}.",
                user_id, connection_id
            );
        }
        removed
    }

    /// Removes the user's connection only if it is still `connection_id`.
    pub fn disassociate_connection(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .directory
            .disassociate_connection(user_id, connection_id);
        if removed {
            debug!(
                "User {} disassociated from connection {}.",
                user_id, connection_id
            );
        }
        removed
    }

    /// Appends a request to the user's queue and starts a drain.
    ///
    /// Never fails. If the user has no connection the request waits until one
    /// is associated. Must be called from within a Tokio runtime.
    pub fn enqueue(
        self: &Arc<Self>,
        user_id: &str,
        method: impl Into<String>,
        params: Params,
        on_response: ResponseHandler,
    ) {
        let request = QueuedRequest {
            method: method.into(),
            params,
            on_response,
        };

        let queue = Arc::clone(self.queues.entry(user_id.to_string()).or_default().value());
        queue.pending.lock().push_back(request);
        metrics::REQUESTS_ENQUEUED_TOTAL.inc();
        metrics::PENDING_REQUESTS.inc();

        self.trigger_drain(user_id);
    }

    /// Hands the user's pending requests to the router, in order.
    ///
    /// Stops at the first failed hand-off, leaving that request and everything
    /// behind it queued for the next trigger. Returns the number delivered.
    pub async fn drain(&self, user_id: &str) -> usize {
        let Some(queue) = self.queues.get(user_id).map(|q| Arc::clone(q.value())) else {
            return 0;
        };

        let _drain_guard = queue.drain_lock.lock().await;

        // Read the association under the lock so a drain started by `associate`
        // always sees the connection that triggered it.
        let Some(connection_id) = self.directory.lookup(user_id) else {
            debug!("No connection for user {}, deferring delivery.", user_id);
            return 0;
        };

        let mut delivered = 0;
        while let Some(request) = queue.front() {
            match self
                .router
                .send(
                    connection_id,
                    &request.method,
                    &request.params,
                    request.on_response.clone(),
                )
                .await
            {
                Ok(()) => {
                    queue.pop_front();
                    delivered += 1;
                    metrics::REQUESTS_DELIVERED_TOTAL.inc();
                    metrics::PENDING_REQUESTS.dec();
                }
                Err(e) => {
                    metrics::DELIVERY_FAILURES_TOTAL.inc();
                    warn!(
                        "Delivery of '{}' to user {} on connection {} failed: {}. {} request(s) remain queued.",
                        request.method,
                        user_id,
                        connection_id,
                        e,
                        queue.len()
                    );
                    break;
                }
            }
        }

        if delivered > 0 {
            debug!(
                "Delivered {} request(s) to user {} on connection {}.",
                delivered, user_id, connection_id
            );
        }
        delivered
    }

    /// The number of requests waiting for the user.
    pub fn pending_count(&self, user_id: &str) -> usize {
        self.queues
            .get(user_id)
            .map(|q| q.value().len())
            .unwrap_or(0)
    }

    /// The number of users with a queue entry, empty or not.
    pub fn user_count(&self) -> usize {
        self.queues.len()
    }

    /// Removes queues that are empty and not in use by any enqueue or drain.
    /// Returns the number of queues removed.
    pub fn purge_idle(&self) -> usize {
        let mut purged = 0;
        self.queues.retain(|_user_id, queue| {
            if Arc::strong_count(queue) == 1 && queue.len() == 0 {
                purged += 1;
                false
            } else {
                true
            }
        });
        purged
    }

    fn trigger_drain(self: &Arc<Self>, user_id: &str) {
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            this.drain(&user_id).await;
        });
    }
}

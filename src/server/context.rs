// src/server/context.rs

//! Binds the listener, the delivery queue and the connection router together.

use super::listener::Listener;
use super::router::ConnectionRouter;
use crate::connection::{Connection, MessageHandler, SharedSession};
use crate::core::TitanError;
use crate::core::delivery::{DeliveryQueue, QueuePurgerTask};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// A listener whose connections feed the per-user delivery queue.
///
/// Once application logic sets `Session::user_id` for a connection, every
/// message on it associates the user with that connection, and its disconnect
/// removes the association again.
pub struct Server {
    listener: Arc<Listener>,
    queue: Arc<DeliveryQueue>,
    router: Arc<ConnectionRouter>,
    app: Arc<dyn MessageHandler>,
    purge_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Creates a server that forwards application messages to `app`.
    pub fn new(listener: Listener, app: Arc<dyn MessageHandler>) -> Self {
        let router = Arc::new(ConnectionRouter::new(listener.connections()));
        let queue = Arc::new(DeliveryQueue::new(router.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            listener: Arc::new(listener),
            queue,
            router,
            app,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            shutdown_tx,
        }
    }

    pub fn with_purge_interval(mut self, purge_interval: Duration) -> Self {
        self.purge_interval = purge_interval;
        self
    }

    /// The delivery queue server-originated requests are enqueued on.
    pub fn queue(&self) -> Arc<DeliveryQueue> {
        self.queue.clone()
    }

    pub fn router(&self) -> Arc<ConnectionRouter> {
        self.router.clone()
    }

    pub fn listener(&self) -> Arc<Listener> {
        self.listener.clone()
    }

    /// Starts the queue purger and accepts connections until the listener is
    /// closed or fails.
    pub async fn run(&self) -> Result<(), TitanError> {
        let purger = QueuePurgerTask::new(self.queue.clone(), self.purge_interval);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(purger.run(shutdown_rx));

        let handler = Arc::new(DeliveryHandler {
            queue: self.queue.clone(),
            router: self.router.clone(),
            app: self.app.clone(),
        });
        let result = self.listener.accept(handler).await;
        let _ = self.shutdown_tx.send(());
        result
    }

    /// Stops accepting, closes every live connection and stops background tasks.
    pub fn shutdown(&self) {
        info!("Shutting down. Closing the listener and all connections.");
        self.listener.close();
        let closed = self.listener.close_connections();
        info!("Signalled {} connection(s) to close.", closed);
        let _ = self.shutdown_tx.send(());
    }
}

/// Keeps the directory in step with the connections' sessions before handing
/// events on to the application.
struct DeliveryHandler {
    queue: Arc<DeliveryQueue>,
    router: Arc<ConnectionRouter>,
    app: Arc<dyn MessageHandler>,
}

impl DeliveryHandler {
    /// Holds the session lock so a released connection is never associated
    /// after its disconnect handler removed it.
    fn associate(&self, connection: &Connection, session: &SharedSession) {
        let session = session.lock();
        if session.closed {
            return;
        }
        if let Some(user_id) = session.user_id.as_deref() {
            self.queue.associate(user_id, connection.id());
        }
    }
}

#[async_trait]
impl MessageHandler for DeliveryHandler {
    async fn on_message(&self, connection: Connection, session: SharedSession, payload: Bytes) {
        self.associate(&connection, &session);
        if self.router.handle_response(connection.id(), &payload) {
            return;
        }

        self.app
            .on_message(connection.clone(), session.clone(), payload)
            .await;
        // The application may have just authenticated the session.
        self.associate(&connection, &session);
    }

    async fn on_disconnect(&self, connection: Connection, session: SharedSession) {
        let user_id = session.lock().user_id.clone();
        if let Some(user_id) = user_id {
            self.queue
                .disassociate_connection(&user_id, connection.id());
        }
        self.router.forget_connection(connection.id());
        self.app.on_disconnect(connection, session).await;
    }
}

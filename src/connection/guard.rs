// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::handle::{Connection, ConnectionMap};
use crate::core::metrics;
use tracing::debug;

/// An RAII guard that keeps a connection in the live connection registry for
/// exactly as long as its handler task holds it.
pub struct ConnectionGuard {
    connections: ConnectionMap,
    connection: Connection,
}

impl ConnectionGuard {
    /// Registers `connection` and returns the guard that will unregister it.
    pub(crate) fn register(connections: ConnectionMap, connection: Connection) -> Self {
        connections.insert(connection.id(), connection.clone());
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            connections,
            connection,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Removes the connection from the registry so no further requests are
    /// routed to it.
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {} ({})",
            self.connection.id(),
            self.connection.addr()
        );

        if self.connections.remove(&self.connection.id()).is_none() {
            debug!(
                "Connection {} was not in the registry upon cleanup.",
                self.connection.id()
            );
        }
    }
}

// src/connection/callbacks.rs

use super::handle::Connection;
use super::session::SharedSession;
use async_trait::async_trait;
use bytes::Bytes;

/// Caller logic invoked by the listener for connection events.
///
/// `on_message` runs on its own task for every application frame, so several
/// calls for the same connection may overlap. Anything they share must go
/// through the session lock.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, connection: Connection, session: SharedSession, payload: Bytes);

    /// Runs exactly once per connection, after it stopped reading.
    async fn on_disconnect(&self, connection: Connection, session: SharedSession);
}

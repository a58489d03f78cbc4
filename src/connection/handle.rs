// src/connection/handle.rs

//! The cloneable handle other tasks use to reach a live connection.

use crate::core::{ConnectionId, Frame, TitanError};
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{broadcast, mpsc};

/// All live connections of a listener, keyed by connection id.
pub type ConnectionMap = Arc<DashMap<ConnectionId, Connection>>;

/// A handle to an accepted connection.
///
/// The stream itself is owned by the connection's handler task. Frames sent
/// through the handle are written by that task in the order they were sent.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    outbound: mpsc::Sender<Frame>,
    kill: broadcast::Sender<()>,
    send_timeout: Duration,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        addr: SocketAddr,
        outbound: mpsc::Sender<Frame>,
        kill: broadcast::Sender<()>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            id,
            addr,
            outbound,
            kill,
            send_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues `payload` to be written to the peer as one frame.
    ///
    /// Fails with `ConnectionClosed` once the handler task has stopped
    /// accepting outbound frames, and with `WriteTimeout` if the outbound
    /// channel stays full for the connection's idle timeout.
    pub async fn send(&self, payload: Bytes) -> Result<(), TitanError> {
        if payload.is_empty() {
            return Err(TitanError::EmptyFrame);
        }
        self.outbound
            .send_timeout(Frame::Message(payload), self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TitanError::WriteTimeout(self.send_timeout),
                SendTimeoutError::Closed(_) => TitanError::ConnectionClosed(self.id),
            })
    }

    /// Asks the handler task to release the connection. Its disconnect
    /// handler still runs.
    pub fn close(&self) {
        let _ = self.kill.send(());
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

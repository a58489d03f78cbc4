// src/server/listener.rs

//! The TLS listener: accepts connections and drives one handler task per connection.

use super::initialization::build_acceptor;
use crate::connection::{
    Connection, ConnectionHandler, ConnectionMap, ConnectionOptions, MessageHandler,
};
use crate::core::metrics;
use crate::core::{ConnectionId, TitanError};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Pause before retrying accept after the process ran out of file descriptors.
const FD_EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts TLS connections on a bound address.
pub struct Listener {
    tcp: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    acceptor: TlsAcceptor,
    options: ConnectionOptions,
    connections: ConnectionMap,
    next_connection_id: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

impl Listener {
    /// Binds a listener on `addr` with the given PEM certificate and private key.
    /// `debug` logs all connection activity.
    pub async fn bind(
        cert_pem: &[u8],
        key_pem: &[u8],
        addr: &str,
        debug: bool,
    ) -> Result<Self, TitanError> {
        let options = ConnectionOptions {
            debug,
            ..ConnectionOptions::default()
        };
        Self::bind_with(cert_pem, key_pem, addr, options).await
    }

    /// Binds a listener with explicit per-connection options.
    pub async fn bind_with(
        cert_pem: &[u8],
        key_pem: &[u8],
        addr: &str,
        options: ConnectionOptions,
    ) -> Result<Self, TitanError> {
        let acceptor = build_acceptor(cert_pem, key_pem)?;
        let tcp = TcpListener::bind(addr).await.map_err(|e| {
            TitanError::Config(format!("Failed to bind listener on '{addr}': {e}"))
        })?;
        let local_addr = tcp.local_addr()?;
        if options.debug {
            info!("Listener created with local network address: {}", local_addr);
        }

        Ok(Self {
            tcp: Mutex::new(Some(tcp)),
            local_addr,
            acceptor,
            options,
            connections: Arc::new(DashMap::new()),
            next_connection_id: AtomicU64::new(0),
            closed_tx: watch::channel(false).0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry of live connections.
    pub fn connections(&self) -> ConnectionMap {
        self.connections.clone()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|c| c.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Accepts connections until the listener is closed or the listening socket
    /// fails. Every connection runs on its own task and reports its events to
    /// `handler`.
    ///
    /// Returns `Ok(())` after `close`, or the socket error that stopped the
    /// listener. Errors on individual connections never end the loop.
    pub async fn accept(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TitanError> {
        let mut closed_rx = self.closed_tx.subscribe();
        let tcp = self
            .tcp
            .lock()
            .await
            .take()
            .ok_or(TitanError::ListenerClosed)?;

        let result = loop {
            tokio::select! {
                biased;

                _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => {
                    break Ok(());
                }

                res = tcp.accept() => {
                    match res {
                        Ok((socket, addr)) => self.spawn_connection(socket, addr, handler.clone()),
                        Err(e) if is_fd_exhausted(&e) => {
                            warn!("Failed to accept connection: {}. Backing off.", e);
                            tokio::time::sleep(FD_EXHAUSTED_BACKOFF).await;
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                        Err(e) => {
                            error!("Listener on {} failed: {}", self.local_addr, e);
                            break Err(TitanError::from(e));
                        }
                    }
                }
            }
        };

        drop(tcp);
        self.closed_tx.send_replace(true);
        info!("Listener was closed on local network address: {}", self.local_addr);
        result
    }

    /// Stops accepting and releases the listening socket. Connections that were
    /// already accepted keep running; see `close_connections`.
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
        // Without a running accept loop the socket would otherwise live until drop.
        if let Ok(mut tcp) = self.tcp.try_lock()
            && tcp.take().is_some()
        {
            info!("Listener was closed on local network address: {}", self.local_addr);
        }
    }

    /// Signals every live connection to close. Each one still runs its
    /// disconnect handler. Returns the number of connections signalled.
    pub fn close_connections(&self) -> usize {
        let mut signalled = 0;
        for entry in self.connections.iter() {
            entry.value().close();
            signalled += 1;
        }
        signalled
    }

    fn spawn_connection(
        &self,
        socket: TcpStream,
        addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
    ) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();
        if self.options.debug {
            info!(
                "Client connected: listening for messages from client IP: {}",
                addr
            );
        }

        let acceptor = self.acceptor.clone();
        let options = self.options.clone();
        let connections = self.connections.clone();
        tokio::spawn(async move {
            let tls_stream =
                match tokio::time::timeout(options.idle_timeout, acceptor.accept(socket)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        warn!("TLS handshake error for {addr}: {e}");
                        return;
                    }
                    Err(_) => {
                        warn!("TLS handshake with {addr} timed out.");
                        return;
                    }
                };
            debug!("TLS handshake successful for {addr}");

            let connection = ConnectionHandler::new(
                tls_stream,
                addr,
                connection_id,
                handler,
                &options,
                connections,
            );
            if let Err(e) = connection.run().await {
                debug!("Connection {} from {} ended with: {}", connection_id, addr, e);
            }
        });
    }
}

/// Errors that concern one pending connection rather than the listening socket.
fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}

fn is_fd_exhausted(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::callbacks::MessageHandler;
use super::guard::ConnectionGuard;
use super::handle::{Connection, ConnectionMap};
use super::session::{Session, SharedSession};
use crate::core::metrics;
use crate::core::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::core::{ConnectionId, Frame, FrameCodec, TitanError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

/// How long a released connection may spend flushing its last frames.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection limits applied by the listener.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Log every frame read and written.
    pub debug: bool,
    /// A connection that sends no frame for this long is closed. A single
    /// outbound write, or a wait for room in the outbound channel, is bounded
    /// by the same deadline.
    pub idle_timeout: Duration,
    /// Message and disconnect handlers running longer than this are cancelled.
    pub handler_timeout: Option<Duration>,
    pub max_frame_size: usize,
    /// Capacity of the outbound frame channel of each connection.
    pub outbound_buffer: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            debug: false,
            idle_timeout: Duration::from_secs(300),
            handler_timeout: Some(Duration::from_secs(30)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_buffer: 64,
        }
    }
}

/// Why the read loop stopped.
#[derive(Debug)]
enum Release {
    /// The peer sent a `close` frame.
    CloseFrame,
    /// The peer closed the stream at a frame boundary.
    PeerEof,
    /// The connection was closed from the server side.
    Killed,
    /// A framing, transport, write or idle-timeout error.
    Failed(TitanError),
}

/// Writes outbound frames on its own task, so a peer that stops reading never
/// stalls the read loop.
struct OutboundWriter<W> {
    sink: FramedWrite<W, FrameCodec>,
    outbound_rx: mpsc::Receiver<Frame>,
    write_timeout: Duration,
    debug: bool,
    addr: SocketAddr,
}

impl<W> OutboundWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Writes frames until the read loop signals release. `true` on the release
    /// channel asks for the frames already queued to be flushed first.
    async fn run(mut self, mut release_rx: oneshot::Receiver<bool>) -> Result<(), TitanError> {
        loop {
            tokio::select! {
                biased;
                orderly = &mut release_rx => {
                    self.outbound_rx.close();
                    if orderly.unwrap_or(false) {
                        while let Ok(frame) = self.outbound_rx.try_recv() {
                            self.write(frame).await?;
                        }
                    }
                    return self.sink.close().await;
                }
                frame = self.outbound_rx.recv() => match frame {
                    Some(frame) => self.write(frame).await?,
                    None => return self.sink.close().await,
                },
            }
        }
    }

    async fn write(&mut self, frame: Frame) -> Result<(), TitanError> {
        if self.debug {
            debug!("Writing {} bytes to {}", frame.payload().len(), self.addr);
        }
        tokio::time::timeout(self.write_timeout, self.sink.send(frame))
            .await
            .map_err(|_| TitanError::WriteTimeout(self.write_timeout))?
    }
}

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler<S> {
    reader: FramedRead<ReadHalf<S>, FrameCodec>,
    writer: Option<OutboundWriter<WriteHalf<S>>>,
    connection: Connection,
    session: SharedSession,
    handler: Arc<dyn MessageHandler>,
    connections: ConnectionMap,
    options: ConnectionOptions,
    kill_rx: broadcast::Receiver<()>,
    message_tasks: JoinSet<()>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a new `ConnectionHandler` for an already established stream.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        connection_id: ConnectionId,
        handler: Arc<dyn MessageHandler>,
        options: &ConnectionOptions,
        connections: ConnectionMap,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_buffer.max(1));
        let (kill_tx, kill_rx) = broadcast::channel(1);
        let connection = Connection::new(
            connection_id,
            addr,
            outbound_tx,
            kill_tx,
            options.idle_timeout,
        );

        let (read_half, write_half) = tokio::io::split(stream);
        let writer = OutboundWriter {
            sink: FramedWrite::new(write_half, FrameCodec::new(options.max_frame_size)),
            outbound_rx,
            write_timeout: options.idle_timeout,
            debug: options.debug,
            addr,
        };

        Self {
            reader: FramedRead::new(read_half, FrameCodec::new(options.max_frame_size)),
            writer: Some(writer),
            connection,
            session: Session::shared(),
            handler,
            connections,
            options: options.clone(),
            kill_rx,
            message_tasks: JoinSet::new(),
        }
    }

    /// A handle to the connection this handler drives.
    pub fn connection(&self) -> Connection {
        self.connection.clone()
    }

    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Reads frames until the connection is released, then runs the disconnect
    /// handler once. Returns the error that ended the connection, if any.
    pub async fn run(mut self) -> Result<(), TitanError> {
        let guard = ConnectionGuard::register(self.connections.clone(), self.connection.clone());
        let addr = self.connection.addr();
        let idle_timeout = self.options.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let (release_tx, release_rx) = oneshot::channel();
        let mut write_task = match self.writer.take() {
            Some(writer) => tokio::spawn(writer.run(release_rx)),
            None => return Err(TitanError::Internal("connection already ran".to_string())),
        };
        let mut writer_done = false;

        let release = loop {
            tokio::select! {
                // Prioritize kill signals over other events.
                biased;
                _ = self.kill_rx.recv() => {
                    info!("Connection {} ({}) received kill signal.", self.connection.id(), addr);
                    break Release::Killed;
                }
                () = &mut idle => {
                    break Release::Failed(TitanError::IdleTimeout(idle_timeout));
                }
                res = &mut write_task => {
                    writer_done = true;
                    break Release::Failed(match res {
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => TitanError::ConnectionClosed(self.connection.id()),
                        Err(e) => TitanError::Internal(format!("writer task failed: {e}")),
                    });
                }
                result = self.reader.next() => {
                    match result {
                        Some(Ok(frame)) => {
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                            metrics::FRAMES_RECEIVED_TOTAL.inc();
                            if self.options.debug {
                                debug!(
                                    "Read {} bytes from {}: {:?}",
                                    frame.payload().len(),
                                    addr,
                                    String::from_utf8_lossy(frame.payload())
                                );
                            }
                            match frame {
                                Frame::Ping => {}
                                Frame::Close => break Release::CloseFrame,
                                Frame::Message(payload) => self.dispatch(payload),
                            }
                        }
                        Some(Err(e)) => break Release::Failed(e),
                        None => break Release::PeerEof,
                    }
                }
                Some(res) = self.message_tasks.join_next() => {
                    if let Err(e) = res
                        && e.is_panic()
                    {
                        error!("A message handler for connection {} panicked: {e:?}", self.connection.id());
                    }
                }
            }
        };

        let result = match release {
            Release::CloseFrame => {
                debug!("Connection from {} closed by peer with a close frame.", addr);
                Ok(())
            }
            Release::PeerEof => {
                debug!("Connection from {} closed by peer.", addr);
                Ok(())
            }
            Release::Killed => Ok(()),
            Release::Failed(e) => {
                if e.is_normal_disconnect() {
                    debug!("Connection from {} closed by peer: {}", addr, e);
                } else {
                    warn!("Connection error for {}: {}", addr, e);
                }
                Err(e)
            }
        };

        if !writer_done {
            self.stop_writer(write_task, release_tx, result.is_ok()).await;
        }
        drop(guard);

        self.session.lock().closed = true;
        // Handlers still running keep their own bounded lifetime.
        self.message_tasks.detach_all();
        self.run_bounded(
            "disconnect",
            self.handler
                .on_disconnect(self.connection.clone(), self.session.clone()),
        )
        .await;

        if self.options.debug {
            debug!("Closed connection to client with IP: {}", addr);
        }
        result
    }

    /// Stops the writer and shuts the stream down. An orderly release first
    /// flushes the frames already handed over. A writer that cannot finish
    /// in time is aborted.
    async fn stop_writer(
        &self,
        mut write_task: JoinHandle<Result<(), TitanError>>,
        release_tx: oneshot::Sender<bool>,
        orderly: bool,
    ) {
        let _ = release_tx.send(orderly);
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut write_task)
            .await
            .is_ok()
        {
            return;
        }
        debug!(
            "Timed out flushing connection {} on release.",
            self.connection.id()
        );
        write_task.abort();
        // Wait for the abort so the outbound channel is closed on return.
        let _ = write_task.await;
    }

    /// Runs the message handler for one payload on its own task.
    fn dispatch(&mut self, payload: Bytes) {
        metrics::MESSAGES_DISPATCHED_TOTAL.inc();
        let handler = self.handler.clone();
        let connection = self.connection.clone();
        let session = self.session.clone();
        let handler_timeout = self.options.handler_timeout;

        self.message_tasks.spawn(async move {
            let connection_id = connection.id();
            let handling = handler.on_message(connection, session, payload);
            match handler_timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, handling).await.is_err() {
                        metrics::HANDLER_TIMEOUTS_TOTAL.inc();
                        warn!(
                            "Message handler for connection {} exceeded {:?} and was cancelled.",
                            connection_id, limit
                        );
                    }
                }
                None => handling.await,
            }
        });
    }

    async fn run_bounded<F>(&self, what: &str, fut: F)
    where
        F: Future<Output = ()>,
    {
        match self.options.handler_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, fut).await.is_err() {
                    metrics::HANDLER_TIMEOUTS_TOTAL.inc();
                    warn!(
                        "The {} handler for connection {} exceeded {:?} and was cancelled.",
                        what,
                        self.connection.id(),
                        limit
                    );
                }
            }
            None => fut.await,
        }
    }
}

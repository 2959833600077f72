//! Connection Handler Module
//!
//! This module serves individual client connections. Each client gets its
//! own handler task that runs in a loop, reading messages and sending one
//! acknowledgment back for each.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, slot acquired
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  AWAITING_MESSAGE            │◄──┐
//!    │    read until '\n'           │   │
//!    └──────────────┬───────────────┘   │
//!                   ▼                   │
//!    ┌──────────────────────────────┐   │
//!    │  PROCESSING                  │   │
//!    │    log message, build ack    │   │
//!    └──────────────┬───────────────┘   │
//!                   ▼                   │
//!    ┌──────────────────────────────┐   │
//!    │  SENDING_ACK                 │───┘
//!    └──────────────────────────────┘
//!        │
//!        ▼  peer disconnect / I/O error / shutdown
//! 4. CLOSED: socket dropped, slot released
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a BytesMut buffer sized to the configured
//! maximum message length. The [`LineParser`] splits complete lines off the
//! front; several messages arriving in one read are answered in order.

use crate::connection::slots::SlotGuard;
use crate::protocol::{Acknowledgment, Frame, LineParser};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Total messages acknowledged
    pub messages_processed: AtomicU64,
    /// Total messages rejected as oversized
    pub messages_rejected: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection and returns its id (starting at 1).
    pub fn connection_opened(&self) -> u64 {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Where a handler is in its read/process/reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    AwaitingMessage,
    Processing,
    SendingAck,
    Closed,
}

/// Handles a single client connection.
///
/// Owns the socket and the connection slot; both are released when the
/// handler is dropped.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Connection id (for logging)
    id: u64,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Line splitter enforcing the size limit
    parser: LineParser,

    /// Current position in the state machine
    state: HandlerState,

    /// Flips to true when the server shuts down
    shutdown: watch::Receiver<bool>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Held for the handler's whole lifetime
    _slot: SlotGuard,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `slot` - The connection slot taken for this client
    /// * `buffer_size` - Maximum message payload in bytes
    /// * `shutdown` - Server shutdown flag
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        slot: SlotGuard,
        buffer_size: usize,
        shutdown: watch::Receiver<bool>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        let id = stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            id,
            buffer: BytesMut::with_capacity(buffer_size + 1),
            parser: LineParser::new(buffer_size),
            state: HandlerState::AwaitingMessage,
            shutdown,
            stats,
            _slot: slot,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Runs the connection until the peer disconnects, an I/O error occurs,
    /// or the server shuts down.
    ///
    /// A clean disconnect yields `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, conn_id = self.id, "Client connected");

        let result = self.main_loop().await;
        self.set_state(HandlerState::Closed);

        match &result {
            Ok(()) => info!(client = %self.addr, conn_id = self.id, "Client disconnected"),
            Err(ConnectionError::Shutdown) => {
                info!(client = %self.addr, conn_id = self.id, "Connection closed for shutdown")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, conn_id = self.id, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, conn_id = self.id, error = %e, "Connection error"),
        }

        result
    }

    /// The main read-process-acknowledge loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.parser.next_frame(&mut self.buffer) {
                self.process(frame).await?;
            }

            self.set_state(HandlerState::AwaitingMessage);
            if !self.read_more_data().await? {
                // Peer is done sending; answer an unterminated tail, then close
                if let Some(frame) = self.parser.finish(&mut self.buffer) {
                    self.process(frame).await?;
                }
                return Ok(());
            }
        }
    }

    /// Logs one frame and sends its acknowledgment.
    async fn process(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        self.set_state(HandlerState::Processing);

        let ack = match frame {
            Frame::Message(message) => {
                info!(
                    client = %self.addr,
                    conn_id = self.id,
                    message = %message,
                    "Received message"
                );
                self.stats.message_processed();
                Acknowledgment::for_message(&message)
            }
            Frame::Oversized { size } => {
                warn!(
                    client = %self.addr,
                    conn_id = self.id,
                    size,
                    max = self.parser.max_len(),
                    "Rejected oversized message"
                );
                self.stats.message_rejected();
                Acknowledgment::too_large(size, self.parser.max_len())
            }
        };

        self.set_state(HandlerState::SendingAck);
        self.send_ack(&ack).await
    }

    /// Reads more data from the socket into the buffer.
    ///
    /// Returns `Ok(false)` when the peer closed its side of the connection.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        let read = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => return Err(ConnectionError::Shutdown),
            read = self.stream.get_mut().read_buf(&mut self.buffer) => read,
        };

        let n = read?;
        if n == 0 {
            return Ok(false);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, conn_id = self.id, bytes = n, "Read data");
        Ok(true)
    }

    /// Writes one acknowledgment line and flushes it.
    async fn send_ack(&mut self, ack: &Acknowledgment) -> Result<(), ConnectionError> {
        let bytes = ack.serialize();
        if let Err(e) = self.write_flush(&bytes).await {
            warn!(
                client = %self.addr,
                conn_id = self.id,
                error = %e,
                "Failed to send acknowledgment"
            );
            return Err(ConnectionError::WriteFailed(e));
        }

        self.stats.bytes_written(bytes.len());
        debug!(client = %self.addr, conn_id = self.id, bytes = bytes.len(), "Sent acknowledgment");
        Ok(())
    }

    async fn write_flush(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    fn set_state(&mut self, next: HandlerState) {
        if self.state != next {
            trace!(conn_id = self.id, from = ?self.state, to = ?next, "Handler state");
            self.state = next;
        }
    }
}

/// Resolves once shutdown has been requested or the flag's sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Read failure (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Acknowledgment could not be written
    #[error("failed to write acknowledgment: {0}")]
    WriteFailed(std::io::Error),

    /// The server is shutting down
    #[error("server shutting down")]
    Shutdown,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion. Errors are already logged by the handler.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    slot: SlotGuard,
    buffer_size: usize,
    shutdown: watch::Receiver<bool>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, slot, buffer_size, shutdown, stats);
    let id = handler.id();
    if let Err(e) = handler.run().await {
        trace!(client = %addr, conn_id = id, error = %e, "Connection ended with error");
    }
}

//! Message Sender
//!
//! Exchanges request/acknowledgment pairs over one established connection.
//! The connection is reused for every message of a session; `send` never
//! reconnects on its own. Transport failures go back to the caller, which
//! decides whether to ask the [`ConnectionManager`](super::ConnectionManager)
//! for a new connection.

use crate::client::error::ClientError;
use crate::client::manager::Connection;
use crate::protocol::{Acknowledgment, Frame, LineParser, Message, ACK_PREFIX};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Room for the longest rejection line, `ERR message too large: <n> bytes
/// (max: <max>)` with both numbers at their widest.
const REJECTION_ROOM: usize = 96;

/// Sends messages and waits for their acknowledgments, one at a time.
pub struct MessageSender {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    parser: LineParser,
    read_timeout: Duration,
    max_message: usize,
}

impl MessageSender {
    /// Takes ownership of an open connection.
    ///
    /// # Arguments
    ///
    /// * `connection` - Connection returned by the connection manager
    /// * `read_timeout` - How long to wait for each acknowledgment
    /// * `max_message` - Largest payload this sender will write
    pub fn new(connection: Connection, read_timeout: Duration, max_message: usize) -> Self {
        let peer = connection.peer_addr();
        let reply_limit = (max_message + ACK_PREFIX.len()).max(REJECTION_ROOM);

        Self {
            stream: connection.into_stream(),
            peer,
            buffer: BytesMut::with_capacity(reply_limit + 1),
            parser: LineParser::new(reply_limit),
            read_timeout,
            max_message,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one message and waits for its acknowledgment.
    ///
    /// Fails with [`ClientError::Timeout`] if no reply arrives within the
    /// read timeout, [`ClientError::ConnectionClosed`] if the server hangs
    /// up first, and [`ClientError::Rejected`] if the server answers with an
    /// error line.
    pub async fn send(&mut self, message: &str) -> Result<Acknowledgment, ClientError> {
        self.check(message)?;

        let encoded = Message::from(message).encode();
        self.write(&encoded).await?;
        trace!(server = %self.peer, bytes = encoded.len(), "Sent message");

        let ack = match tokio::time::timeout(self.read_timeout, self.read_reply()).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(server = %self.peer, timeout = ?self.read_timeout, "No acknowledgment received");
                return Err(ClientError::Timeout(self.read_timeout));
            }
        };
        debug!(server = %self.peer, ack = %ack, "Received acknowledgment");

        match ack {
            Acknowledgment::Rejected(reason) => Err(ClientError::Rejected(reason)),
            Acknowledgment::Received(echoed) => {
                let sent = message.strip_suffix('\r').unwrap_or(message);
                if echoed != sent {
                    return Err(ClientError::Mismatch {
                        sent: sent.to_string(),
                        echoed,
                    });
                }
                Ok(Acknowledgment::Received(echoed))
            }
        }
    }

    /// Shuts down the write half so the server sees a clean disconnect.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(server = %self.peer, error = %e, "Error closing connection");
        }
    }

    fn check(&self, message: &str) -> Result<(), ClientError> {
        if message.contains('\n') {
            return Err(ClientError::InvalidMessage(
                "message must not contain a newline".into(),
            ));
        }
        if message.len() > self.max_message {
            return Err(ClientError::MessageTooLarge {
                size: message.len(),
                max: self.max_message,
            });
        }
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(ClientError::Transport)?;
        self.stream.flush().await.map_err(ClientError::Transport)
    }

    /// Reads until one complete reply line is buffered.
    async fn read_reply(&mut self) -> Result<Acknowledgment, ClientError> {
        loop {
            match self.parser.next_frame(&mut self.buffer) {
                Some(Frame::Message(line)) => return Ok(Acknowledgment::parse(line.as_bytes())?),
                Some(Frame::Oversized { size }) => {
                    return Err(crate::protocol::ParseError::MessageTooLarge {
                        size,
                        max: self.parser.max_len(),
                    }
                    .into())
                }
                None => {}
            }

            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(ClientError::Transport)?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

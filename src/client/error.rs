//! Client-side error taxonomy.

use crate::protocol::ParseError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the connection manager, the sender and the session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every connection attempt failed; carries the last underlying error
    #[error("connection failed after {attempts} attempts: {source}")]
    ConnectionExhausted {
        attempts: u32,
        source: std::io::Error,
    },

    /// Read or write failure on an established connection
    #[error("transport error: {0}")]
    Transport(std::io::Error),

    /// The server closed the connection before acknowledging
    #[error("connection closed before acknowledgment arrived")]
    ConnectionClosed,

    /// No acknowledgment within the read timeout
    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),

    /// Refused locally: the message exceeds the configured buffer size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Refused locally: the message would break line framing
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The server answered with an error line
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The reply could not be understood
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The acknowledgment does not echo the message just sent
    #[error("acknowledgment mismatch: sent {sent:?}, server echoed {echoed:?}")]
    Mismatch { sent: String, echoed: String },
}

impl ClientError {
    /// True when a fresh connection may succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::ConnectionClosed
                | ClientError::Timeout(_)
                | ClientError::Mismatch { .. }
        )
    }
}

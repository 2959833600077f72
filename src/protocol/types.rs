//! Wire Types
//!
//! The protocol carries newline-delimited UTF-8 text in both directions.
//!
//! ## Format
//!
//! Client to server, one message per line:
//!
//! ```text
//! hello\n
//! ```
//!
//! Server to client, exactly one reply per message, in order:
//!
//! ```text
//! Server received: hello\n
//! ERR message too large: 4096 bytes (max: 1024)\n
//! ```
//!
//! The first form is the acknowledgment proper; the second answers a message
//! that was rejected for exceeding the server's buffer size.

use crate::protocol::parser::ParseError;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;

/// Line delimiter used in both directions
pub const DELIMITER: u8 = b'\n';

/// Prefix of every successful acknowledgment
pub const ACK_PREFIX: &str = "Server received: ";

/// Prefix of a rejection reply
pub const ERR_PREFIX: &str = "ERR ";

/// One logical unit of client-to-server communication.
///
/// The payload never contains the delimiter. It is immutable once built; the
/// underlying `Bytes` makes clones cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Creates a message from its payload (without the trailing delimiter).
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Returns the raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes, excluding the delimiter.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Decodes the payload as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Serializes the message for the wire (payload followed by `\n`).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 1);
        buf.extend_from_slice(&self.payload);
        buf.push(DELIMITER);
        buf
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

/// The server's reply to a single client message.
///
/// Computed purely from the received message (or the rejection reason), so
/// the server never needs external state to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// The message was read and logged; carries the echoed payload
    Received(String),

    /// The message was discarded; carries the reason
    Rejected(String),
}

impl Acknowledgment {
    /// Builds the acknowledgment for a successfully read message.
    ///
    /// # Example
    /// ```
    /// use ackline::protocol::{Acknowledgment, Message};
    /// let ack = Acknowledgment::for_message(&Message::from("hello"));
    /// assert_eq!(ack.serialize(), b"Server received: hello\n");
    /// ```
    pub fn for_message(message: &Message) -> Self {
        Acknowledgment::Received(message.to_string_lossy().into_owned())
    }

    /// Builds the rejection sent for an oversized message.
    pub fn too_large(size: usize, max: usize) -> Self {
        Acknowledgment::Rejected(format!(
            "message too large: {} bytes (max: {})",
            size, max
        ))
    }

    /// Returns true for a rejection reply.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Acknowledgment::Rejected(_))
    }

    /// The echoed payload of a successful acknowledgment.
    pub fn echoed(&self) -> Option<&str> {
        match self {
            Acknowledgment::Received(s) => Some(s),
            Acknowledgment::Rejected(_) => None,
        }
    }

    /// Serializes the reply into a single delimited line.
    pub fn serialize(&self) -> Vec<u8> {
        let (prefix, body) = match self {
            Acknowledgment::Received(s) => (ACK_PREFIX, s),
            Acknowledgment::Rejected(s) => (ERR_PREFIX, s),
        };
        let mut buf = Vec::with_capacity(prefix.len() + body.len() + 1);
        buf.extend_from_slice(prefix.as_bytes());
        buf.extend_from_slice(body.as_bytes());
        buf.push(DELIMITER);
        buf
    }

    /// Parses a reply line (delimiter already removed).
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        let text = String::from_utf8_lossy(line);

        if let Some(body) = text.strip_prefix(ACK_PREFIX) {
            Ok(Acknowledgment::Received(body.to_string()))
        } else if let Some(reason) = text.strip_prefix(ERR_PREFIX) {
            Ok(Acknowledgment::Rejected(reason.to_string()))
        } else {
            Err(ParseError::UnexpectedReply(text.into_owned()))
        }
    }
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acknowledgment::Received(s) => write!(f, "{}{}", ACK_PREFIX, s),
            Acknowledgment::Rejected(s) => write!(f, "{}{}", ERR_PREFIX, s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_encode() {
        let msg = Message::from("hello");
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.encode(), b"hello\n");
    }

    #[test]
    fn test_message_lossy_utf8() {
        let msg = Message::new(Bytes::from_static(b"caf\xff"));
        assert_eq!(msg.to_string_lossy(), "caf\u{fffd}");
    }

    #[test]
    fn test_ack_for_message() {
        let ack = Acknowledgment::for_message(&Message::from("ping"));
        assert_eq!(ack, Acknowledgment::Received("ping".to_string()));
        assert_eq!(ack.echoed(), Some("ping"));
        assert!(!ack.is_rejection());
    }

    #[test]
    fn test_ack_too_large_serialize() {
        let ack = Acknowledgment::too_large(2048, 1024);
        assert!(ack.is_rejection());
        assert_eq!(
            ack.serialize(),
            b"ERR message too large: 2048 bytes (max: 1024)\n"
        );
    }

    #[test]
    fn test_parse_received() {
        let ack = Acknowledgment::parse(b"Server received: a b c").unwrap();
        assert_eq!(ack, Acknowledgment::Received("a b c".to_string()));
    }

    #[test]
    fn test_parse_rejected() {
        let ack = Acknowledgment::parse(b"ERR message too large: 9 bytes (max: 4)").unwrap();
        assert_eq!(
            ack,
            Acknowledgment::Rejected("message too large: 9 bytes (max: 4)".to_string())
        );
    }

    #[test]
    fn test_parse_unexpected() {
        let err = Acknowledgment::parse(b"+PONG").unwrap_err();
        assert_eq!(err, ParseError::UnexpectedReply("+PONG".to_string()));
    }

    #[test]
    fn test_display_matches_wire() {
        let ack = Acknowledgment::for_message(&Message::from("x"));
        assert_eq!(format!("{}\n", ack).as_bytes(), ack.serialize().as_slice());
    }
}

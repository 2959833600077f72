//! Incremental Line Parser
//!
//! TCP is a byte stream: one read may carry half a message, or several.
//! The parser is handed the connection's read buffer after every read and
//! splits off complete lines as they become available.
//!
//! ## Size Limit
//!
//! Every parser has a maximum payload length. A line whose payload exceeds it
//! is never buffered in full: once the buffer holds more than the limit
//! without a delimiter, the parser drops what it has and keeps discarding
//! until the delimiter arrives. It then yields a single
//! [`Frame::Oversized`] so the caller can answer the rejected message exactly
//! once and carry on with the next line.
//!
//! ```text
//! buffer: "hi\nthis-line-is-way-too-long...\nok\n"
//!           │    │                              │
//!           ▼    ▼                              ▼
//!    Message("hi")  Oversized { size }    Message("ok")
//! ```

use crate::protocol::types::{Message, DELIMITER};
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Errors that can occur while decoding lines.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A line exceeded the configured maximum
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A reply line matched neither the acknowledgment nor the error format
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// One unit split off the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line within the size limit
    Message(Message),

    /// A line that exceeded the limit and was discarded
    Oversized { size: usize },
}

/// Splits a byte stream into newline-delimited frames.
///
/// # Example
///
/// ```
/// use ackline::protocol::{Frame, LineParser, Message};
/// use bytes::BytesMut;
///
/// let mut parser = LineParser::new(1024);
/// let mut buffer = BytesMut::from(&b"hello\nwor"[..]);
///
/// assert_eq!(
///     parser.next_frame(&mut buffer),
///     Some(Frame::Message(Message::from("hello")))
/// );
/// assert_eq!(parser.next_frame(&mut buffer), None);
/// assert_eq!(&buffer[..], b"wor");
/// ```
#[derive(Debug)]
pub struct LineParser {
    /// Maximum payload length in bytes
    max_len: usize,

    /// Bytes dropped so far from an oversized line still being received
    discarding: Option<usize>,

    /// Whether the last byte dropped while discarding was '\r'
    dropped_cr: bool,
}

impl LineParser {
    /// Creates a parser accepting payloads of at most `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            discarding: None,
            dropped_cr: false,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns true while the parser is skipping the rest of an oversized line.
    pub fn is_discarding(&self) -> bool {
        self.discarding.is_some()
    }

    /// Splits the next complete frame off the front of `buf`.
    ///
    /// Returns `None` when more data is needed. Consumed bytes are removed
    /// from `buf`; an incomplete tail is left in place unless it already
    /// exceeds the limit.
    pub fn next_frame(&mut self, buf: &mut BytesMut) -> Option<Frame> {
        if let Some(discarded) = self.discarding {
            return match find_delimiter(buf) {
                Some(pos) => {
                    let cr = self.ends_with_cr(&buf[..pos]);
                    buf.advance(pos + 1);
                    self.discarding = None;
                    Some(Frame::Oversized {
                        size: discarded + pos - usize::from(cr),
                    })
                }
                None => {
                    self.discard(buf, discarded);
                    None
                }
            };
        }

        match find_delimiter(buf) {
            Some(pos) => {
                let line = buf.split_to(pos + 1).freeze();
                let payload = strip_cr(line.slice(..pos));
                Some(self.check_size(payload))
            }
            None => {
                // Room for the payload plus a trailing '\r'
                if buf.len() > self.max_len + 1 {
                    self.discard(buf, 0);
                }
                None
            }
        }
    }

    /// Flushes whatever is left once the peer has stopped sending.
    ///
    /// An unterminated tail is treated as a final message.
    pub fn finish(&mut self, buf: &mut BytesMut) -> Option<Frame> {
        if let Some(discarded) = self.discarding.take() {
            let cr = self.ends_with_cr(buf);
            let size = discarded + buf.len() - usize::from(cr);
            buf.clear();
            return Some(Frame::Oversized { size });
        }

        if buf.is_empty() {
            return None;
        }

        let payload = strip_cr(buf.split().freeze());
        Some(self.check_size(payload))
    }

    /// Drops the buffered bytes of an oversized line.
    fn discard(&mut self, buf: &mut BytesMut, discarded: usize) {
        if !buf.is_empty() {
            self.dropped_cr = buf.last() == Some(&b'\r');
        }
        self.discarding = Some(discarded + buf.len());
        buf.clear();
    }

    /// Whether the line being discarded ends in '\r', given the bytes of it
    /// still buffered.
    fn ends_with_cr(&self, rest: &[u8]) -> bool {
        match rest.last() {
            Some(&b) => b == b'\r',
            None => self.dropped_cr,
        }
    }

    fn check_size(&self, payload: bytes::Bytes) -> Frame {
        if payload.len() > self.max_len {
            Frame::Oversized {
                size: payload.len(),
            }
        } else {
            Frame::Message(Message::new(payload))
        }
    }
}

/// Finds the position of the first delimiter in the buffer.
#[inline]
fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == DELIMITER)
}

/// Drops a single trailing carriage return.
#[inline]
fn strip_cr(payload: bytes::Bytes) -> bytes::Bytes {
    if payload.last() == Some(&b'\r') {
        payload.slice(..payload.len() - 1)
    } else {
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(s: &str) -> Frame {
        Frame::Message(Message::from(s))
    }

    #[test]
    fn test_single_line() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::from(&b"hello\n"[..]);
        assert_eq!(parser.next_frame(&mut buf), Some(msg("hello")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_line() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        assert_eq!(&buf[..], b"hel");

        buf.extend_from_slice(b"lo\n");
        assert_eq!(parser.next_frame(&mut buf), Some(msg("hello")));
    }

    #[test]
    fn test_multiple_lines_in_order() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::from(&b"one\ntwo\nthree\n"[..]);
        assert_eq!(parser.next_frame(&mut buf), Some(msg("one")));
        assert_eq!(parser.next_frame(&mut buf), Some(msg("two")));
        assert_eq!(parser.next_frame(&mut buf), Some(msg("three")));
        assert_eq!(parser.next_frame(&mut buf), None);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::from(&b"hello\r\n"[..]);
        assert_eq!(parser.next_frame(&mut buf), Some(msg("hello")));
    }

    #[test]
    fn test_empty_line() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert_eq!(parser.next_frame(&mut buf), Some(msg("")));
    }

    #[test]
    fn test_exact_limit_accepted() {
        let mut parser = LineParser::new(4);
        let mut buf = BytesMut::from(&b"abcd\r"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        assert!(!parser.is_discarding());

        buf.extend_from_slice(b"\n");
        assert_eq!(parser.next_frame(&mut buf), Some(msg("abcd")));
    }

    #[test]
    fn test_oversized_complete_line() {
        let mut parser = LineParser::new(4);
        let mut buf = BytesMut::from(&b"abcde\nok\n"[..]);
        assert_eq!(parser.next_frame(&mut buf), Some(Frame::Oversized { size: 5 }));
        assert_eq!(parser.next_frame(&mut buf), Some(msg("ok")));
    }

    #[test]
    fn test_oversized_across_reads() {
        let mut parser = LineParser::new(4);
        let mut buf = BytesMut::from(&b"abcdefgh"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        assert!(parser.is_discarding());
        assert!(buf.is_empty());

        buf.extend_from_slice(b"ijkl");
        assert_eq!(parser.next_frame(&mut buf), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"mn\nnext\n");
        assert_eq!(
            parser.next_frame(&mut buf),
            Some(Frame::Oversized { size: 14 })
        );
        assert!(!parser.is_discarding());
        assert_eq!(parser.next_frame(&mut buf), Some(msg("next")));
    }

    #[test]
    fn test_oversized_crlf_size_matches_both_paths() {
        // Whole line in one buffer
        let mut parser = LineParser::new(4);
        let mut buf = BytesMut::from(&b"abcdefgh\r\n"[..]);
        assert_eq!(parser.next_frame(&mut buf), Some(Frame::Oversized { size: 8 }));

        // Same line discarded across reads, '\r' next to the delimiter
        let mut parser = LineParser::new(4);
        let mut buf = BytesMut::from(&b"abcdefg"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        assert!(parser.is_discarding());
        buf.extend_from_slice(b"h\r\n");
        assert_eq!(parser.next_frame(&mut buf), Some(Frame::Oversized { size: 8 }));

        // '\r' dropped in one read, delimiter alone in the next
        let mut parser = LineParser::new(4);
        let mut buf = BytesMut::from(&b"abcdefgh\r"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        buf.extend_from_slice(b"\nok\n");
        assert_eq!(parser.next_frame(&mut buf), Some(Frame::Oversized { size: 8 }));
        assert_eq!(parser.next_frame(&mut buf), Some(msg("ok")));
    }

    #[test]
    fn test_finish_with_tail() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::from(&b"last"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        assert_eq!(parser.finish(&mut buf), Some(msg("last")));
        assert_eq!(parser.finish(&mut buf), None);
    }

    #[test]
    fn test_finish_while_discarding() {
        let mut parser = LineParser::new(2);
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert_eq!(parser.next_frame(&mut buf), None);
        buf.extend_from_slice(b"gh");
        assert_eq!(parser.finish(&mut buf), Some(Frame::Oversized { size: 8 }));
        assert!(!parser.is_discarding());
    }

    #[test]
    fn test_finish_empty() {
        let mut parser = LineParser::new(16);
        let mut buf = BytesMut::new();
        assert_eq!(parser.finish(&mut buf), None);
    }
}

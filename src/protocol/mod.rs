//! Line Protocol Implementation
//!
//! This module defines the wire contract shared by the server and the client.
//!
//! ## Overview
//!
//! Messages are UTF-8 text lines terminated by `\n`. There is no length
//! prefix: the receiver reads until the delimiter, bounded by a maximum
//! payload size. Every message is answered by exactly one reply line.
//!
//! ## Modules
//!
//! - `types`: `Message` and `Acknowledgment`, plus their wire encodings
//! - `parser`: Incremental splitter that turns a read buffer into frames
//!
//! ## Example
//!
//! ```ignore
//! use ackline::protocol::{Acknowledgment, Frame, LineParser};
//! use bytes::BytesMut;
//!
//! let mut parser = LineParser::new(1024);
//! let mut buffer = BytesMut::from(&b"hello\n"[..]);
//!
//! if let Some(Frame::Message(msg)) = parser.next_frame(&mut buffer) {
//!     let reply = Acknowledgment::for_message(&msg).serialize();
//! }
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{Frame, LineParser, ParseError, ParseResult};
pub use types::{Acknowledgment, Message, ACK_PREFIX, DELIMITER, ERR_PREFIX};

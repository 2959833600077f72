//! # ackline - Acknowledged Line Messaging over TCP
//!
//! ackline is a minimal client/server pair exchanging newline-delimited
//! text messages over TCP. The server acknowledges every message it reads,
//! in order, on the same connection; the client connects with bounded
//! retries and reuses one connection for a whole session.
//!
//! ## Features
//!
//! - **Per-connection tasks**: Every accepted client gets its own Tokio task
//! - **Connection ceiling**: A slot pool bounds concurrent handlers; excess
//!   clients queue in the listen backlog
//! - **Graceful shutdown**: SIGINT/SIGTERM drain handlers with a timeout
//! - **Bounded retry**: Fixed, linear or exponential backoff between
//!   connection attempts, with an explicit attempt cap
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────── server ───────────────────────────────┐
//! │                                                                     │
//! │  ┌─────────────┐  slot  ┌───────────────────┐                       │
//! │  │  Listener   │───────>│ ConnectionHandler │──> log message        │
//! │  │ (accept)    │        │  (one per client) │<── "Server received:" │
//! │  └──────▲──────┘        └─────────▲─────────┘                       │
//! │         │ ConnectionSlots         │                                 │
//! └─────────┼─────────────────────────┼─────────────────────────────────┘
//!           │ connect                 │ message\n  ⇄  ack\n
//! ┌─────────┼─────────────────────────┼─────────── client ──────────────┐
//! │  ┌──────┴────────────┐   ┌────────┴────────┐                        │
//! │  │ ConnectionManager │──>│  MessageSender  │<── Session             │
//! │  │ (retry, backoff)  │   └─────────────────┘                        │
//! │  └───────────────────┘                                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ackline::config::ServerSettings;
//! use ackline::server::Listener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = ServerSettings { port: 0, ..ServerSettings::default() };
//!     let listener = Listener::start(&settings).await.unwrap();
//!
//!     ackline::server::shutdown_signal().await.unwrap();
//!     listener.stop().await;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Message/acknowledgment types and the line parser
//! - [`connection`]: Server-side connection handler and slot pool
//! - [`server`]: Listener and signal handling
//! - [`client`]: Connection manager, message sender and session
//! - [`config`]: TOML configuration and CLI arguments
//! - [`logging`]: Tracing subscriber setup
//!
//! ## Oversized Messages
//!
//! A message longer than the server's `buffer_size` is rejected, not
//! truncated: the server discards it up to its newline and replies with a
//! single `ERR message too large: ...` line, keeping the connection open.
//! The client refuses to send such a message in the first place.

pub mod client;
pub mod config;
pub mod connection;
pub mod logging;
pub mod protocol;
pub mod server;

// Re-export commonly used types for convenience
pub use client::{ClientError, ConnectionManager, MessageSender, Session};
pub use connection::{handle_connection, ConnectionSlots, ConnectionStats};
pub use protocol::{Acknowledgment, LineParser, Message};
pub use server::{DrainOutcome, Listener, ServerError};

/// The default port the server listens on
pub const DEFAULT_PORT: u16 = 12345;

/// The default host the client connects to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default maximum message payload in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default ceiling on concurrently served connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Version of ackline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

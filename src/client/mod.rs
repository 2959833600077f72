//! Client Module
//!
//! The client side of the protocol: a single sequential flow with no
//! internal concurrency.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   connect (retry + backoff)   ┌─────────────────┐
//! │ ConnectionMgr   │──────────────────────────────>│    Server       │
//! └────────┬────────┘                               └────────▲────────┘
//!          │ Connection                                      │
//!          ▼                                                 │
//! ┌─────────────────┐   message\n  /  ack\n                  │
//! │ MessageSender   │<──────────────────────────────────────┘
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Session      │  lazy connect, one reconnect on transport failure
//! └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `manager`: `ConnectionManager`, `RetryPolicy`, `Backoff`, `RetryState`
//! - `sender`: `MessageSender` request/acknowledgment exchange
//! - `session`: `Session` used by both client modes
//! - `sysinfo`: the `System Info: ...` payload
//! - `error`: `ClientError`

pub mod error;
pub mod manager;
pub mod sender;
pub mod session;
pub mod sysinfo;

// Re-export commonly used types
pub use error::ClientError;
pub use manager::{Backoff, Connection, ConnectionManager, RetryPolicy, RetryState};
pub use sender::MessageSender;
pub use session::{Session, CONNECTION_TEST};
pub use sysinfo::SystemInfo;

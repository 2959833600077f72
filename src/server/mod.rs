//! Server Module
//!
//! The listening side: binds the socket, gates connections through the
//! slot pool, and spawns one `ConnectionHandler` task per client.
//!
//! - `listener`: `Listener` start/stop, `DrainOutcome`, `ServerError`
//! - `signal`: SIGINT/SIGTERM wiring for graceful shutdown

pub mod listener;
pub mod signal;

pub use listener::{DrainOutcome, Listener, ServerError};
pub use signal::shutdown_signal;

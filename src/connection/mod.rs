//! Connection Handler Module
//!
//! This module manages individual client connections on the server side.
//! Each accepted connection is served by its own async task, so one slow
//! client never holds up another.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Listener                                │
//! │                  (server module)                            │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ acquire slot, accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Split lines │───>│ Log message │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │  Send ack   │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Slot Accounting**: Each handler holds a `SlotGuard` until it ends
//! - **Pipelining**: Several messages in one TCP packet are answered in order
//! - **Statistics**: Tracks connection and message metrics

pub mod handler;
pub mod slots;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, HandlerState,
};
pub use slots::{ConnectionSlots, SlotGuard, SlotPermit};

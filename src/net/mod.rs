//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (non-blocking accept, connection cap)
//!     → connection.rs (ID, readiness bookkeeping)
//!     → buffer.rs (fixed-capacity read/processed/write buffers)
//!     → Hand off to the proxy session handlers
//! ```
//!
//! # Design Decisions
//! - Buffers never grow; a full buffer is backpressure
//! - Readiness is tracked per handler, not re-registered with the poller

pub mod buffer;
pub mod connection;
pub mod listener;

pub use buffer::Buffer;
pub use connection::{ConnectionId, Ready, Readiness};
pub use listener::{Accepted, Listener, ListenerError};

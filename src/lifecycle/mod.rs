//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Parse flags → Load config → Validate → Init logging/metrics → Bind → Run
//!
//! Shutdown (shutdown.rs):
//!     trigger() → waker fires → event loop closes every socket → run() returns
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;

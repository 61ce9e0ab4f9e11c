//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Event loop and handlers produce:
//!     → logging.rs (structured log events, connection ID fields)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → Log output (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → In-process readers (ProxyMetrics::snapshot)
//! ```

pub mod logging;
pub mod metrics;

pub use self::logging::init_logging;
pub use self::metrics::{init_metrics, MetricsSnapshot, ProxyMetrics};

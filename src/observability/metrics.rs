//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count proxy activity at fixed points (accept, connect, bytes, statuses)
//! - Expose Prometheus-compatible metrics endpoint
//! - Offer a plain snapshot for in-process readers
//!
//! # Metrics
//! - `proxy_connections_total` (counter): opened connections by `side`
//!   (`client`, `upstream`)
//! - `proxy_pool_reuse_total` (counter): requests served by a pooled upstream
//! - `proxy_bytes_total` (counter): bytes by `direction` (`read`, `written`)
//! - `proxy_requests_total` (counter): requests by `method`
//! - `proxy_responses_total` (counter): responses by `status`, canned ones included
//!
//! # Design Decisions
//! - The event loop is single-threaded: local counters are plain integers
//! - Every increment is mirrored to the `metrics` facade; without an
//!   installed recorder that is a no-op

use std::collections::BTreeMap;
use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::http::Method;

/// Counter state owned by the proxy context.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    snapshot: MetricsSnapshot,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub client_connections: u64,
    pub upstream_connections: u64,
    pub pool_reuses: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub requests: BTreeMap<Method, u64>,
    pub responses: BTreeMap<u16, u64>,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_accepted(&mut self) {
        self.snapshot.client_connections += 1;
        metrics::counter!("proxy_connections_total", "side" => "client").increment(1);
    }

    pub fn upstream_opened(&mut self) {
        self.snapshot.upstream_connections += 1;
        metrics::counter!("proxy_connections_total", "side" => "upstream").increment(1);
    }

    pub fn pool_reused(&mut self) {
        self.snapshot.pool_reuses += 1;
        metrics::counter!("proxy_pool_reuse_total").increment(1);
    }

    pub fn bytes_read(&mut self, count: usize) {
        self.snapshot.bytes_read += count as u64;
        metrics::counter!("proxy_bytes_total", "direction" => "read").increment(count as u64);
    }

    pub fn bytes_written(&mut self, count: usize) {
        self.snapshot.bytes_written += count as u64;
        metrics::counter!("proxy_bytes_total", "direction" => "written").increment(count as u64);
    }

    pub fn request(&mut self, method: Method) {
        *self.snapshot.requests.entry(method).or_default() += 1;
        metrics::counter!("proxy_requests_total", "method" => method.as_str()).increment(1);
    }

    pub fn response(&mut self, status: u16) {
        *self.snapshot.responses.entry(status).or_default() += 1;
        metrics::counter!("proxy_responses_total", "status" => status.to_string()).increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.clone()
    }
}

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

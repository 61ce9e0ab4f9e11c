//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Per-connection buffer sizes and parser bounds.
    pub buffers: BufferConfig,

    /// Upstream connection pooling.
    pub pool: PoolConfig,

    /// Protocol settings.
    pub http: HttpConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Buffer sizes, all in bytes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Raw bytes read from a socket, before parsing.
    pub read_size: usize,

    /// Rewritten request bytes waiting to be sent upstream.
    pub processed_size: usize,

    /// Rewritten response bytes waiting to be sent to the client.
    pub write_size: usize,

    /// Longest header name.
    pub header_name_size: usize,

    /// Longest captured header value.
    pub header_content_size: usize,

    /// Longest request or status line.
    pub max_line_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_size: 8 * 1024,
            processed_size: 8 * 1024,
            write_size: 8 * 1024,
            header_name_size: 64,
            header_content_size: 4 * 1024,
            max_line_size: 8 * 1024,
        }
    }
}

/// Upstream connection pool.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Keep idle upstream connections for reuse.
    pub enabled: bool,

    /// How long an idle connection stays pooled, in milliseconds.
    pub ttl_ms: u64,

    /// Pool sweep period and event loop poll timeout, in milliseconds.
    pub sweep_interval_ms: u64,

    /// Ask origins to keep connections open (`Connection: keep-alive`
    /// instead of `Connection: close` on forwarded requests).
    pub upstream_keep_alive: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 15_000,
            sweep_interval_ms: 1_000,
            upstream_keep_alive: false,
        }
    }
}

impl PoolConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Request methods forwarded; everything else is answered with 405.
    pub accepted_methods: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            accepted_methods: ["GET", "POST", "HEAD", "OPTIONS", "PUT", "DELETE", "TRACE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

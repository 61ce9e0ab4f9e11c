//! Forwarding proxy core.
//!
//! # Data Flow
//! ```text
//! client socket → client.read_buf → RequestParser → client.processed
//!     → server socket (origin)
//! origin socket → server.read_buf → ResponseParser → client.write_buf
//!     → client socket
//! ```
//!
//! # Design Decisions
//! - One thread, one `mio::Poll`; every handler lives in an arena keyed by
//!   its poll `Token` and refers to its peer by token
//! - The client owns both cross-side buffers, so the upstream handler writes
//!   straight from the request output and parses straight into the response
//!   output with no intermediate copy
//! - Shared state (config, parser limits, metrics) lives in `ProxyContext`,
//!   passed by reference instead of global singletons

pub mod client;
pub mod event_loop;
pub mod pool;
pub mod server;
pub mod session;

pub use event_loop::Proxy;
pub use pool::ConnectionManager;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use thiserror::Error;

use crate::config::{ConfigError, ProxyConfig};
use crate::http::method::{MethodSet, UnknownMethod};
use crate::http::ParserLimits;
use crate::net::ListenerError;
use crate::observability::ProxyMetrics;

/// Port used when the target host carries none.
pub const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid accepted method: {0}")]
    Method(#[from] UnknownMethod),

    #[error("invalid upstream host {0:?}")]
    InvalidHost(String),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),
}

/// Everything the handlers share, built once at startup.
#[derive(Debug)]
pub struct ProxyContext {
    pub config: ProxyConfig,
    pub limits: ParserLimits,
    pub metrics: ProxyMetrics,
}

impl ProxyContext {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let methods = MethodSet::parse(&config.http.accepted_methods)?;
        let limits = ParserLimits::from_config(&config.buffers, methods);
        Ok(Self {
            config,
            limits,
            metrics: ProxyMetrics::new(),
        })
    }
}

/// Split `host[:port]` or `[v6][:port]`, defaulting to port 80.
pub fn split_host_port(host: &str) -> Result<(&str, u16), ProxyError> {
    let invalid = || ProxyError::InvalidHost(host.to_string());

    let (name, port) = if let Some(rest) = host.strip_prefix('[') {
        let (name, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (name, None),
            _ => (name, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => (name, Some(port)),
            _ => (host, None),
        }
    };

    if name.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(p) => p.parse().map_err(|_| invalid())?,
        None => DEFAULT_HTTP_PORT,
    };
    Ok((name, port))
}

/// Resolve the origin address for a request's host. Blocking.
pub fn resolve_upstream(host: &str) -> Result<SocketAddr, ProxyError> {
    let (name, port) = split_host_port(host)?;
    (name, port)
        .to_socket_addrs()
        .map_err(|source| ProxyError::Resolve {
            host: host.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| ProxyError::NoAddress(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_forms() {
        assert_eq!(split_host_port("a.com").unwrap(), ("a.com", 80));
        assert_eq!(split_host_port("a.com:8080").unwrap(), ("a.com", 8080));
        assert_eq!(split_host_port("[::1]").unwrap(), ("::1", 80));
        assert_eq!(split_host_port("[::1]:3128").unwrap(), ("::1", 3128));
        assert_eq!(split_host_port("::1").unwrap(), ("::1", 80));
    }

    #[test]
    fn bad_hosts_are_rejected() {
        for bad in ["", ":80", "a.com:http", "a.com:99999", "[::1", "[::1]x"] {
            assert!(
                matches!(split_host_port(bad), Err(ProxyError::InvalidHost(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn resolves_literal_addresses() {
        let addr = resolve_upstream("127.0.0.1:9").unwrap();
        assert_eq!(addr, "127.0.0.1:9".parse().unwrap());
        let addr = resolve_upstream("[::1]:9").unwrap();
        assert_eq!(addr, "[::1]:9".parse().unwrap());
    }

    #[test]
    fn context_rejects_unknown_methods() {
        let mut config = ProxyConfig::default();
        config.http.accepted_methods = vec!["FETCH".to_string()];
        assert!(matches!(
            ProxyContext::new(config),
            Err(ProxyError::Method(_))
        ));
    }
}

//! Forwarding HTTP/1.1 proxy library.
//!
//! Clients send absolute-URI (or `Host`-addressed) requests; the proxy
//! rewrites hop-by-hop connection headers, forwards the request to the
//! origin, relays the response, and keeps idle origin connections pooled.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use proxy::{Proxy, ProxyError};

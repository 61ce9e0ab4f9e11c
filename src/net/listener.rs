//! Non-blocking TCP listener with a connection cap.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept every pending connection on a readiness event
//! - Enforce `max_connections`: clients past the cap are closed on accept

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The configured address does not parse.
    #[error("invalid bind address {address}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// A bounded TCP listener.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    max_connections: usize,
}

/// Outcome of one `accept()` attempt.
#[derive(Debug)]
pub enum Accepted {
    Stream(TcpStream, SocketAddr),
    /// Over the cap; the socket was closed.
    Rejected(SocketAddr),
    /// Nothing more to accept for this readiness event.
    Drained,
}

impl Listener {
    /// Bind to the configured address.
    pub fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr =
            config
                .bind_address
                .parse()
                .map_err(|source| ListenerError::Address {
                    address: config.bind_address.clone(),
                    source,
                })?;

        let inner = TcpListener::bind(addr).map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            max_connections: config.max_connections,
        })
    }

    /// Accept one pending connection given the number currently open.
    pub fn accept(&self, open_connections: usize) -> Result<Accepted, ListenerError> {
        match self.inner.accept() {
            Ok((stream, addr)) => {
                if open_connections >= self.max_connections {
                    tracing::warn!(
                        peer_addr = %addr,
                        max_connections = self.max_connections,
                        "Connection limit reached, closing"
                    );
                    drop(stream);
                    return Ok(Accepted::Rejected(addr));
                }
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                Ok(Accepted::Stream(stream, addr))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Accepted::Drained),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.accept(open_connections),
            Err(e) => Err(ListenerError::Accept(e)),
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub(crate) fn source(&mut self) -> &mut TcpListener {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
        }
    }

    #[test]
    fn rejects_unparsable_address() {
        let bad = ListenerConfig {
            bind_address: "not-an-address".to_string(),
            max_connections: 1,
        };
        assert!(matches!(
            Listener::bind(&bad),
            Err(ListenerError::Address { .. })
        ));
    }

    #[test]
    fn accept_respects_connection_cap() {
        let listener = Listener::bind(&config(1)).unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();

        // the connection may take a moment to show up in the backlog
        let mut outcome = listener.accept(1).unwrap();
        for _ in 0..100 {
            if !matches!(outcome, Accepted::Drained) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            outcome = listener.accept(1).unwrap();
        }
        assert!(matches!(outcome, Accepted::Rejected(_)));
        assert!(matches!(listener.accept(0).unwrap(), Accepted::Drained));
    }
}

//! Upstream connection manager.
//!
//! # Responsibilities
//! - Hand out an upstream handler for a client: a pooled one when a live
//!   connection to the same address is idle, a freshly opened one otherwise
//! - Keep idle upstream connections with a fixed time-to-live
//! - Evict expired entries on sweep, dead ones on checkout or readiness
//!
//! # Design Decisions
//! - The pool only stores tokens; pooled handlers stay in the arena so their
//!   sockets keep receiving readiness events (an origin closing an idle
//!   connection evicts it right away)
//! - Most recently stored connection is reused first

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::Token;

use crate::proxy::server::ServerHandler;
use crate::proxy::session::Core;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    token: Token,
    expires: Instant,
}

/// Idle upstream connections by remote address.
#[derive(Debug)]
pub struct ConnectionManager {
    enabled: bool,
    ttl: Duration,
    entries: HashMap<SocketAddr, Vec<Entry>>,
    addresses: HashMap<Token, SocketAddr>,
}

/// How a client got its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Reused(Token),
    Opened(Token),
}

impl ConnectionManager {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            entries: HashMap::new(),
            addresses: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pool an idle connection. Returns false when pooling is disabled.
    pub fn store(&mut self, addr: SocketAddr, token: Token, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        self.remove(token);
        self.entries.entry(addr).or_default().push(Entry {
            token,
            expires: now + self.ttl,
        });
        self.addresses.insert(token, addr);
        true
    }

    /// Take the newest unexpired connection to `addr`. Expired ones are left
    /// for `sweep`.
    pub fn checkout(&mut self, addr: SocketAddr, now: Instant) -> Option<Token> {
        let entries = self.entries.get_mut(&addr)?;
        let index = entries.iter().rposition(|e| e.expires > now)?;
        let entry = entries.remove(index);
        if entries.is_empty() {
            self.entries.remove(&addr);
        }
        self.addresses.remove(&entry.token);
        Some(entry.token)
    }

    /// Forget a pooled connection. Returns whether it was pooled.
    pub fn remove(&mut self, token: Token) -> bool {
        let Some(addr) = self.addresses.remove(&token) else {
            return false;
        };
        if let Some(entries) = self.entries.get_mut(&addr) {
            entries.retain(|e| e.token != token);
            if entries.is_empty() {
                self.entries.remove(&addr);
            }
        }
        true
    }

    /// Remove every entry whose TTL elapsed; the caller closes them.
    pub fn sweep(&mut self, now: Instant) -> Vec<Token> {
        let mut expired = Vec::new();
        self.entries.retain(|_, entries| {
            entries.retain(|e| {
                let keep = e.expires > now;
                if !keep {
                    expired.push(e.token);
                }
                keep
            });
            !entries.is_empty()
        });
        for token in &expired {
            self.addresses.remove(token);
        }
        expired
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.entries.contains_key(&addr)
    }

    pub fn is_pooled(&self, token: Token) -> bool {
        self.addresses.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Give `client` an upstream connection to `addr`.
///
/// Pooled candidates are peeked at first; dead ones are closed and the next one
/// is tried. Falls back to a new non-blocking connect.
pub(crate) fn connect(
    core: &mut Core<'_>,
    addr: SocketAddr,
    client: Token,
) -> io::Result<Upstream> {
    let now = Instant::now();
    while let Some(token) = core.pool.checkout(addr, now) {
        let Some(server) = core.arena.server_mut(token) else {
            continue;
        };
        if server.is_alive() {
            server.attach(client);
            tracing::debug!(
                connection_id = %server.id,
                upstream = %addr,
                "Reusing pooled upstream connection"
            );
            core.context.metrics.pool_reused();
            core.wake(token);
            return Ok(Upstream::Reused(token));
        }
        tracing::debug!(upstream = %addr, "Pooled upstream connection is dead, discarding");
        core.close(token);
    }
    ServerHandler::open(core, addr, client).map(Upstream::Opened)
}

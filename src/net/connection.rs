//! Connection identity and readiness bookkeeping.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track what a socket wants (`interest`) against what the poller
//!   reported (`event`)
//!
//! # Design Decisions
//! - Sockets are registered once, edge-triggered, for both directions.
//!   Interest is a purely local filter: a handler is driven while
//!   `interest & event` is non-empty, and it clears `event` bits when the
//!   socket returns `WouldBlock`.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness is needed.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Set of readiness kinds.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready(u8);

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(0b0001);
    pub const WRITABLE: Ready = Ready(0b0010);
    /// Peer closed (read or write side).
    pub const HUP: Ready = Ready(0b0100);
    pub const ERROR: Ready = Ready(0b1000);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Ready) -> bool {
        self.0 & other.0 == other.0 && !other.is_empty()
    }

    pub fn intersects(&self, other: Ready) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Ready) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }

    /// Translate a poller event.
    pub fn from_event(event: &mio::event::Event) -> Ready {
        let mut ready = Ready::EMPTY;
        if event.is_readable() {
            ready.insert(Ready::READABLE);
        }
        if event.is_writable() {
            ready.insert(Ready::WRITABLE);
        }
        if event.is_read_closed() || event.is_write_closed() {
            ready.insert(Ready::HUP);
        }
        if event.is_error() {
            ready.insert(Ready::ERROR);
        }
        ready
    }
}

impl BitOr for Ready {
    type Output = Ready;

    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

impl BitAnd for Ready {
    type Output = Ready;

    fn bitand(self, rhs: Ready) -> Ready {
        Ready(self.0 & rhs.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Ready::READABLE, "R"),
            (Ready::WRITABLE, "W"),
            (Ready::HUP, "H"),
            (Ready::ERROR, "E"),
        ];
        let mut out = String::with_capacity(4);
        for (ready, name) in names {
            out.push_str(if self.contains(ready) { name } else { "-" });
        }
        f.write_str(&out)
    }
}

/// What a socket wants versus what it got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub interest: Ready,
    pub event: Ready,
}

impl Readiness {
    pub fn new(interest: Ready) -> Self {
        Self {
            interest,
            event: Ready::EMPTY,
        }
    }

    /// Events the handler should act on now.
    pub fn filter_interest(&self) -> Ready {
        self.interest & self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn ready_set_operations() {
        let mut r = Ready::READABLE | Ready::HUP;
        assert!(r.contains(Ready::READABLE));
        assert!(!r.contains(Ready::WRITABLE));
        assert!(r.intersects(Ready::HUP | Ready::ERROR));
        r.remove(Ready::READABLE);
        assert_eq!(r, Ready::HUP);
        assert_eq!(format!("{:?}", r), "--H-");
    }

    #[test]
    fn interest_filters_events() {
        let mut readiness = Readiness::new(Ready::READABLE);
        readiness.event.insert(Ready::WRITABLE);
        assert!(readiness.filter_interest().is_empty());
        readiness.interest.insert(Ready::WRITABLE);
        assert_eq!(readiness.filter_interest(), Ready::WRITABLE);
    }
}

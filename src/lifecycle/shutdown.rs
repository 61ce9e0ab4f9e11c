//! Shutdown coordination for the proxy.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::{Registry, Token, Waker};

/// Handle that stops a running event loop from any thread.
///
/// Cloning is cheap; every clone controls the same loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    /// Create a handle whose waker is registered on `registry` under `token`.
    pub fn new(registry: &Registry, token: Token) -> io::Result<Self> {
        Ok(Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Waker::new(registry, token)?),
        })
    }

    /// Trigger the shutdown signal and wake the loop.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            tracing::warn!(error = %e, "Failed to wake event loop for shutdown");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use std::time::Duration;

    #[test]
    fn trigger_wakes_poll_from_another_thread() {
        let mut poll = Poll::new().unwrap();
        let shutdown = Shutdown::new(poll.registry(), Token(7)).unwrap();
        assert!(!shutdown.is_triggered());

        let remote = shutdown.clone();
        let handle = std::thread::spawn(move || remote.trigger());

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();

        assert!(events.iter().any(|e| e.token() == Token(7)));
        assert!(shutdown.is_triggered());
    }
}

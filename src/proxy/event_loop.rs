//! Single-threaded readiness loop.
//!
//! # Data Flow
//! ```text
//! poll(timeout = sweep interval)
//!     → LISTENER: accept until WouldBlock, register READABLE|WRITABLE
//!     → WAKER: shutdown check
//!     → handler token: merge readiness, queue the token
//! work queue (handlers and peers they woke) → run each handler
//! idle timeout or elapsed interval → pool sweep
//! ```

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Instant;

use mio::{Events, Interest, Poll, Token};

use crate::config::ProxyConfig;
use crate::lifecycle::Shutdown;
use crate::net::{Accepted, Listener, Ready};
use crate::observability::MetricsSnapshot;
use crate::proxy::client::ClientHandler;
use crate::proxy::pool::ConnectionManager;
use crate::proxy::session::{Arena, Core, Flow, Handler};
use crate::proxy::{ProxyContext, ProxyError};

pub const LISTENER: Token = Token(0);
pub const WAKER: Token = Token(1);
const FIRST_HANDLER_TOKEN: usize = 2;
const EVENTS_CAPACITY: usize = 1024;

pub struct Proxy {
    poll: Poll,
    events: Events,
    ready: Vec<(Token, Ready)>,
    listener: Listener,
    arena: Arena,
    pool: ConnectionManager,
    context: ProxyContext,
    work: VecDeque<Token>,
    shutdown: Shutdown,
    last_sweep: Instant,
}

impl Proxy {
    /// Bind the listener and set up the poller. Nothing runs until `run()`.
    pub fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        let context = ProxyContext::new(config)?;
        let poll = Poll::new()?;
        let mut listener = Listener::bind(&context.config.listener)?;
        poll.registry()
            .register(listener.source(), LISTENER, Interest::READABLE)?;
        let shutdown = Shutdown::new(poll.registry(), WAKER)?;
        let pool = ConnectionManager::new(context.config.pool.enabled, context.config.pool.ttl());

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            ready: Vec::with_capacity(EVENTS_CAPACITY),
            listener,
            arena: Arena::new(FIRST_HANDLER_TOKEN),
            pool,
            context,
            work: VecDeque::new(),
            shutdown,
            last_sweep: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops `run()` from another thread.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.context.metrics.snapshot()
    }

    pub fn pool(&self) -> &ConnectionManager {
        &self.pool
    }

    /// Run until the shutdown handle is triggered.
    pub fn run(&mut self) -> Result<(), ProxyError> {
        let interval = self.context.config.pool.sweep_interval();
        tracing::info!(
            address = %self.local_addr()?,
            sweep_interval_ms = interval.as_millis() as u64,
            "Proxy running"
        );

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.poll.poll(&mut self.events, Some(interval)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            if self.events.is_empty() {
                self.sweep();
                continue;
            }

            let mut ready = std::mem::take(&mut self.ready);
            ready.extend(
                self.events
                    .iter()
                    .map(|event| (event.token(), Ready::from_event(event))),
            );
            for (token, readiness) in ready.drain(..) {
                match token {
                    LISTENER => self.accept(),
                    WAKER => {}
                    token => {
                        if let Some(handler) = self.arena.get_mut(token) {
                            handler.readiness_mut().event.insert(readiness);
                            self.work.push_back(token);
                        }
                    }
                }
            }
            self.ready = ready;

            while let Some(token) = self.work.pop_front() {
                self.drive(token);
            }

            if self.last_sweep.elapsed() >= interval {
                self.sweep();
            }
        }

        self.close_all();
        tracing::info!("Proxy stopped");
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            let (mut stream, addr) = match self.listener.accept(self.arena.clients()) {
                Ok(Accepted::Stream(stream, addr)) => (stream, addr),
                Ok(Accepted::Rejected(_)) => continue,
                Ok(Accepted::Drained) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    return;
                }
            };
            let token = self.arena.next_token();
            if let Err(e) = self.poll.registry().register(
                &mut stream,
                token,
                Interest::READABLE | Interest::WRITABLE,
            ) {
                tracing::warn!(peer_addr = %addr, error = %e, "Failed to register client");
                continue;
            }
            let client = ClientHandler::new(token, stream, addr, &self.context);
            tracing::debug!(
                connection_id = %client.id(),
                peer_addr = %addr,
                "Client connected"
            );
            self.context.metrics.client_accepted();
            self.arena.insert(token, Handler::Client(client));
        }
    }

    fn drive(&mut self, token: Token) {
        let Some(mut handler) = self.arena.take(token) else {
            return;
        };
        let flow = {
            let mut core = Core {
                registry: self.poll.registry(),
                arena: &mut self.arena,
                pool: &mut self.pool,
                context: &mut self.context,
                work: &mut self.work,
            };
            handler.run(&mut core)
        };
        match flow {
            Flow::Keep => self.arena.restore(token, handler),
            Flow::Close => self.arena.discard(handler, self.poll.registry()),
        }
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        let expired = self.pool.sweep(now);
        if !expired.is_empty() {
            tracing::debug!(evicted = expired.len(), "Pool sweep");
        }
        for token in expired {
            if let Some(handler) = self.arena.remove(token) {
                handler.close(self.poll.registry());
            }
        }
        self.last_sweep = now;
    }

    fn close_all(&mut self) {
        let registry = self.poll.registry();
        let handlers: Vec<Handler> = self.arena.drain().collect();
        let count = handlers.len();
        for handler in handlers {
            handler.close(registry);
        }
        tracing::debug!(closed = count, "Closed all connections");
    }
}

//! Handler arena shared by the event loop and the handlers.
//!
//! A handler being driven is taken out of the arena, so it can borrow its
//! peer mutably through `Core::arena`. Tokens are never reused: a stale peer
//! token simply misses.

use std::collections::{HashMap, VecDeque};

use mio::{Registry, Token};

use crate::net::Readiness;
use crate::proxy::client::ClientHandler;
use crate::proxy::pool::ConnectionManager;
use crate::proxy::server::ServerHandler;
use crate::proxy::ProxyContext;

/// What the driver does with a handler after running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Keep,
    Close,
}

/// Result of one pass over a handler's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Progress,
    Idle,
    Close,
}

#[derive(Debug)]
pub enum Handler {
    Client(ClientHandler),
    Server(ServerHandler),
}

impl Handler {
    pub fn readiness_mut(&mut self) -> &mut Readiness {
        match self {
            Handler::Client(c) => &mut c.readiness,
            Handler::Server(s) => &mut s.readiness,
        }
    }

    pub(crate) fn run(&mut self, core: &mut Core<'_>) -> Flow {
        match self {
            Handler::Client(c) => c.run(core),
            Handler::Server(s) => s.run(core),
        }
    }

    /// Deregister and drop the socket.
    pub fn close(self, registry: &Registry) {
        match self {
            Handler::Client(c) => c.close(registry),
            Handler::Server(s) => s.close(registry),
        }
    }
}

/// Handlers by token.
#[derive(Debug)]
pub struct Arena {
    handlers: HashMap<Token, Handler>,
    next: usize,
    clients: usize,
}

impl Arena {
    /// Tokens below `first` are reserved for the listener and the waker.
    pub fn new(first: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            next: first,
            clients: 0,
        }
    }

    pub fn next_token(&mut self) -> Token {
        let token = Token(self.next);
        self.next += 1;
        token
    }

    pub fn insert(&mut self, token: Token, handler: Handler) {
        if matches!(handler, Handler::Client(_)) {
            self.clients += 1;
        }
        self.handlers.insert(token, handler);
    }

    /// Remove for good.
    pub fn remove(&mut self, token: Token) -> Option<Handler> {
        let handler = self.handlers.remove(&token)?;
        if matches!(handler, Handler::Client(_)) {
            self.clients -= 1;
        }
        Some(handler)
    }

    /// Remove while the handler is driven; pair with `restore` or `discard`.
    pub fn take(&mut self, token: Token) -> Option<Handler> {
        self.handlers.remove(&token)
    }

    pub fn restore(&mut self, token: Token, handler: Handler) {
        self.handlers.insert(token, handler);
    }

    /// Close a handler obtained through `take`.
    pub fn discard(&mut self, handler: Handler, registry: &Registry) {
        if matches!(handler, Handler::Client(_)) {
            self.clients -= 1;
        }
        handler.close(registry);
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Handler> {
        self.handlers.get_mut(&token)
    }

    pub fn client_mut(&mut self, token: Token) -> Option<&mut ClientHandler> {
        match self.handlers.get_mut(&token) {
            Some(Handler::Client(c)) => Some(c),
            _ => None,
        }
    }

    pub fn server_mut(&mut self, token: Token) -> Option<&mut ServerHandler> {
        match self.handlers.get_mut(&token) {
            Some(Handler::Server(s)) => Some(s),
            _ => None,
        }
    }

    /// Open client connections, including one currently taken out.
    pub fn clients(&self) -> usize {
        self.clients
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Handler> + '_ {
        self.clients = 0;
        self.handlers.drain().map(|(_, handler)| handler)
    }
}

/// Everything a handler may touch besides itself.
pub(crate) struct Core<'a> {
    pub registry: &'a Registry,
    pub arena: &'a mut Arena,
    pub pool: &'a mut ConnectionManager,
    pub context: &'a mut ProxyContext,
    pub work: &'a mut VecDeque<Token>,
}

impl Core<'_> {
    /// Run `token` again in this loop iteration.
    pub fn wake(&mut self, token: Token) {
        self.work.push_back(token);
    }

    /// Close another handler right away.
    pub fn close(&mut self, token: Token) {
        self.pool.remove(token);
        if let Some(handler) = self.arena.remove(token) {
            handler.close(self.registry);
        }
    }
}

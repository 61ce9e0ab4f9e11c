//! Upstream (proxy → origin) handler.
//!
//! # States
//! ```text
//! Connecting → SendingRequest → LastWrite → ReadResponse → Idle (pooled)
//!                                                        ↘ closed
//! ```
//! - `SendingRequest`: writes the client's processed buffer while the client
//!   keeps producing request bytes; once the request head is out, an early
//!   origin answer (`100 Continue`, or a final error) is read right away
//! - `LastWrite`: the client finished the request; flush what is left, then
//!   switch to reading
//! - `ReadResponse`: parse origin bytes straight into the client's write
//!   buffer; interim 1xx responses are relayed and reading goes on; on
//!   completion pool or close, and hand the client its last write
//! - `Idle`: pooled, no peer; any readiness evicts it
//!
//! # Failure handling
//! Nothing forwarded to the client yet → the client answers 502.
//! Response already partly forwarded → the client is torn down.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::http::ResponseParser;
use crate::net::{Buffer, ConnectionId, Ready, Readiness};
use crate::proxy::client::ClientHandler;
use crate::proxy::session::{Core, Flow, Handler, Step};
use crate::proxy::ProxyContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Connecting,
    SendingRequest,
    LastWrite,
    ReadResponse,
    Idle,
    Error,
}

#[derive(Debug)]
pub struct ServerHandler {
    pub(crate) id: ConnectionId,
    pub(crate) token: Token,
    socket: TcpStream,
    addr: SocketAddr,
    pub(crate) readiness: Readiness,
    pub(crate) state: ServerState,
    pub(crate) peer: Option<Token>,
    read_buf: Buffer,
    parser: ResponseParser,
    /// Origin closed its side.
    eof: bool,
    /// Some byte of the current response reached the client's write buffer.
    forwarded: bool,
    /// The response parser is armed for the current request.
    response_started: bool,
    status_counted: bool,
    requests: u64,
}

impl ServerHandler {
    fn new(
        token: Token,
        socket: TcpStream,
        addr: SocketAddr,
        client: Token,
        context: &ProxyContext,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            token,
            socket,
            addr,
            readiness: Readiness::new(Ready::WRITABLE | Ready::HUP | Ready::ERROR),
            state: ServerState::Connecting,
            peer: Some(client),
            read_buf: Buffer::with_capacity(context.config.buffers.read_size),
            parser: ResponseParser::new(&context.limits),
            eof: false,
            forwarded: false,
            response_started: false,
            status_counted: false,
            requests: 0,
        }
    }

    /// Start a non-blocking connect to `addr` on behalf of `client`.
    pub(crate) fn open(core: &mut Core<'_>, addr: SocketAddr, client: Token) -> io::Result<Token> {
        let mut socket = TcpStream::connect(addr)?;
        let token = core.arena.next_token();
        core.registry
            .register(&mut socket, token, Interest::READABLE | Interest::WRITABLE)?;
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let server = ServerHandler::new(token, socket, addr, client, core.context);
        tracing::debug!(
            connection_id = %server.id,
            upstream = %addr,
            "Connecting to upstream"
        );
        core.context.metrics.upstream_opened();
        core.arena.insert(token, Handler::Server(server));
        Ok(token)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// A pooled connection is alive while it has nothing to read.
    pub fn is_alive(&self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.socket.peek(&mut byte), Err(e) if e.kind() == ErrorKind::WouldBlock)
    }

    /// Take a pooled connection for a new client.
    pub(crate) fn attach(&mut self, client: Token) {
        self.peer = Some(client);
        self.state = ServerState::SendingRequest;
        self.readiness.interest = Ready::WRITABLE | Ready::READABLE | Ready::HUP | Ready::ERROR;
        // a pooled socket has drained its writes; assume it can take more
        self.readiness.event.insert(Ready::WRITABLE);
    }

    /// The client finished producing the request.
    pub(crate) fn request_finished(&mut self) {
        if self.state == ServerState::SendingRequest {
            self.state = ServerState::LastWrite;
        }
    }

    pub(crate) fn close(mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.socket) {
            tracing::trace!(connection_id = %self.id, error = %e, "Deregister failed");
        }
        tracing::debug!(
            connection_id = %self.id,
            upstream = %self.addr,
            requests = self.requests,
            "Upstream connection closed"
        );
    }

    pub(crate) fn run(&mut self, core: &mut Core<'_>) -> Flow {
        loop {
            let step = match self.state {
                ServerState::Idle => self.idle(),
                ServerState::Error => Step::Close,
                _ if !self.has_client(core) => {
                    tracing::debug!(connection_id = %self.id, "Client gone, closing upstream");
                    Step::Close
                }
                ServerState::Connecting => self.check_connect(core),
                ServerState::SendingRequest | ServerState::LastWrite => self.send(core),
                ServerState::ReadResponse => self.receive(core),
            };
            match step {
                Step::Progress => continue,
                Step::Idle => return Flow::Keep,
                Step::Close => {
                    self.state = ServerState::Error;
                    core.pool.remove(self.token);
                    return Flow::Close;
                }
            }
        }
    }

    fn has_client(&self, core: &mut Core<'_>) -> bool {
        self.peer.is_some_and(|peer| core.arena.client_mut(peer).is_some())
    }

    fn idle(&mut self) -> Step {
        if self
            .readiness
            .filter_interest()
            .intersects(Ready::READABLE | Ready::HUP | Ready::ERROR)
        {
            tracing::debug!(
                connection_id = %self.id,
                upstream = %self.addr,
                "Pooled upstream connection became readable, evicting"
            );
            return Step::Close;
        }
        Step::Idle
    }

    fn check_connect(&mut self, core: &mut Core<'_>) -> Step {
        if !self
            .readiness
            .event
            .intersects(Ready::WRITABLE | Ready::HUP | Ready::ERROR)
        {
            return Step::Idle;
        }
        match self.socket.take_error() {
            Ok(Some(e)) | Err(e) => return self.fail(core, &e),
            Ok(None) => {}
        }
        match self.socket.peer_addr() {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected => {
                self.readiness.event.remove(Ready::WRITABLE);
                return Step::Idle;
            }
            Err(e) => return self.fail(core, &e),
        }

        tracing::debug!(
            connection_id = %self.id,
            upstream = %self.addr,
            "Upstream connected"
        );
        self.state = ServerState::SendingRequest;
        self.readiness.interest = Ready::WRITABLE | Ready::READABLE | Ready::HUP | Ready::ERROR;
        if let Some(client) = self.peer.and_then(|peer| core.arena.client_mut(peer)) {
            if client.upstream_connected() {
                self.state = ServerState::LastWrite;
            }
        }
        Step::Progress
    }

    fn send(&mut self, core: &mut Core<'_>) -> Step {
        if self.readiness.filter_interest().contains(Ready::ERROR) {
            let e = self.socket_error();
            return self.fail(core, &e);
        }
        let Some(peer) = self.peer else {
            return Step::Close;
        };
        let Some(client) = core.arena.client_mut(peer) else {
            return Step::Close;
        };

        if !client.processed.is_empty() {
            if !self.readiness.filter_interest().contains(Ready::WRITABLE) {
                return Step::Idle;
            }
            return match client.processed.write_to(&mut self.socket) {
                Ok(0) => {
                    let e = io::Error::from(ErrorKind::WriteZero);
                    self.fail(core, &e)
                }
                Ok(n) => {
                    tracing::trace!(connection_id = %self.id, bytes = n, "Request bytes sent");
                    core.context.metrics.bytes_written(n);
                    core.wake(peer);
                    Step::Progress
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.readiness.event.remove(Ready::WRITABLE);
                    Step::Idle
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => Step::Progress,
                Err(e) => self.fail(core, &e),
            };
        }

        if self.state != ServerState::LastWrite {
            if !self.response_started {
                let answered = self
                    .readiness
                    .event
                    .intersects(Ready::READABLE | Ready::HUP);
                if !(answered && client.request_head_finished()) {
                    return Step::Idle;
                }
                self.start_response(client);
                tracing::debug!(connection_id = %self.id, "Origin answering before the request body is complete");
            }
            return self.receive(core);
        }

        if !self.response_started {
            self.start_response(client);
        }
        client.request_sent();
        self.state = ServerState::ReadResponse;
        self.readiness.interest = Ready::READABLE | Ready::HUP | Ready::ERROR;
        self.response_started = false;
        self.requests += 1;
        tracing::debug!(connection_id = %self.id, "Request sent, reading response");
        Step::Progress
    }

    fn start_response(&mut self, client: &ClientHandler) {
        self.parser
            .prepare(client.request_method(), client.wants_keep_alive());
        self.response_started = true;
        self.forwarded = false;
        self.status_counted = false;
    }

    fn receive(&mut self, core: &mut Core<'_>) -> Step {
        let Some(peer) = self.peer else {
            return Step::Close;
        };

        if !self.read_buf.is_empty() || self.eof {
            let Some(client) = core.arena.client_mut(peer) else {
                return Step::Close;
            };
            client.write_buf.shift();
            let consumed_before = self.read_buf.available_data();
            let written_before = client.write_buf.available_data();
            let result = self.parser.parse(&mut self.read_buf, &mut client.write_buf);
            let written = client.write_buf.available_data() > written_before;
            let moved = written || self.read_buf.available_data() != consumed_before;

            if written {
                self.forwarded = true;
                client.response_bytes_ready();
                core.work.push_back(peer);
            }
            if !self.status_counted && self.parser.headers_finished() {
                if let Some(status) = self.parser.status() {
                    core.context.metrics.response(status);
                    tracing::debug!(
                        connection_id = %self.id,
                        status = status,
                        body = ?self.parser.body_kind(),
                        "Response headers parsed"
                    );
                }
                self.status_counted = true;
            }

            match result {
                Err(e) => {
                    tracing::warn!(
                        connection_id = %self.id,
                        upstream = %self.addr,
                        error = %e,
                        "Invalid upstream response"
                    );
                    let e = io::Error::new(ErrorKind::InvalidData, e);
                    return self.fail(core, &e);
                }
                Ok(true) if self.parser.is_interim() => {
                    tracing::debug!(
                        connection_id = %self.id,
                        status = ?self.parser.status(),
                        "Interim response forwarded"
                    );
                    self.parser.next_response();
                    self.status_counted = false;
                    return Step::Progress;
                }
                Ok(true) => return self.complete(core),
                Ok(false) => {}
            }

            if self.eof && self.read_buf.is_empty() {
                let e = io::Error::from(ErrorKind::UnexpectedEof);
                return self.fail(core, &e);
            }
            if moved {
                return Step::Progress;
            }
        }

        if self.eof
            || self.read_buf.available_data() == self.read_buf.capacity()
            || !self
                .readiness
                .filter_interest()
                .intersects(Ready::READABLE | Ready::HUP | Ready::ERROR)
        {
            return Step::Idle;
        }

        match self.read_buf.read_from(&mut self.socket) {
            Ok(0) => {
                tracing::debug!(connection_id = %self.id, "Upstream closed its side");
                self.eof = true;
                self.parser.mark_eof();
                Step::Progress
            }
            Ok(n) => {
                tracing::trace!(connection_id = %self.id, bytes = n, "Response bytes read");
                core.context.metrics.bytes_read(n);
                Step::Progress
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.readiness
                    .event
                    .remove(Ready::READABLE | Ready::HUP | Ready::ERROR);
                Step::Idle
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Step::Progress,
            Err(e) => self.fail(core, &e),
        }
    }

    /// Response finished: release the client and pool or close.
    fn complete(&mut self, core: &mut Core<'_>) -> Step {
        let close_delimited = self.parser.is_close_delimited();
        let reusable = core.pool.is_enabled()
            && self.state == ServerState::ReadResponse
            && self.parser.keep_alive()
            && !close_delimited
            && !self.eof
            && self.read_buf.is_empty();

        if let Some(peer) = self.peer.take() {
            if let Some(client) = core.arena.client_mut(peer) {
                client.response_finished(close_delimited);
            }
            core.wake(peer);
        }
        tracing::debug!(
            connection_id = %self.id,
            status = ?self.parser.status(),
            reusable = reusable,
            "Response complete"
        );

        if !reusable {
            return Step::Close;
        }
        self.state = ServerState::Idle;
        self.parser.reset();
        self.readiness.interest = Ready::READABLE | Ready::HUP | Ready::ERROR;
        self.readiness
            .event
            .remove(Ready::READABLE | Ready::HUP | Ready::ERROR);
        core.pool.store(self.addr, self.token, Instant::now());
        Step::Idle
    }

    fn socket_error(&self) -> io::Error {
        match self.socket.take_error() {
            Ok(Some(e)) | Err(e) => e,
            Ok(None) => io::Error::from(ErrorKind::ConnectionReset),
        }
    }

    /// Transport failure: 502 when nothing reached the client yet, otherwise
    /// the client connection goes down too.
    fn fail(&mut self, core: &mut Core<'_>, error: &io::Error) -> Step {
        tracing::warn!(
            connection_id = %self.id,
            upstream = %self.addr,
            state = ?self.state,
            error = %error,
            "Upstream failure"
        );
        if let Some(peer) = self.peer.take() {
            if let Some(client) = core.arena.client_mut(peer) {
                if self.forwarded {
                    client.upstream_broken();
                } else {
                    client.bad_gateway(&mut core.context.metrics);
                }
            }
            core.wake(peer);
        }
        Step::Close
    }
}

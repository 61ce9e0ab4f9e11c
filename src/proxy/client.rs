//! Client (browser → proxy) handler.
//!
//! # States
//! ```text
//! NotConnected ─host known─▶ Connecting ─upstream up─▶ Connected
//!      │                         │ request parsed          │ request parsed
//!      │                         ▼                         ▼
//!      │          RequestProcessedConnecting ─▶ RequestProcessed ─flushed─▶ RequestSent
//!      │                                                                      │
//!      └─ canned answer ─▶ LastWriteClose ◀──── response finished ────────────┤
//!                          LastWriteKeep  ◀───────────────────────────────────┘
//! ```
//! `LastWriteKeep` returns to `NotConnected` once the response is flushed;
//! pipelined bytes already buffered are parsed right away.
//!
//! # Buffers
//! - `read_buf`: raw request bytes from the socket
//! - `processed`: rewritten request bytes, drained by the upstream handler
//! - `write_buf`: response bytes (or a canned answer) for the client

use std::io::ErrorKind;
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Registry, Token};

use crate::http::answers::Answer;
use crate::http::{HeaderPolicy, Method, RequestParser};
use crate::net::{Buffer, ConnectionId, Ready, Readiness};
use crate::observability::ProxyMetrics;
use crate::proxy::pool::{self, Upstream};
use crate::proxy::session::{Core, Flow, Step};
use crate::proxy::{resolve_upstream, ProxyContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotConnected,
    Connecting,
    Connected,
    RequestProcessed,
    RequestProcessedConnecting,
    RequestSent,
    Error,
    LastWriteClose,
    LastWriteKeep,
}

#[derive(Debug)]
pub struct ClientHandler {
    pub(crate) id: ConnectionId,
    pub(crate) token: Token,
    socket: TcpStream,
    addr: SocketAddr,
    pub(crate) readiness: Readiness,
    pub(crate) state: ClientState,
    pub(crate) peer: Option<Token>,
    read_buf: Buffer,
    pub(crate) processed: Buffer,
    pub(crate) write_buf: Buffer,
    parser: RequestParser,
    keep_alive: bool,
    /// Client closed its sending side.
    eof: bool,
    method_counted: bool,
    requests: u64,
}

impl ClientHandler {
    pub fn new(token: Token, socket: TcpStream, addr: SocketAddr, context: &ProxyContext) -> Self {
        let buffers = &context.config.buffers;
        let mut client = Self {
            id: ConnectionId::new(),
            token,
            socket,
            addr,
            readiness: Readiness::new(Ready::EMPTY),
            state: ClientState::NotConnected,
            peer: None,
            read_buf: Buffer::with_capacity(buffers.read_size),
            processed: Buffer::with_capacity(buffers.processed_size),
            write_buf: Buffer::with_capacity(buffers.write_size),
            parser: RequestParser::new(
                &context.limits,
                HeaderPolicy::for_request(context.config.pool.upstream_keep_alive),
            ),
            keep_alive: false,
            eof: false,
            method_counted: false,
            requests: 0,
        };
        client.update_interest();
        client
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub(crate) fn request_method(&self) -> Option<Method> {
        self.parser.method()
    }

    /// The client connection can stay open after this response.
    pub(crate) fn wants_keep_alive(&self) -> bool {
        !self.eof && self.parser.wants_keep_alive()
    }

    pub(crate) fn request_head_finished(&self) -> bool {
        self.parser.headers_finished()
    }

    pub(crate) fn close(mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.socket) {
            tracing::trace!(connection_id = %self.id, error = %e, "Deregister failed");
        }
        tracing::debug!(
            connection_id = %self.id,
            peer_addr = %self.addr,
            requests = self.requests,
            "Client connection closed"
        );
    }

    pub(crate) fn run(&mut self, core: &mut Core<'_>) -> Flow {
        if self.readiness.filter_interest().contains(Ready::ERROR) {
            tracing::debug!(connection_id = %self.id, "Client socket error");
            self.state = ClientState::Error;
        }
        loop {
            let step = self.step(core);
            self.update_interest();
            match step {
                Step::Progress => continue,
                Step::Idle => return Flow::Keep,
                Step::Close => {
                    if let Some(peer) = self.peer.take() {
                        core.close(peer);
                    }
                    return Flow::Close;
                }
            }
        }
    }

    fn step(&mut self, core: &mut Core<'_>) -> Step {
        if self.state == ClientState::Error {
            return Step::Close;
        }

        if !self.write_buf.is_empty() && self.readiness.filter_interest().contains(Ready::WRITABLE)
        {
            return self.write(core);
        }

        if self.write_buf.is_empty() {
            match self.state {
                ClientState::LastWriteClose => return Step::Close,
                ClientState::LastWriteKeep => {
                    self.next_request();
                    return Step::Progress;
                }
                _ => {}
            }
        }

        if self.is_parsing() && (!self.read_buf.is_empty() || self.parser.is_started()) {
            let step = self.parse(core);
            if step != Step::Idle {
                return step;
            }
        }

        // parser stalled on input that will never come
        if self.eof
            && self.is_parsing()
            && self.read_buf.is_empty()
            && !self.processed.is_full()
        {
            return self.truncated(core);
        }

        if self.wants_read()
            && self
                .readiness
                .filter_interest()
                .intersects(Ready::READABLE | Ready::HUP)
        {
            return self.read(core);
        }

        Step::Idle
    }

    /// Interest follows buffers and state; events are only cleared on `WouldBlock`.
    fn update_interest(&mut self) {
        let mut interest = Ready::ERROR;
        if self.wants_read() {
            interest.insert(Ready::READABLE | Ready::HUP);
        }
        if !self.write_buf.is_empty() {
            interest.insert(Ready::WRITABLE);
        }
        self.readiness.interest = interest;
    }

    fn is_parsing(&self) -> bool {
        matches!(
            self.state,
            ClientState::NotConnected | ClientState::Connecting | ClientState::Connected
        )
    }

    fn wants_read(&self) -> bool {
        !self.eof
            && !matches!(
                self.state,
                ClientState::Error | ClientState::LastWriteClose
            )
            && self.read_buf.available_data() < self.read_buf.capacity()
    }

    fn read(&mut self, core: &mut Core<'_>) -> Step {
        match self.read_buf.read_from(&mut self.socket) {
            Ok(0) => self.on_eof(),
            Ok(n) => {
                tracing::trace!(connection_id = %self.id, bytes = n, "Request bytes read");
                core.context.metrics.bytes_read(n);
                Step::Progress
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.readiness.event.remove(Ready::READABLE | Ready::HUP);
                Step::Idle
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Step::Progress,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Client read failed");
                Step::Close
            }
        }
    }

    /// Half-close: bytes already buffered are still parsed and forwarded.
    fn on_eof(&mut self) -> Step {
        tracing::trace!(connection_id = %self.id, state = ?self.state, "Client closed its side");
        self.eof = true;
        self.keep_alive = false;
        if self.state == ClientState::LastWriteKeep {
            self.state = ClientState::LastWriteClose;
        }
        Step::Progress
    }

    /// The client closed before the current request was complete.
    fn truncated(&mut self, core: &mut Core<'_>) -> Step {
        if !self.parser.is_started() {
            return Step::Close;
        }
        if !self.parser.headers_finished() {
            tracing::warn!(connection_id = %self.id, "Client closed inside the request head");
            self.answer(core, Answer::BadRequest);
            return Step::Progress;
        }
        tracing::debug!(
            connection_id = %self.id,
            state = ?self.state,
            "Client closed in the middle of a request body"
        );
        Step::Close
    }

    fn write(&mut self, core: &mut Core<'_>) -> Step {
        match self.write_buf.write_to(&mut self.socket) {
            Ok(0) => Step::Close,
            Ok(n) => {
                tracing::trace!(connection_id = %self.id, bytes = n, "Response bytes written");
                core.context.metrics.bytes_written(n);
                if let Some(peer) = self.peer {
                    core.wake(peer);
                }
                Step::Progress
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.readiness.event.remove(Ready::WRITABLE);
                Step::Idle
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Step::Progress,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Client write failed");
                Step::Close
            }
        }
    }

    fn parse(&mut self, core: &mut Core<'_>) -> Step {
        self.processed.shift();
        let read_before = self.read_buf.available_data();
        let processed_before = self.processed.available_data();
        let result = self.parser.parse(&mut self.read_buf, &mut self.processed);
        let produced = self.processed.available_data() > processed_before;
        let moved = produced || self.read_buf.available_data() != read_before;

        let finished = match result {
            Ok(finished) => finished,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id,
                    error = %e,
                    status = e.status(),
                    "Rejecting request"
                );
                self.answer(core, Answer::from(&e));
                return Step::Progress;
            }
        };

        if !self.method_counted && self.parser.headers_finished() {
            if let Some(method) = self.parser.method() {
                core.context.metrics.request(method);
            }
            self.method_counted = true;
        }

        if self.state == ClientState::NotConnected {
            match self.parser.host().map(str::to_string) {
                Some(host) => {
                    self.route(core, &host);
                    if self.state == ClientState::LastWriteClose {
                        return Step::Progress;
                    }
                }
                None if self.parser.headers_finished() => {
                    tracing::warn!(connection_id = %self.id, "Request without host");
                    self.answer(core, Answer::BadRequest);
                    return Step::Progress;
                }
                None if self.processed.is_full()
                    || self.read_buf.available_data() == self.read_buf.capacity() =>
                {
                    tracing::warn!(
                        connection_id = %self.id,
                        "Buffer full before the target host was known"
                    );
                    self.answer(core, Answer::HeaderFieldsTooLarge);
                    return Step::Progress;
                }
                None => {}
            }
        } else if produced {
            if let Some(peer) = self.peer {
                core.wake(peer);
            }
        }

        if finished {
            self.request_done(core);
            return Step::Progress;
        }
        if moved {
            Step::Progress
        } else {
            Step::Idle
        }
    }

    /// Pick an upstream for `host`; 502 when it cannot be reached.
    fn route(&mut self, core: &mut Core<'_>, host: &str) {
        let addr = match resolve_upstream(host) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, host = %host, error = %e, "Cannot resolve upstream");
                self.answer(core, Answer::BadGateway);
                return;
            }
        };
        match pool::connect(core, addr, self.token) {
            Ok(Upstream::Reused(token)) => {
                self.peer = Some(token);
                self.state = ClientState::Connected;
            }
            Ok(Upstream::Opened(token)) => {
                self.peer = Some(token);
                self.state = ClientState::Connecting;
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.id, upstream = %addr, error = %e, "Cannot connect upstream");
                self.answer(core, Answer::BadGateway);
                return;
            }
        }
        tracing::debug!(
            connection_id = %self.id,
            host = %host,
            upstream = %addr,
            state = ?self.state,
            "Request routed"
        );
    }

    fn request_done(&mut self, core: &mut Core<'_>) {
        self.keep_alive = self.wants_keep_alive();
        self.requests += 1;
        self.state = match self.state {
            ClientState::Connecting => ClientState::RequestProcessedConnecting,
            _ => ClientState::RequestProcessed,
        };
        tracing::debug!(
            connection_id = %self.id,
            method = ?self.parser.method(),
            keep_alive = self.keep_alive,
            "Request parsed"
        );
        if let Some(peer) = self.peer {
            if let Some(server) = core.arena.server_mut(peer) {
                server.request_finished();
            }
            core.wake(peer);
        }
    }

    /// Replace whatever is pending with a canned answer and close afterwards.
    fn answer(&mut self, core: &mut Core<'_>, answer: Answer) {
        if let Some(peer) = self.peer.take() {
            core.close(peer);
        }
        self.send_answer(answer, &mut core.context.metrics);
    }

    fn send_answer(&mut self, answer: Answer, metrics: &mut ProxyMetrics) {
        self.write_buf.clear();
        self.write_buf.write_slice(answer.as_bytes());
        metrics.response(answer.status());
        self.keep_alive = false;
        self.state = ClientState::LastWriteClose;
        self.update_interest();
    }

    fn next_request(&mut self) {
        self.parser.reset();
        self.processed.clear();
        self.state = ClientState::NotConnected;
        self.keep_alive = false;
        self.method_counted = false;
        tracing::trace!(connection_id = %self.id, "Waiting for next request");
    }

    /// Upstream socket is connected. Returns true when the whole request was
    /// already parsed, so the upstream can go straight to its last write.
    pub(crate) fn upstream_connected(&mut self) -> bool {
        match self.state {
            ClientState::Connecting => {
                self.state = ClientState::Connected;
                false
            }
            ClientState::RequestProcessedConnecting => {
                self.state = ClientState::RequestProcessed;
                true
            }
            _ => false,
        }
    }

    /// The upstream flushed the whole request.
    pub(crate) fn request_sent(&mut self) {
        if self.state == ClientState::RequestProcessed {
            self.state = ClientState::RequestSent;
        }
    }

    pub(crate) fn response_bytes_ready(&mut self) {
        self.update_interest();
    }

    pub(crate) fn response_finished(&mut self, close_delimited: bool) {
        self.peer = None;
        self.state = if self.keep_alive && !close_delimited && !self.eof {
            ClientState::LastWriteKeep
        } else {
            ClientState::LastWriteClose
        };
        self.update_interest();
    }

    /// Upstream failed before any response byte was forwarded.
    pub(crate) fn bad_gateway(&mut self, metrics: &mut ProxyMetrics) {
        self.peer = None;
        self.send_answer(Answer::BadGateway, metrics);
    }

    /// Upstream failed mid-response; nothing sensible can follow.
    pub(crate) fn upstream_broken(&mut self) {
        self.peer = None;
        self.state = ClientState::Error;
    }
}

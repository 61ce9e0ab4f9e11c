//! Streaming header section parser.
//!
//! # States (per header line)
//! ```text
//! LineStart -token-> Name -:-> RelevantSpace -> RelevantContent -CR-> EndLineCr -LF-> LineStart
//!                          \-> Space         -> Content         -CR-/
//! LineStart -CR-> SectionEndCr -LF-> EndOk
//! ```
//!
//! # Policies
//! - `remove`: the whole line is suppressed from the output (still validated)
//! - `capture`: the value is kept for later decisions (bounded, 431 when exceeded)
//! - `inject`: lines written once, before any input line, as output space allows
//!
//! A header is "relevant" when it is removed or captured. Names are lower-cased
//! while buffered and forwarded lower-cased; values are forwarded unmodified.
//! A full output buffer is not an error: the parser returns `Ok(false)` with
//! the unconsumed input left in place and resumes exactly where it stopped.

use std::collections::HashMap;
use std::fmt;

use crate::http::chars;
use crate::http::error::ParseError;
use crate::http::Pending;
use crate::net::Buffer;

/// The closed set of header names the proxy understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    Host,
    Connection,
    ContentLength,
    TransferEncoding,
    UserAgent,
    ProxyConnection,
    ContentType,
    AcceptEncoding,
    Server,
    Referer,
    ContentEncoding,
}

impl Header {
    /// Canonical spelling, used for injected lines.
    pub fn name(&self) -> &'static str {
        match self {
            Header::Host => "Host",
            Header::Connection => "Connection",
            Header::ContentLength => "Content-Length",
            Header::TransferEncoding => "Transfer-Encoding",
            Header::UserAgent => "User-Agent",
            Header::ProxyConnection => "Proxy-Connection",
            Header::ContentType => "Content-Type",
            Header::AcceptEncoding => "Accept-Encoding",
            Header::Server => "Server",
            Header::Referer => "Referer",
            Header::ContentEncoding => "Content-Encoding",
        }
    }

    /// Look up an already lower-cased name.
    pub fn from_lowercase(name: &[u8]) -> Option<Header> {
        Some(match name {
            b"host" => Header::Host,
            b"connection" => Header::Connection,
            b"content-length" => Header::ContentLength,
            b"transfer-encoding" => Header::TransferEncoding,
            b"user-agent" => Header::UserAgent,
            b"proxy-connection" => Header::ProxyConnection,
            b"content-type" => Header::ContentType,
            b"accept-encoding" => Header::AcceptEncoding,
            b"server" => Header::Server,
            b"referer" => Header::Referer,
            b"content-encoding" => Header::ContentEncoding,
            _ => return None,
        })
    }

    /// Headers that may appear only once with a single value.
    fn is_singleton(&self) -> bool {
        matches!(self, Header::Host | Header::ContentLength)
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Captured header values.
pub type HeaderMap = HashMap<Header, String>;

/// A set of headers stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderSet(u16);

impl HeaderSet {
    pub fn of(headers: &[Header]) -> Self {
        let mut set = Self::default();
        for header in headers {
            set.0 |= header.bit();
        }
        set
    }

    pub fn contains(&self, header: Header) -> bool {
        self.0 & header.bit() != 0
    }
}

/// Per-direction rewrite rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPolicy {
    pub remove: HeaderSet,
    pub capture: HeaderSet,
    pub inject: Vec<(Header, String)>,
}

impl HeaderPolicy {
    /// Client → origin: hop-by-hop connection headers are replaced by a single
    /// synthesized `Connection` line.
    pub fn for_request(upstream_keep_alive: bool) -> Self {
        Self {
            remove: HeaderSet::of(&[Header::ProxyConnection, Header::Connection]),
            capture: HeaderSet::of(&[
                Header::Host,
                Header::ContentLength,
                Header::TransferEncoding,
                Header::Connection,
                Header::ProxyConnection,
            ]),
            inject: vec![(Header::Connection, connection_value(upstream_keep_alive))],
        }
    }

    /// Origin → client: the origin's connection headers are captured for the
    /// pooling decision and replaced by what the client connection will do.
    pub fn for_response(client_keep_alive: bool) -> Self {
        Self {
            remove: HeaderSet::of(&[Header::Connection, Header::ProxyConnection]),
            capture: HeaderSet::of(&[
                Header::ContentLength,
                Header::TransferEncoding,
                Header::Connection,
            ]),
            inject: vec![(Header::Connection, connection_value(client_keep_alive))],
        }
    }

    fn is_relevant(&self, header: Header) -> bool {
        self.remove.contains(header) || self.capture.contains(header)
    }
}

fn connection_value(keep_alive: bool) -> String {
    if keep_alive { "keep-alive" } else { "close" }.to_string()
}

/// True when a comma-separated header value lists `token` (case-insensitive).
/// Separators around an element (whitespace, quotes) are ignored.
pub fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| {
        t.trim_matches(|c: char| c.is_ascii() && chars::is_separator(c as u8))
            .eq_ignore_ascii_case(token)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    LineStart,
    Name,
    RelevantSpace,
    RelevantContent,
    Space,
    Content,
    EndLineCr,
    SectionEndCr,
    EndOk,
}

#[derive(Debug)]
pub struct HeaderParser {
    policy: HeaderPolicy,
    max_name: usize,
    max_value: usize,
    state: State,
    injected: bool,
    pending: Pending,
    name: Vec<u8>,
    value: Vec<u8>,
    /// Relevant header on the current line.
    current: Option<Header>,
    /// Current line is dropped from the output.
    suppress: bool,
    captured: HeaderMap,
    failed: Option<ParseError>,
}

impl HeaderParser {
    pub fn new(policy: HeaderPolicy, max_name: usize, max_value: usize) -> Self {
        Self {
            policy,
            max_name,
            max_value,
            state: State::LineStart,
            injected: false,
            pending: Pending::default(),
            name: Vec::with_capacity(max_name),
            value: Vec::new(),
            current: None,
            suppress: false,
            captured: HeaderMap::new(),
            failed: None,
        }
    }

    /// Replace the policy. Only meaningful before the first `parse()`.
    pub fn set_policy(&mut self, policy: HeaderPolicy) {
        self.policy = policy;
    }

    pub fn reset(&mut self) {
        self.state = State::LineStart;
        self.injected = false;
        self.pending.clear();
        self.name.clear();
        self.value.clear();
        self.current = None;
        self.suppress = false;
        self.captured.clear();
        self.failed = None;
    }

    pub fn has_finished(&self) -> bool {
        self.state == State::EndOk && self.pending.is_empty()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.captured
    }

    pub fn get(&self, header: Header) -> Option<&str> {
        self.captured.get(&header).map(String::as_str)
    }

    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        if !self.injected {
            for (header, value) in &self.policy.inject {
                self.pending.push(header.name().as_bytes());
                self.pending.push(b": ");
                self.pending.push(value.as_bytes());
                self.pending.push(b"\r\n");
            }
            self.injected = true;
        }
        loop {
            if !self.pending.flush(output) {
                return Ok(false);
            }
            if self.state == State::EndOk {
                return Ok(true);
            }
            let Some(&b) = input.data().first() else {
                return Ok(false);
            };
            if output.available_space() == 0 {
                return Ok(false);
            }
            input.consume(1);
            if let Err(e) = self.step(b, output) {
                self.failed = Some(e.clone());
                return Err(e);
            }
        }
    }

    fn step(&mut self, b: u8, output: &mut Buffer) -> Result<(), ParseError> {
        match self.state {
            State::LineStart => {
                if b == b'\r' {
                    output.push(b);
                    self.state = State::SectionEndCr;
                } else if chars::is_token(b) {
                    self.name.clear();
                    self.name.push(chars::to_lower(b));
                    self.state = State::Name;
                } else {
                    return Err(ParseError::Syntax("invalid header line start"));
                }
            }
            State::Name => {
                if chars::is_token(b) {
                    if self.name.len() >= self.max_name {
                        return Err(ParseError::HeaderTooLarge {
                            limit: self.max_name,
                        });
                    }
                    self.name.push(chars::to_lower(b));
                } else if b == b':' {
                    self.end_name();
                } else {
                    return Err(ParseError::Syntax("invalid header name"));
                }
            }
            State::Space => {
                if b == b'\r' {
                    output.push(b);
                    self.state = State::EndLineCr;
                } else if chars::is_text(b) {
                    output.push(b);
                    if !chars::is_lws(b) {
                        self.state = State::Content;
                    }
                } else {
                    return Err(ParseError::Syntax("invalid header value"));
                }
            }
            State::Content => {
                if b == b'\r' {
                    output.push(b);
                    self.state = State::EndLineCr;
                } else if chars::is_text(b) {
                    output.push(b);
                } else {
                    return Err(ParseError::Syntax("invalid header value"));
                }
            }
            State::RelevantSpace => {
                if b == b'\r' {
                    self.echo(b, output);
                    self.state = State::EndLineCr;
                } else if chars::is_lws(b) {
                    self.echo(b, output);
                } else if chars::is_text(b) {
                    self.capture(b)?;
                    self.echo(b, output);
                    self.state = State::RelevantContent;
                } else {
                    return Err(ParseError::Syntax("invalid header value"));
                }
            }
            State::RelevantContent => {
                if b == b'\r' {
                    self.echo(b, output);
                    self.state = State::EndLineCr;
                } else if chars::is_text(b) {
                    self.capture(b)?;
                    self.echo(b, output);
                } else {
                    return Err(ParseError::Syntax("invalid header value"));
                }
            }
            State::EndLineCr => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after header line"));
                }
                self.echo(b, output);
                self.end_line()?;
                self.state = State::LineStart;
            }
            State::SectionEndCr => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after header section"));
                }
                output.push(b);
                self.state = State::EndOk;
            }
            State::EndOk => {}
        }
        Ok(())
    }

    fn end_name(&mut self) {
        self.current = Header::from_lowercase(&self.name).filter(|h| self.policy.is_relevant(*h));
        match self.current {
            Some(header) => {
                self.suppress = self.policy.remove.contains(header);
                self.value.clear();
                if !self.suppress {
                    self.pending.push(&self.name);
                    self.pending.push(b":");
                }
                self.state = State::RelevantSpace;
            }
            None => {
                self.pending.push(&self.name);
                self.pending.push(b":");
                self.state = State::Space;
            }
        }
    }

    fn echo(&self, b: u8, output: &mut Buffer) {
        if !self.suppress {
            output.push(b);
        }
    }

    fn capture(&mut self, b: u8) -> Result<(), ParseError> {
        let Some(header) = self.current else {
            return Ok(());
        };
        if !self.policy.capture.contains(header) {
            return Ok(());
        }
        if self.value.len() >= self.max_value {
            return Err(ParseError::HeaderTooLarge {
                limit: self.max_value,
            });
        }
        self.value.push(b);
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), ParseError> {
        let current = self.current.take();
        self.suppress = false;
        let Some(header) = current.filter(|h| self.policy.capture.contains(*h)) else {
            return Ok(());
        };
        while self.value.last().is_some_and(|b| chars::is_lws(*b)) {
            self.value.pop();
        }
        let value = String::from_utf8_lossy(&self.value).into_owned();
        match self.captured.get_mut(&header) {
            None => {
                self.captured.insert(header, value);
            }
            Some(existing) if header.is_singleton() => {
                if *existing != value {
                    return Err(ParseError::IllegalHeaders("conflicting duplicate header"));
                }
            }
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(policy: HeaderPolicy) -> HeaderParser {
        HeaderParser::new(policy, 64, 128)
    }

    fn run(parser: &mut HeaderParser, bytes: &[u8]) -> (Result<bool, ParseError>, String) {
        let mut input = Buffer::with_capacity(1024);
        let mut output = Buffer::with_capacity(1024);
        input.write_slice(bytes);
        let result = parser.parse(&mut input, &mut output);
        (result, String::from_utf8_lossy(output.data()).into_owned())
    }

    #[test]
    fn passes_unknown_headers_with_lowercase_names() {
        let mut p = parser(HeaderPolicy::default());
        let (result, out) = run(&mut p, b"X-Custom:  Some Value\r\nAccept: */*\r\n\r\n");
        assert_eq!(result, Ok(true));
        assert_eq!(out, "x-custom:  Some Value\r\naccept: */*\r\n\r\n");
    }

    #[test]
    fn proxy_connection_replaced_by_single_connection_close() {
        let mut p = parser(HeaderPolicy::for_request(false));
        let (result, out) = run(
            &mut p,
            b"Host: a.com\r\nProxy-Connection: close\r\nAccept: */*\r\n\r\n",
        );
        assert_eq!(result, Ok(true));
        assert_eq!(out, "Connection: close\r\nhost: a.com\r\naccept: */*\r\n\r\n");
        assert_eq!(out.matches("Connection: close").count(), 1);
        assert!(!out.to_ascii_lowercase().contains("proxy-connection"));
        assert_eq!(p.get(Header::ProxyConnection), Some("close"));
    }

    #[test]
    fn client_connection_header_does_not_duplicate_injected_one() {
        let mut p = parser(HeaderPolicy::for_request(false));
        let (_, out) = run(&mut p, b"Connection: keep-alive\r\nHost: a\r\n\r\n");
        assert_eq!(out, "Connection: close\r\nhost: a\r\n\r\n");
        assert_eq!(p.get(Header::Connection), Some("keep-alive"));
    }

    #[test]
    fn captured_values_are_trimmed() {
        let mut p = parser(HeaderPolicy::for_response(true));
        let (result, out) = run(&mut p, b"Content-Length: \t42  \r\n\r\n");
        assert_eq!(result, Ok(true));
        assert_eq!(p.get(Header::ContentLength), Some("42"));
        assert_eq!(out, "Connection: keep-alive\r\ncontent-length: \t42  \r\n\r\n");
    }

    #[test]
    fn repeated_list_headers_are_joined() {
        let mut p = parser(HeaderPolicy::for_response(true));
        run(&mut p, b"Transfer-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(p.get(Header::TransferEncoding), Some("gzip, chunked"));
    }

    #[test]
    fn conflicting_content_length_is_illegal() {
        let mut p = parser(HeaderPolicy::for_request(false));
        let (result, _) = run(&mut p, b"Content-Length: 1\r\nContent-Length: 2\r\n\r\n");
        assert!(matches!(result, Err(ParseError::IllegalHeaders(_))));
    }

    #[test]
    fn captured_value_overflow_is_header_too_large() {
        let mut p = HeaderParser::new(HeaderPolicy::for_request(false), 64, 8);
        let (result, _) = run(&mut p, b"Host: a-very-long-host-name.example\r\n\r\n");
        assert_eq!(result, Err(ParseError::HeaderTooLarge { limit: 8 }));
    }

    #[test]
    fn long_name_is_header_too_large() {
        let mut p = HeaderParser::new(HeaderPolicy::default(), 4, 8);
        let (result, _) = run(&mut p, b"X-Long-Name: v\r\n\r\n");
        assert_eq!(result, Err(ParseError::HeaderTooLarge { limit: 4 }));
    }

    #[test]
    fn errors_are_sticky() {
        let mut p = parser(HeaderPolicy::default());
        let (first, _) = run(&mut p, b"Bad Header: x\r\n\r\n");
        assert!(first.is_err());
        let (second, _) = run(&mut p, b"\r\n");
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_bare_lf_and_obs_fold() {
        for bad in [&b"A: b\n\r\n"[..], b" folded\r\n\r\n", b"\r\r\n", b"A: b\x01\r\n\r\n"] {
            let mut p = parser(HeaderPolicy::default());
            let (result, _) = run(&mut p, bad);
            assert!(result.is_err(), "{:?}", String::from_utf8_lossy(bad));
        }
    }

    #[test]
    fn resumes_when_output_fills() {
        let mut p = parser(HeaderPolicy::for_request(false));
        let mut input = Buffer::with_capacity(256);
        input.write_slice(b"Proxy-Connection: close\r\nUser-Agent: t\r\n\r\n");
        let mut collected = Vec::new();
        loop {
            let mut output = Buffer::with_capacity(3);
            let done = p.parse(&mut input, &mut output).unwrap();
            collected.extend_from_slice(output.data());
            if done {
                break;
            }
        }
        assert_eq!(collected, b"Connection: close\r\nuser-agent: t\r\n\r\n");
        assert!(input.is_empty());
    }

    #[test]
    fn has_token_is_case_insensitive() {
        assert!(has_token("Keep-Alive", "keep-alive"));
        assert!(has_token("foo, close", "close"));
        assert!(!has_token("closed", "close"));
    }

    #[test]
    fn has_token_ignores_surrounding_separators() {
        assert!(has_token("foo,\tclose ", "close"));
        assert!(has_token("\"keep-alive\"", "keep-alive"));
        assert!(!has_token("close-ish", "close"));
    }
}

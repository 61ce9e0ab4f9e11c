//! Request line parser and request composition.
//!
//! # Request line
//! ```text
//! METHOD SP request-target SP HTTP/x.y CR LF
//! ```
//! - The method is buffered until its terminating SP, then matched against
//!   the closed method set and the accepted set (405 otherwise)
//! - `/...` and `*` are relative targets with no host
//! - `http://host[:port][/...]` is absolute; the host is captured for routing
//!   and still echoed
//!
//! # Composition
//! line → headers → body, within a single `parse()` call when input allows.
//! The body parser is chosen once the header section ends.

use crate::http::body::{BodyKind, BodyParser};
use crate::http::chars;
use crate::http::error::ParseError;
use crate::http::headers::{has_token, Header, HeaderMap, HeaderParser, HeaderPolicy};
use crate::http::limits::ParserLimits;
use crate::http::method::{Method, MethodSet};
use crate::http::version::{Version, VersionParser};
use crate::http::Pending;
use crate::net::Buffer;

const SCHEME: &[u8] = b"http";
const SCHEME_SEPARATOR: &[u8] = b"://";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Method,
    UriStart,
    Scheme { matched: usize },
    SchemeSeparator { matched: usize },
    Host,
    Uri,
    Version,
    Lf,
    Done,
}

#[derive(Debug)]
pub struct RequestLineParser {
    state: LineState,
    accepted: MethodSet,
    max_line: usize,
    line_len: usize,
    method_buf: Vec<u8>,
    method: Option<Method>,
    host: Vec<u8>,
    version: VersionParser,
    pending: Pending,
    failed: Option<ParseError>,
}

impl RequestLineParser {
    pub fn new(accepted: MethodSet, max_line: usize) -> Self {
        Self {
            state: LineState::Method,
            accepted,
            max_line,
            line_len: 0,
            method_buf: Vec::with_capacity(Method::MAX_LEN),
            method: None,
            host: Vec::new(),
            version: VersionParser::new(b'\r'),
            pending: Pending::default(),
            failed: None,
        }
    }

    pub fn reset(&mut self) {
        self.state = LineState::Method;
        self.line_len = 0;
        self.method_buf.clear();
        self.method = None;
        self.host.clear();
        self.version.reset();
        self.pending.clear();
        self.failed = None;
    }

    pub fn has_finished(&self) -> bool {
        self.state == LineState::Done
    }

    /// True once any byte of the line (other than leading blank lines) was read.
    pub fn is_started(&self) -> bool {
        self.line_len > 0
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// Host from an absolute request-target, once it is complete.
    pub fn host(&self) -> Option<&str> {
        match self.state {
            LineState::Uri | LineState::Version | LineState::Lf | LineState::Done
                if !self.host.is_empty() =>
            {
                std::str::from_utf8(&self.host).ok()
            }
            _ => None,
        }
    }

    pub fn version(&self) -> Option<Version> {
        self.version.version()
    }

    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        self.run(input, output).inspect_err(|e| self.failed = Some(e.clone()))
    }

    fn run(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        loop {
            if !self.pending.flush(output) {
                return Ok(false);
            }
            match self.state {
                LineState::Done => return Ok(true),
                LineState::Version => {
                    let before = input.available_data();
                    let done = self.version.parse(input, output)?;
                    self.count(before - input.available_data())?;
                    if !done {
                        return Ok(false);
                    }
                    self.state = LineState::Lf;
                    continue;
                }
                _ => {}
            }
            let Some(&b) = input.data().first() else {
                return Ok(false);
            };
            if output.available_space() == 0 {
                return Ok(false);
            }
            input.consume(1);
            self.step(b, output)?;
        }
    }

    fn count(&mut self, bytes: usize) -> Result<(), ParseError> {
        self.line_len += bytes;
        if self.line_len > self.max_line {
            return Err(ParseError::LineTooLong {
                limit: self.max_line,
            });
        }
        Ok(())
    }

    fn step(&mut self, b: u8, output: &mut Buffer) -> Result<(), ParseError> {
        // blank lines before the request line are dropped
        if self.state == LineState::Method
            && self.method_buf.is_empty()
            && (b == b'\r' || b == b'\n')
        {
            return Ok(());
        }
        self.count(1)?;
        self.state = match self.state {
            LineState::Method => {
                if b == b' ' {
                    self.end_method()?
                } else if chars::is_token(b) {
                    if self.method_buf.len() >= Method::MAX_LEN {
                        return Err(ParseError::MethodNotAllowed);
                    }
                    self.method_buf.push(b);
                    LineState::Method
                } else {
                    return Err(ParseError::Syntax("invalid method"));
                }
            }
            LineState::UriStart => {
                output.push(b);
                match b {
                    b'/' | b'*' => LineState::Uri,
                    b if chars::to_lower(b) == SCHEME[0] => LineState::Scheme { matched: 1 },
                    _ => return Err(ParseError::Syntax("unsupported request-target")),
                }
            }
            LineState::Scheme { matched } => {
                output.push(b);
                if chars::to_lower(b) != SCHEME[matched] {
                    return Err(ParseError::Syntax("unsupported URI scheme"));
                }
                if matched + 1 == SCHEME.len() {
                    LineState::SchemeSeparator { matched: 0 }
                } else {
                    LineState::Scheme {
                        matched: matched + 1,
                    }
                }
            }
            LineState::SchemeSeparator { matched } => {
                output.push(b);
                if b != SCHEME_SEPARATOR[matched] {
                    return Err(ParseError::Syntax("unsupported URI scheme"));
                }
                if matched + 1 == SCHEME_SEPARATOR.len() {
                    LineState::Host
                } else {
                    LineState::SchemeSeparator {
                        matched: matched + 1,
                    }
                }
            }
            LineState::Host => {
                output.push(b);
                match b {
                    b'/' | b' ' if self.host.is_empty() => {
                        return Err(ParseError::Syntax("empty host in request-target"))
                    }
                    b'/' => LineState::Uri,
                    b' ' => LineState::Version,
                    b if chars::is_uri(b) => {
                        self.host.push(b);
                        LineState::Host
                    }
                    _ => return Err(ParseError::Syntax("invalid host in request-target")),
                }
            }
            LineState::Uri => {
                output.push(b);
                match b {
                    b' ' => LineState::Version,
                    b if chars::is_uri(b) => LineState::Uri,
                    _ => return Err(ParseError::Syntax("invalid request-target")),
                }
            }
            LineState::Lf => {
                output.push(b);
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after request line"));
                }
                LineState::Done
            }
            LineState::Version | LineState::Done => self.state,
        };
        Ok(())
    }

    fn end_method(&mut self) -> Result<LineState, ParseError> {
        if self.method_buf.is_empty() {
            return Err(ParseError::Syntax("empty method"));
        }
        let method = Method::from_bytes(&self.method_buf).ok_or(ParseError::MethodNotAllowed)?;
        if !self.accepted.contains(method) {
            return Err(ParseError::MethodNotAllowed);
        }
        self.method = Some(method);
        self.pending.push(&self.method_buf);
        self.pending.push(b" ");
        Ok(LineState::UriStart)
    }
}

/// Request parser: request line, header section, body.
#[derive(Debug)]
pub struct RequestParser {
    line: RequestLineParser,
    headers: HeaderParser,
    body: Option<BodyParser>,
    failed: Option<ParseError>,
}

impl RequestParser {
    pub fn new(limits: &ParserLimits, policy: HeaderPolicy) -> Self {
        Self {
            line: RequestLineParser::new(limits.accepted_methods, limits.max_line_size),
            headers: HeaderParser::new(
                policy,
                limits.max_header_name_size,
                limits.max_header_value_size,
            ),
            body: None,
            failed: None,
        }
    }

    /// Prepare for the next request on a persistent connection.
    pub fn reset(&mut self) {
        self.line.reset();
        self.headers.reset();
        self.body = None;
        self.failed = None;
    }

    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        self.run(input, output).inspect_err(|e| self.failed = Some(e.clone()))
    }

    fn run(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        if !self.line.has_finished() && !self.line.parse(input, output)? {
            return Ok(false);
        }
        if self.body.is_none() {
            if !self.headers.parse(input, output)? {
                return Ok(false);
            }
            let method = self
                .line
                .method()
                .ok_or(ParseError::Syntax("request line without method"))?;
            self.body = Some(BodyParser::for_request(method, self.headers.headers())?);
        }
        match self.body.as_mut() {
            Some(body) => body.parse(input, output),
            None => Ok(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.line.is_started()
    }

    pub fn method(&self) -> Option<Method> {
        self.line.method()
    }

    pub fn version(&self) -> Option<Version> {
        self.line.version()
    }

    /// Target host: the absolute URI's host wins over the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.line
            .host()
            .or_else(|| self.headers.get(Header::Host).filter(|h| !h.is_empty()))
    }

    pub fn header(&self, header: Header) -> Option<&str> {
        self.headers.get(header)
    }

    pub fn headers(&self) -> &HeaderMap {
        self.headers.headers()
    }

    pub fn headers_finished(&self) -> bool {
        self.body.is_some()
    }

    pub fn body_kind(&self) -> Option<BodyKind> {
        self.body.as_ref().map(BodyParser::kind)
    }

    pub fn has_finished(&self) -> bool {
        self.body.as_ref().is_some_and(BodyParser::has_finished)
    }

    /// Whether the client asked to keep its connection open.
    pub fn wants_keep_alive(&self) -> bool {
        let values = [Header::Connection, Header::ProxyConnection].map(|h| self.header(h));
        if values.iter().flatten().any(|v| has_token(v, "close")) {
            return false;
        }
        match self.version() {
            Some(version) if version >= Version::HTTP_11 => true,
            Some(_) => values.iter().flatten().any(|v| has_token(v, "keep-alive")),
            None => false,
        }
    }
}

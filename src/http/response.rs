//! Status line parser and response composition.
//!
//! ```text
//! HTTP/x.y SP 3DIGIT [SP reason] CR LF
//! ```
//! The reason phrase is optional; some origins end the line right after the
//! status code. The body parser depends on the request method (HEAD) and on
//! the status code, so the owner calls `prepare()` before each response.

use crate::http::body::{BodyKind, BodyParser};
use crate::http::chars;
use crate::http::error::ParseError;
use crate::http::headers::{has_token, Header, HeaderParser, HeaderPolicy};
use crate::http::limits::ParserLimits;
use crate::http::method::Method;
use crate::http::version::{Version, VersionParser};
use crate::net::Buffer;

const STATUS_DIGITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Version,
    Status { digits: usize },
    AfterStatus,
    Reason,
    Lf,
    Done,
}

#[derive(Debug)]
pub struct StatusLineParser {
    state: LineState,
    max_line: usize,
    line_len: usize,
    version: VersionParser,
    status: u16,
    failed: Option<ParseError>,
}

impl StatusLineParser {
    pub fn new(max_line: usize) -> Self {
        Self {
            state: LineState::Version,
            max_line,
            line_len: 0,
            version: VersionParser::new(b' '),
            status: 0,
            failed: None,
        }
    }

    pub fn reset(&mut self) {
        self.state = LineState::Version;
        self.line_len = 0;
        self.version.reset();
        self.status = 0;
        self.failed = None;
    }

    pub fn has_finished(&self) -> bool {
        self.state == LineState::Done
    }

    pub fn is_started(&self) -> bool {
        self.version.is_started()
    }

    pub fn version(&self) -> Option<Version> {
        self.version.version()
    }

    /// Status code, once the three digits were read.
    pub fn status(&self) -> Option<u16> {
        match self.state {
            LineState::Version | LineState::Status { .. } => None,
            _ => Some(self.status),
        }
    }

    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        self.run(input, output).inspect_err(|e| self.failed = Some(e.clone()))
    }

    fn run(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        loop {
            match self.state {
                LineState::Done => return Ok(true),
                LineState::Version => {
                    let before = input.available_data();
                    let done = self.version.parse(input, output)?;
                    self.count(before - input.available_data())?;
                    if !done {
                        return Ok(false);
                    }
                    self.state = LineState::Status { digits: 0 };
                    continue;
                }
                _ => {}
            }
            let Some(&b) = input.data().first() else {
                return Ok(false);
            };
            if !output.push(b) {
                return Ok(false);
            }
            input.consume(1);
            self.count(1)?;
            self.step(b)?;
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

    fn step(&mut self, b: u8) -> Result<(), ParseError> {
        self.state = match self.state {
            LineState::Status { digits } => {
                if !chars::is_digit(b) {
                    return Err(ParseError::Syntax("invalid status code"));
                }
                self.status = self.status * 10 + u16::from(b - b'0');
                if digits + 1 < STATUS_DIGITS {
                    LineState::Status { digits: digits + 1 }
                } else if (100..=599).contains(&self.status) {
                    LineState::AfterStatus
                } else {
                    return Err(ParseError::Syntax("status code out of range"));
                }
            }
            LineState::AfterStatus => match b {
                b' ' => LineState::Reason,
                b'\r' => LineState::Lf,
                _ => return Err(ParseError::Syntax("expected SP after status code")),
            },
            LineState::Reason => match b {
                b'\r' => LineState::Lf,
                b if chars::is_text(b) => LineState::Reason,
                _ => return Err(ParseError::Syntax("invalid reason phrase")),
            },
            LineState::Lf => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after status line"));
                }
                LineState::Done
            }
            LineState::Version | LineState::Done => self.state,
        };
        Ok(())
    }
}

/// Response parser: status line, header section, body.
#[derive(Debug)]
pub struct ResponseParser {
    line: StatusLineParser,
    headers: HeaderParser,
    body: Option<BodyParser>,
    request_method: Option<Method>,
    failed: Option<ParseError>,
}

impl ResponseParser {
    pub fn new(limits: &ParserLimits) -> Self {
        Self {
            line: StatusLineParser::new(limits.max_line_size),
            headers: HeaderParser::new(
                HeaderPolicy::for_response(false),
                limits.max_header_name_size,
                limits.max_header_value_size,
            ),
            body: None,
            request_method: None,
            failed: None,
        }
    }

    /// Reset for a response to `request_method`, announcing to the client
    /// whether its connection stays open.
    pub fn prepare(&mut self, request_method: Option<Method>, client_keep_alive: bool) {
        self.reset();
        self.request_method = request_method;
        self.headers
            .set_policy(HeaderPolicy::for_response(client_keep_alive));
    }

    /// A finished 1xx other than `101`: the final response follows on the
    /// same connection.
    pub fn is_interim(&self) -> bool {
        self.has_finished()
            && self
                .status()
                .is_some_and(|status| (100..200).contains(&status) && status != 101)
    }

    /// Get ready for the response that follows an interim one. The request
    /// method and the connection policy are kept.
    pub fn next_response(&mut self) {
        self.line.reset();
        self.headers.reset();
        self.body = None;
        self.failed = None;
    }

    pub fn reset(&mut self) {
        self.line.reset();
        self.headers.reset();
        self.body = None;
        self.request_method = None;
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
            let status = self
                .line
                .status()
                .ok_or(ParseError::Syntax("status line without status code"))?;
            self.body = Some(BodyParser::for_response(
                self.request_method,
                status,
                self.headers.headers(),
            )?);
        }
        match self.body.as_mut() {
            Some(body) => body.parse(input, output),
            None => Ok(false),
        }
    }

    /// True once any byte of the response was read.
    pub fn is_started(&self) -> bool {
        self.line.is_started()
    }

    pub fn status(&self) -> Option<u16> {
        self.line.status()
    }

    pub fn version(&self) -> Option<Version> {
        self.line.version()
    }

    pub fn header(&self, header: Header) -> Option<&str> {
        self.headers.get(header)
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

    /// The body ends only when the origin closes.
    pub fn is_close_delimited(&self) -> bool {
        self.body_kind() == Some(BodyKind::ConnectionClose)
    }

    /// The origin announced `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        self.header(Header::Connection)
            .is_some_and(|v| has_token(v, "keep-alive"))
    }

    /// Transport end of stream; finishes a close-delimited body.
    pub fn mark_eof(&mut self) {
        if let Some(body) = self.body.as_mut() {
            body.mark_eof();
        }
    }
}

//! Body parser family.
//!
//! # Variants
//! - `Null`: no body, finished immediately
//! - `ContentLength`: exactly N bytes; bytes past N are left for the next message
//! - `Chunked`: `SIZE(hex) [;ext] CRLF DATA CRLF ... 0 CRLF [trailers] CRLF`
//! - `ConnectionClose`: everything until the transport reports end of stream
//!
//! # Selection (evaluated once headers finish)
//! 1. `Transfer-Encoding` ending in `chunked` → Chunked (Content-Length ignored)
//! 2. well-formed `Content-Length` → ContentLength
//! 3. responses only, body-bearing status → ConnectionClose
//!
//! Every variant copies input to output verbatim; chunk framing is never rewritten.

use crate::http::chars;
use crate::http::error::ParseError;
use crate::http::headers::{Header, HeaderMap};
use crate::http::method::Method;
use crate::net::Buffer;

/// Largest chunk size accepted, to keep the accumulator from overflowing.
const MAX_CHUNK_SIZE: u64 = u64::MAX >> 8;

/// Framing mode chosen for a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Null,
    ContentLength(u64),
    Chunked,
    ConnectionClose,
}

#[derive(Debug)]
pub enum BodyParser {
    Null,
    ContentLength { remaining: u64 },
    Chunked(ChunkedParser),
    ConnectionClose { eof: bool },
}

impl BodyParser {
    /// Body parser for a request whose headers just finished.
    pub fn for_request(method: Method, headers: &HeaderMap) -> Result<Self, ParseError> {
        if let Some(te) = headers.get(&Header::TransferEncoding) {
            if last_coding_is_chunked(te) {
                return Ok(BodyParser::Chunked(ChunkedParser::default()));
            }
            return Err(ParseError::IllegalHeaders(
                "request Transfer-Encoding must end with chunked",
            ));
        }
        if let Some(length) = content_length(headers)? {
            return Ok(BodyParser::content_length(length));
        }
        if method.requires_body_framing() {
            return Err(ParseError::LengthRequired);
        }
        Ok(BodyParser::Null)
    }

    /// Body parser for a response to `request_method` with `status`.
    pub fn for_response(
        request_method: Option<Method>,
        status: u16,
        headers: &HeaderMap,
    ) -> Result<Self, ParseError> {
        if request_method == Some(Method::Head) || !status_has_body(status) {
            return Ok(BodyParser::Null);
        }
        if let Some(te) = headers.get(&Header::TransferEncoding) {
            if last_coding_is_chunked(te) {
                return Ok(BodyParser::Chunked(ChunkedParser::default()));
            }
            return Ok(BodyParser::ConnectionClose { eof: false });
        }
        if let Some(length) = content_length(headers)? {
            return Ok(BodyParser::content_length(length));
        }
        Ok(BodyParser::ConnectionClose { eof: false })
    }

    pub fn content_length(length: u64) -> Self {
        if length == 0 {
            BodyParser::Null
        } else {
            BodyParser::ContentLength { remaining: length }
        }
    }

    pub fn kind(&self) -> BodyKind {
        match self {
            BodyParser::Null => BodyKind::Null,
            BodyParser::ContentLength { remaining } => BodyKind::ContentLength(*remaining),
            BodyParser::Chunked(_) => BodyKind::Chunked,
            BodyParser::ConnectionClose { .. } => BodyKind::ConnectionClose,
        }
    }

    pub fn has_finished(&self) -> bool {
        match self {
            BodyParser::Null => true,
            BodyParser::ContentLength { remaining } => *remaining == 0,
            BodyParser::Chunked(chunked) => chunked.has_finished(),
            BodyParser::ConnectionClose { eof } => *eof,
        }
    }

    /// The transport reached end of stream. Only finishes `ConnectionClose`.
    pub fn mark_eof(&mut self) {
        if let BodyParser::ConnectionClose { eof } = self {
            *eof = true;
        }
    }

    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        match self {
            BodyParser::Null => Ok(true),
            BodyParser::ContentLength { remaining } => {
                let copied = copy(input, output, *remaining);
                *remaining -= copied;
                Ok(*remaining == 0)
            }
            BodyParser::Chunked(chunked) => chunked.parse(input, output),
            BodyParser::ConnectionClose { eof } => {
                copy(input, output, u64::MAX);
                // finished only once everything read before EOF was forwarded
                Ok(*eof && input.is_empty())
            }
        }
    }
}

/// Copy up to `limit` bytes, bounded by pending input and free output.
fn copy(input: &mut Buffer, output: &mut Buffer, limit: u64) -> u64 {
    let available = input.available_data().min(output.available_space());
    let count = usize::try_from(limit).map_or(available, |l| l.min(available));
    let written = output.write_slice(&input.data()[..count]);
    input.consume(written);
    written as u64
}

/// 1xx, 204 and 304 never carry a body.
fn status_has_body(status: u16) -> bool {
    !((100..200).contains(&status) || status == 204 || status == 304)
}

fn last_coding_is_chunked(value: &str) -> bool {
    value
        .rsplit(',')
        .next()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, ParseError> {
    let Some(value) = headers.get(&Header::ContentLength) else {
        return Ok(None);
    };
    if value.is_empty() || !value.bytes().all(chars::is_digit) {
        return Err(ParseError::IllegalHeaders("malformed Content-Length"));
    }
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ParseError::IllegalHeaders("Content-Length out of range"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// First size digit expected.
    SizeStart,
    Size,
    /// Whitespace after the size digits.
    SizeSpace,
    Extension,
    SizeLf,
    Data { remaining: u64 },
    DataCr,
    DataLf,
    /// After the zero chunk: a trailer field or the final CRLF.
    TrailerStart,
    Trailer,
    TrailerLf,
    FinalLf,
    Done,
}

/// Chunked transfer-coding state machine.
#[derive(Debug)]
pub struct ChunkedParser {
    state: ChunkState,
    size: u64,
    failed: Option<ParseError>,
}

impl Default for ChunkedParser {
    fn default() -> Self {
        Self {
            state: ChunkState::SizeStart,
            size: 0,
            failed: None,
        }
    }
}

impl ChunkedParser {
    pub fn has_finished(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        loop {
            match self.state {
                ChunkState::Done => return Ok(true),
                ChunkState::Data { remaining } => {
                    let copied = copy(input, output, remaining);
                    if copied == 0 {
                        return Ok(false);
                    }
                    let remaining = remaining - copied;
                    self.state = if remaining == 0 {
                        ChunkState::DataCr
                    } else {
                        ChunkState::Data { remaining }
                    };
                }
                _ => {
                    let Some(&b) = input.data().first() else {
                        return Ok(false);
                    };
                    if !output.push(b) {
                        return Ok(false);
                    }
                    input.consume(1);
                    if let Err(e) = self.step(b) {
                        self.failed = Some(e.clone());
                        return Err(e);
                    }
                }
            }
        }
    }

    fn step(&mut self, b: u8) -> Result<(), ParseError> {
        self.state = match self.state {
            ChunkState::SizeStart => {
                if !chars::is_hex(b) {
                    return Err(ParseError::Syntax("missing chunk size"));
                }
                self.size = u64::from(chars::hex_value(b));
                ChunkState::Size
            }
            ChunkState::Size => {
                if chars::is_hex(b) {
                    if self.size > MAX_CHUNK_SIZE {
                        return Err(ParseError::Syntax("chunk size too large"));
                    }
                    self.size = self.size * 16 + u64::from(chars::hex_value(b));
                    ChunkState::Size
                } else {
                    self.after_size(b)?
                }
            }
            ChunkState::SizeSpace => self.after_size(b)?,
            ChunkState::Extension => match b {
                b'\r' => ChunkState::SizeLf,
                b if chars::is_text(b) => ChunkState::Extension,
                _ => return Err(ParseError::Syntax("invalid chunk extension")),
            },
            ChunkState::SizeLf => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after chunk size"));
                }
                if self.size == 0 {
                    ChunkState::TrailerStart
                } else {
                    ChunkState::Data {
                        remaining: self.size,
                    }
                }
            }
            ChunkState::DataCr => {
                if b != b'\r' {
                    return Err(ParseError::Syntax("expected CRLF after chunk data"));
                }
                ChunkState::DataLf
            }
            ChunkState::DataLf => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected CRLF after chunk data"));
                }
                ChunkState::SizeStart
            }
            ChunkState::TrailerStart => match b {
                b'\r' => ChunkState::FinalLf,
                b if chars::is_token(b) => ChunkState::Trailer,
                _ => return Err(ParseError::Syntax("invalid trailer field")),
            },
            ChunkState::Trailer => match b {
                b'\r' => ChunkState::TrailerLf,
                b if chars::is_text(b) => ChunkState::Trailer,
                _ => return Err(ParseError::Syntax("invalid trailer field")),
            },
            ChunkState::TrailerLf => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after trailer field"));
                }
                ChunkState::TrailerStart
            }
            ChunkState::FinalLf => {
                if b != b'\n' {
                    return Err(ParseError::Syntax("expected LF after last chunk"));
                }
                ChunkState::Done
            }
            ChunkState::Data { .. } | ChunkState::Done => self.state,
        };
        Ok(())
    }

    fn after_size(&self, b: u8) -> Result<ChunkState, ParseError> {
        match b {
            b'\r' => Ok(ChunkState::SizeLf),
            b';' => Ok(ChunkState::Extension),
            b if chars::is_lws(b) => Ok(ChunkState::SizeSpace),
            _ => Err(ParseError::Syntax("invalid chunk size")),
        }
    }
}

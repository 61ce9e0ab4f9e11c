//! Incremental HTTP/1.1 message parsing and rewriting.
//!
//! # Data Flow
//! ```text
//! read buffer (raw bytes, any fragmentation)
//!     → request.rs / response.rs (line → headers → body)
//!         → version.rs, headers.rs, body.rs
//!     → processed buffer (rewritten bytes, bounded)
//! ```
//!
//! # Design Decisions
//! - Every parser is resumable: `parse(input, output)` consumes what fits in
//!   `output` and returns whether the message finished
//! - Bytes that belong to the next message are never consumed
//! - Errors are values (`ParseError`) and are sticky for the message

pub mod answers;
pub mod body;
pub mod chars;
pub mod error;
pub mod headers;
pub mod limits;
pub mod method;
pub mod request;
pub mod response;
pub mod version;

pub use body::{BodyKind, BodyParser};
pub use error::ParseError;
pub use headers::{Header, HeaderMap, HeaderPolicy};
pub use limits::ParserLimits;
pub use method::{Method, MethodSet};
pub use request::RequestParser;
pub use response::ResponseParser;
pub use version::Version;

use crate::net::Buffer;

/// Bytes a parser decided to emit but could not fit into the output yet.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    bytes: Vec<u8>,
    written: usize,
}

impl Pending {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Write as much as fits. Returns true once nothing is left.
    pub(crate) fn flush(&mut self, output: &mut Buffer) -> bool {
        if self.bytes.is_empty() {
            return true;
        }
        self.written += output.write_slice(&self.bytes[self.written..]);
        if self.written == self.bytes.len() {
            self.clear();
            return true;
        }
        false
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
        self.written = 0;
    }
}

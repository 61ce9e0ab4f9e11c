use crate::config::BufferConfig;
use crate::http::method::MethodSet;

/// Bounds and policies shared by the request and response parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserLimits {
    /// Maximum request/status line length, CRLF included (default: 8KB).
    pub max_line_size: usize,
    /// Maximum header name length (default: 64 bytes).
    pub max_header_name_size: usize,
    /// Maximum length of a captured header value (default: 4KB).
    ///
    /// Only captured values are buffered; pass-through values are streamed
    /// and have no bound.
    pub max_header_value_size: usize,
    /// Methods accepted on requests. Anything else is a 405.
    pub accepted_methods: MethodSet,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_line_size: 8 * 1024,
            max_header_name_size: 64,
            max_header_value_size: 4 * 1024,
            accepted_methods: MethodSet::default(),
        }
    }
}

impl ParserLimits {
    pub fn from_config(buffers: &BufferConfig, accepted_methods: MethodSet) -> Self {
        Self {
            max_line_size: buffers.max_line_size,
            max_header_name_size: buffers.header_name_size,
            max_header_value_size: buffers.header_content_size,
            accepted_methods,
        }
    }
}

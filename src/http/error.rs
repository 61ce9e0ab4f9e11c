//! Parse error taxonomy.
//!
//! Every error is fatal for the message being parsed: parsers keep the first
//! error and return it again on every later call.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A byte violated the grammar at the current state.
    #[error("syntax error: {0}")]
    Syntax(&'static str),

    /// Request or status line exceeded the configured maximum.
    #[error("line too long: more than {limit} bytes")]
    LineTooLong { limit: usize },

    /// A header name or captured value exceeded its buffer.
    #[error("header too large: more than {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// Headers are well-formed but contradictory or unusable.
    #[error("illegal headers: {0}")]
    IllegalHeaders(&'static str),

    /// A body-bearing request carried neither Content-Length nor chunked framing.
    #[error("length required")]
    LengthRequired,

    /// Unknown method, or a method outside the accepted set.
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ParseError {
    /// Status code sent to the client when a request fails this way.
    pub fn status(&self) -> u16 {
        match self {
            ParseError::Syntax(_) | ParseError::IllegalHeaders(_) => 400,
            ParseError::LineTooLong { .. } => 414,
            ParseError::HeaderTooLarge { .. } => 431,
            ParseError::LengthRequired => 411,
            ParseError::MethodNotAllowed => 405,
        }
    }
}

//! Canned error responses sent by the proxy itself.
//!
//! Every answer closes the client connection, so each one carries
//! `Connection: close` and an exact `Content-Length`.

use crate::http::error::ParseError;

/// Proxy-generated error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    BadRequest,
    MethodNotAllowed,
    LengthRequired,
    UriTooLong,
    HeaderFieldsTooLarge,
    BadGateway,
}

impl Answer {
    pub fn from_status(status: u16) -> Option<Self> {
        Some(match status {
            400 => Answer::BadRequest,
            405 => Answer::MethodNotAllowed,
            411 => Answer::LengthRequired,
            414 => Answer::UriTooLong,
            431 => Answer::HeaderFieldsTooLarge,
            502 => Answer::BadGateway,
            _ => return None,
        })
    }

    pub fn status(&self) -> u16 {
        match self {
            Answer::BadRequest => 400,
            Answer::MethodNotAllowed => 405,
            Answer::LengthRequired => 411,
            Answer::UriTooLong => 414,
            Answer::HeaderFieldsTooLarge => 431,
            Answer::BadGateway => 502,
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Answer::BadRequest => BAD_REQUEST,
            Answer::MethodNotAllowed => METHOD_NOT_ALLOWED,
            Answer::LengthRequired => LENGTH_REQUIRED,
            Answer::UriTooLong => URI_TOO_LONG,
            Answer::HeaderFieldsTooLarge => HEADER_FIELDS_TOO_LARGE,
            Answer::BadGateway => BAD_GATEWAY,
        }
    }
}

impl From<&ParseError> for Answer {
    fn from(error: &ParseError) -> Self {
        Answer::from_status(error.status()).unwrap_or(Answer::BadRequest)
    }
}

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\
Content-Type: text/plain\r\n\
Content-Length: 12\r\n\
Connection: close\r\n\
\r\n\
Bad Request\n";

const METHOD_NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\n\
Content-Type: text/plain\r\n\
Content-Length: 19\r\n\
Connection: close\r\n\
\r\n\
Method Not Allowed\n";

const LENGTH_REQUIRED: &[u8] = b"HTTP/1.1 411 Length Required\r\n\
Content-Type: text/plain\r\n\
Content-Length: 16\r\n\
Connection: close\r\n\
\r\n\
Length Required\n";

const URI_TOO_LONG: &[u8] = b"HTTP/1.1 414 URI Too Long\r\n\
Content-Type: text/plain\r\n\
Content-Length: 13\r\n\
Connection: close\r\n\
\r\n\
URI Too Long\n";

const HEADER_FIELDS_TOO_LARGE: &[u8] = b"HTTP/1.1 431 Request Header Fields Too Large\r\n\
Content-Type: text/plain\r\n\
Content-Length: 32\r\n\
Connection: close\r\n\
\r\n\
Request Header Fields Too Large\n";

const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\
Content-Type: text/plain\r\n\
Content-Length: 12\r\n\
Connection: close\r\n\
\r\n\
Bad Gateway\n";

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Answer; 6] = [
        Answer::BadRequest,
        Answer::MethodNotAllowed,
        Answer::LengthRequired,
        Answer::UriTooLong,
        Answer::HeaderFieldsTooLarge,
        Answer::BadGateway,
    ];

    #[test]
    fn content_length_matches_body() {
        for answer in ALL {
            let text = std::str::from_utf8(answer.as_bytes()).unwrap();
            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            let declared: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap()
                .parse()
                .unwrap();
            assert_eq!(declared, body.len(), "{answer:?}");
            assert!(head.contains("Connection: close"));
            assert!(head.starts_with(&format!("HTTP/1.1 {} ", answer.status())));
        }
    }

    #[test]
    fn parse_errors_map_to_answers() {
        assert_eq!(Answer::from(&ParseError::LengthRequired), Answer::LengthRequired);
        assert_eq!(
            Answer::from(&ParseError::HeaderTooLarge { limit: 1 }),
            Answer::HeaderFieldsTooLarge
        );
        assert_eq!(Answer::from(&ParseError::Syntax("x")), Answer::BadRequest);
        assert_eq!(Answer::from_status(500), None);
    }
}

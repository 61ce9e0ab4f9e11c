//! Request methods recognised by the proxy.

use std::fmt;
use std::str::FromStr;

/// The closed method set. Anything else is rejected with 405.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Options,
    Put,
    Delete,
    Trace,
    Connect,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Get,
        Method::Post,
        Method::Head,
        Method::Options,
        Method::Put,
        Method::Delete,
        Method::Trace,
        Method::Connect,
    ];

    /// Longest method name, used to bound the method accumulator.
    pub const MAX_LEN: usize = 7;

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    /// Exact, case-sensitive match against the method token.
    pub fn from_bytes(bytes: &[u8]) -> Option<Method> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().as_bytes() == bytes)
    }

    /// Methods whose requests must carry explicit body framing.
    pub fn requires_body_framing(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::from_bytes(s.trim().to_ascii_uppercase().as_bytes())
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown HTTP method: {0}")]
pub struct UnknownMethod(pub String);

/// A set of methods stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSet(u8);

impl MethodSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, method: Method) {
        self.0 |= method.bit();
    }

    pub fn contains(&self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    /// Parse a list of method names, failing on the first unknown one.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, UnknownMethod> {
        let mut set = Self::empty();
        for name in names {
            set.insert(name.as_ref().parse()?);
        }
        Ok(set)
    }
}

impl Default for MethodSet {
    /// Every method except CONNECT (no tunnelling).
    fn default() -> Self {
        let mut set = Self::empty();
        for method in Method::ALL {
            if method != Method::Connect {
                set.insert(method);
            }
        }
        set
    }
}

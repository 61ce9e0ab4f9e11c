//! `HTTP/<major>.<minor>` token parser.
//!
//! # States
//! ```text
//! NotStarted -H-> H -T-> T1 -T-> T2 -P-> P -/-> Major -.-> Minor -end-> Done
//! ```
//! The end byte is a parameter: CR when the version closes a request line,
//! SP when it opens a status line. The end byte is consumed and echoed too.

use crate::http::chars;
use crate::http::error::ParseError;
use crate::net::Buffer;

/// Largest accepted major/minor number.
const MAX_VERSION_NUMBER: u16 = 999;

/// Parsed protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    H,
    T1,
    T2,
    P,
    Major,
    Minor,
    Done,
    Error,
}

#[derive(Debug)]
pub struct VersionParser {
    state: State,
    end: u8,
    major: u16,
    minor: u16,
    digits: usize,
}

impl VersionParser {
    /// Parser terminated by `end` (`b'\r'` or `b' '`).
    pub fn new(end: u8) -> Self {
        Self {
            state: State::NotStarted,
            end,
            major: 0,
            minor: 0,
            digits: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::NotStarted;
        self.major = 0;
        self.minor = 0;
        self.digits = 0;
    }

    pub fn is_started(&self) -> bool {
        self.state != State::NotStarted
    }

    pub fn has_finished(&self) -> bool {
        self.state == State::Done
    }

    /// The version, once finished.
    pub fn version(&self) -> Option<Version> {
        self.has_finished().then_some(Version {
            major: self.major,
            minor: self.minor,
        })
    }

    /// Consume bytes up to and including the end byte, echoing each one.
    pub fn parse(&mut self, input: &mut Buffer, output: &mut Buffer) -> Result<bool, ParseError> {
        loop {
            match self.state {
                State::Done => return Ok(true),
                State::Error => return Err(ParseError::Syntax("malformed HTTP version")),
                _ => {}
            }
            let Some(&b) = input.data().first() else {
                return Ok(false);
            };
            if !output.push(b) {
                return Ok(false);
            }
            input.consume(1);
            if let Err(e) = self.step(b) {
                self.state = State::Error;
                return Err(e);
            }
        }
    }

    fn step(&mut self, b: u8) -> Result<(), ParseError> {
        self.state = match (self.state, b) {
            (State::NotStarted, b'H') => State::H,
            (State::H, b'T') => State::T1,
            (State::T1, b'T') => State::T2,
            (State::T2, b'P') => State::P,
            (State::P, b'/') => {
                self.digits = 0;
                State::Major
            }
            (State::Major, b'.') if self.digits > 0 => {
                self.digits = 0;
                State::Minor
            }
            (State::Major, d) if chars::is_digit(d) => {
                self.major = accumulate(self.major, d)?;
                self.digits += 1;
                State::Major
            }
            (State::Minor, d) if chars::is_digit(d) => {
                self.minor = accumulate(self.minor, d)?;
                self.digits += 1;
                State::Minor
            }
            (State::Minor, e) if e == self.end && self.digits > 0 => State::Done,
            _ => return Err(ParseError::Syntax("malformed HTTP version")),
        };
        Ok(())
    }
}

/// Leading zeros are skipped until a non-zero digit shows up.
fn accumulate(value: u16, digit: u8) -> Result<u16, ParseError> {
    let d = u16::from(digit - b'0');
    if value == 0 && d == 0 {
        return Ok(0);
    }
    let next = value * 10 + d;
    if next > MAX_VERSION_NUMBER {
        return Err(ParseError::Syntax("HTTP version number too large"));
    }
    Ok(next)
}

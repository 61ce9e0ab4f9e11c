//! Byte classification tables.
//!
//! Lookup arrays over the ASCII range, built at compile time. Every parser
//! consults these instead of re-deriving classes per byte. Bytes >= 0x80 are
//! never token, separator, digit or whitespace; they are only allowed where
//! `is_text` is checked (obs-text).

#[derive(Clone, Copy)]
enum Class {
    Token,
    Separator,
    Lws,
    Digit,
    Hex,
    Upper,
    Lower,
}

const fn classify(class: Class, b: u8) -> bool {
    match class {
        Class::Token => matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
                | b'0'..=b'9' | b'A'..=b'Z' | b'^' | b'_' | b'`' | b'a'..=b'z' | b'|' | b'~'
        ),
        Class::Separator => matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/'
                | b'[' | b']' | b'?' | b'=' | b'{' | b'}' | b' ' | b'\t'
        ),
        Class::Lws => matches!(b, b' ' | b'\t'),
        Class::Digit => b.is_ascii_digit(),
        Class::Hex => b.is_ascii_hexdigit(),
        Class::Upper => b.is_ascii_uppercase(),
        Class::Lower => b.is_ascii_lowercase(),
    }
}

const fn build(class: Class) -> [bool; 128] {
    let mut table = [false; 128];
    let mut i = 0;
    while i < 128 {
        table[i] = classify(class, i as u8);
        i += 1;
    }
    table
}

static TOKEN: [bool; 128] = build(Class::Token);
static SEPARATOR: [bool; 128] = build(Class::Separator);
static LWS: [bool; 128] = build(Class::Lws);
static DIGIT: [bool; 128] = build(Class::Digit);
static HEX: [bool; 128] = build(Class::Hex);
static UPPER: [bool; 128] = build(Class::Upper);
static LOWER: [bool; 128] = build(Class::Lower);

#[inline]
fn lookup(table: &[bool; 128], b: u8) -> bool {
    (b as usize) < 128 && table[b as usize]
}

/// tchar (RFC 9110 Section 5.6.2).
#[inline]
pub fn is_token(b: u8) -> bool {
    lookup(&TOKEN, b)
}

#[inline]
pub fn is_separator(b: u8) -> bool {
    lookup(&SEPARATOR, b)
}

/// Linear whitespace: SP or HTAB.
#[inline]
pub fn is_lws(b: u8) -> bool {
    lookup(&LWS, b)
}

#[inline]
pub fn is_digit(b: u8) -> bool {
    lookup(&DIGIT, b)
}

#[inline]
pub fn is_hex(b: u8) -> bool {
    lookup(&HEX, b)
}

#[inline]
pub fn is_upper(b: u8) -> bool {
    lookup(&UPPER, b)
}

#[inline]
pub fn is_lower(b: u8) -> bool {
    lookup(&LOWER, b)
}

/// Field content and reason-phrase bytes: HTAB, SP, VCHAR, obs-text.
#[inline]
pub fn is_text(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7F)
}

/// Bytes allowed inside a request-target.
#[inline]
pub fn is_uri(b: u8) -> bool {
    b > 0x20 && b != 0x7F
}

#[inline]
pub fn to_lower(b: u8) -> u8 {
    if is_upper(b) {
        b + (b'a' - b'A')
    } else {
        b
    }
}

/// Value of a hex digit; callers check `is_hex` first.
#[inline]
pub fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

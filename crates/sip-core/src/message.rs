//! SIP message parsing and request serialization
//!
//! Parsing is intentionally lenient: the only way to fail is an empty input.
//! Headers are stored once per lowercased name and the first occurrence wins,
//! which is all a single-transaction client needs to match a response to its
//! request.

use std::collections::HashMap;
use std::fmt::Write as _;

use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space1},
    combinator::map_res,
    sequence::{preceded, tuple},
    IResult,
};

use crate::error::{Error, Result};

/// Version token that prefixes every SIP response start line
pub const SIP_VERSION: &str = "SIP/2.0";

/// A parsed SIP request or response
///
/// Only the start line, a name→value header map and the body are kept.
/// Everything else (status code, CSeq, ...) is derived on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    start_line: String,
    headers: HashMap<String, String>,
    body: String,
}

impl SipMessage {
    /// Parse raw SIP text
    ///
    /// Line endings may be CRLF, LF or bare CR. The head and body are split on
    /// the first blank line; everything after it is the body verbatim.
    ///
    /// A first line shaped like `Name: value` (no whitespace in the name) is a
    /// header, not a start line; the start line is then empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use wsreg_sip_core::SipMessage;
    ///
    /// let msg = SipMessage::parse("SIP/2.0 200 OK\r\nA: 1\r\nA: 2\r\n\r\n").unwrap();
    /// assert_eq!(msg.header("a"), Some("1"));
    ///
    /// let msg = SipMessage::parse("A: 1\r\nA: 2\r\n\r\n").unwrap();
    /// assert_eq!(msg.start_line(), "");
    /// assert_eq!(msg.header("a"), Some("1"));
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }

        let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
        let normalized = normalized.trim_start();

        let (head, body) = match normalized.split_once("\n\n") {
            Some((head, body)) => (head, body),
            None => (normalized, ""),
        };

        let mut lines = head.lines().peekable();
        let start_line = match lines.peek() {
            Some(first) if header_line(first).is_none() => {
                first.trim().to_string()
            }
            _ => String::new(),
        };
        if !start_line.is_empty() {
            lines.next();
        }

        let mut headers = HashMap::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.trim().to_string());
        }

        Ok(Self {
            start_line,
            headers,
            body: body.to_string(),
        })
    }

    /// The first line of the message, trimmed
    pub fn start_line(&self) -> &str {
        &self.start_line
    }

    /// The message body, possibly empty
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Look up a header by name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of distinct header names
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// Whether the start line is a status line
    pub fn is_response(&self) -> bool {
        self.start_line.starts_with(SIP_VERSION)
    }

    /// Request method, when this is a request
    pub fn method(&self) -> Option<&str> {
        if self.is_response() {
            return None;
        }
        self.start_line.split_whitespace().next()
    }

    /// Status code, when this is a response with a numeric second token
    pub fn status_code(&self) -> Option<u16> {
        if !self.is_response() {
            return None;
        }
        status_line(&self.start_line).ok().map(|(_, code)| code)
    }

    /// Reason phrase following the status code, if any
    pub fn reason_phrase(&self) -> Option<&str> {
        if !self.is_response() {
            return None;
        }
        let (rest, _) = status_line(&self.start_line).ok()?;
        let reason = rest.trim();
        (!reason.is_empty()).then_some(reason)
    }

    /// Sequence number and method from the CSeq header
    ///
    /// Returns `None` when the header is absent or malformed.
    pub fn cseq(&self) -> Option<(u32, &str)> {
        let value = self.header("cseq")?;
        cseq_value(value.trim()).ok().map(|(_, cseq)| cseq)
    }

    /// Call-ID header value
    pub fn call_id(&self) -> Option<&str> {
        self.header("call-id")
    }

    /// Via header value (first occurrence)
    pub fn via(&self) -> Option<&str> {
        self.header("via")
    }

    /// To header value
    pub fn to(&self) -> Option<&str> {
        self.header("to")
    }

    /// From header value
    pub fn from(&self) -> Option<&str> {
        self.header("from")
    }
}

// header-line = token ":" value, with no whitespace inside the token
fn header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, value))
}

// Status-Line = SIP-Version SP Status-Code SP Reason-Phrase
fn status_line(input: &str) -> IResult<&str, u16> {
    preceded(
        tuple((tag(SIP_VERSION), space1)),
        map_res(take_while1(|c: char| !c.is_whitespace()), |s: &str| {
            s.parse::<u16>()
        }),
    )(input)
}

// CSeq = 1*DIGIT LWS Method
fn cseq_value(input: &str) -> IResult<&str, (u32, &str)> {
    tuple((
        map_res(digit1, |s: &str| s.parse::<u32>()),
        preceded(space1, take_while1(|c: char| !c.is_whitespace())),
    ))(input)
}

/// Serialize a SIP request
///
/// Headers are written in the order given. `Content-Length` is always
/// appended, computed from the UTF-8 byte length of `body`.
///
/// # Examples
///
/// ```rust
/// use wsreg_sip_core::build_request;
///
/// let text = build_request("OPTIONS", "sip:example.com", [("Max-Forwards", "70")], "");
/// assert_eq!(
///     text,
///     "OPTIONS sip:example.com SIP/2.0\r\nMax-Forwards: 70\r\nContent-Length: 0\r\n\r\n"
/// );
/// ```
pub fn build_request<I, N, V>(method: &str, uri: &str, headers: I, body: &str) -> String
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::with_capacity(512 + body.len());
    let _ = write!(out, "{} {} {}\r\n", method, uri, SIP_VERSION);
    for (name, value) in headers {
        let _ = write!(out, "{}: {}\r\n", name.as_ref(), value.as_ref());
    }
    let _ = write!(out, "Content-Length: {}\r\n\r\n", body.len());
    out.push_str(body);
    out
}

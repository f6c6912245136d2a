//! WebSocket opening handshake (RFC 6455 §4)

use base64::prelude::*;
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::error::{Error, Result};

/// GUID appended to the client key when computing `Sec-WebSocket-Accept`
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version sent in `Sec-WebSocket-Version`
pub const WEBSOCKET_VERSION: &str = "13";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Compute the `Sec-WebSocket-Accept` value for a client key
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Position just past the `\r\n\r\n` that ends an HTTP head, if present
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Values that go into the upgrade request besides the key
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest<'a> {
    /// `Host` header value
    pub host: &'a str,
    /// Request target: path plus optional query
    pub resource: &'a str,
    /// Optional `Origin` header
    pub origin: Option<&'a str>,
    /// Optional `User-Agent` header
    pub user_agent: Option<&'a str>,
}

/// Result of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Subprotocol the server selected, if any
    pub protocol: Option<String>,
}

/// Client side of one opening handshake
///
/// Lives from the moment the stream is ready until the server's response has
/// been validated.
#[derive(Debug, Clone)]
pub struct HandshakeState {
    key: String,
    protocol: Option<String>,
}

impl HandshakeState {
    /// Start a handshake with a fresh random key
    pub fn new(protocol: Option<String>) -> Self {
        let nonce: [u8; 16] = rand::random();
        Self::with_key(BASE64_STANDARD.encode(nonce), protocol)
    }

    /// Start a handshake with a known key
    pub fn with_key(key: impl Into<String>, protocol: Option<String>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// The `Sec-WebSocket-Key` value
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The subprotocol we ask for
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Render the HTTP/1.1 upgrade request
    pub fn request(&self, req: &UpgradeRequest<'_>) -> String {
        let mut out = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {}\r\n",
            req.resource, req.host, self.key, WEBSOCKET_VERSION
        );
        if let Some(protocol) = &self.protocol {
            out.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocol));
        }
        if let Some(origin) = req.origin {
            out.push_str(&format!("Origin: {}\r\n", origin));
        }
        if let Some(user_agent) = req.user_agent {
            out.push_str(&format!("User-Agent: {}\r\n", user_agent));
        }
        out.push_str("\r\n");
        out
    }

    /// Validate the server's response head (everything up to and including
    /// the blank line)
    pub fn validate(&self, head: &[u8]) -> Result<HandshakeResponse> {
        let head = std::str::from_utf8(head).map_err(|_| Error::HandshakeNotUtf8)?;
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.split_whitespace();
        let version_ok = parts.next().is_some_and(|v| v.starts_with("HTTP/1."));
        let status_ok = parts.next() == Some("101");
        if !version_ok || !status_ok {
            return Err(Error::HandshakeStatus(status_line.to_string()));
        }

        let mut accept = None;
        let mut protocol = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("sec-websocket-accept") && accept.is_none() {
                accept = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("sec-websocket-protocol") && protocol.is_none() {
                protocol = Some(value.to_string());
            }
        }

        let expected = accept_key(&self.key);
        match accept {
            None => return Err(Error::MissingAcceptKey),
            Some(actual) if actual != expected => {
                return Err(Error::AcceptKeyMismatch { expected, actual });
            }
            Some(_) => {}
        }

        if protocol.as_deref() != self.protocol.as_deref() {
            warn!(
                "WebSocket subprotocol mismatch: requested {:?}, server selected {:?}",
                self.protocol, protocol
            );
        }

        Ok(HandshakeResponse { protocol })
    }
}

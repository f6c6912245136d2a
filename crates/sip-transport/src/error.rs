use std::io;
use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the WebSocket transport
#[derive(Error, Debug)]
pub enum Error {
    /// The WebSocket URL could not be used
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// TCP connection to the gateway failed
    #[error("Failed to connect to {0}: {1}")]
    ConnectFailed(String, #[source] io::Error),

    /// TLS setup or negotiation failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// The upgrade response did not carry a `101` status line
    #[error("Unexpected handshake status line: {0}")]
    HandshakeStatus(String),

    /// The upgrade response had no `Sec-WebSocket-Accept` header
    #[error("Handshake response is missing Sec-WebSocket-Accept")]
    MissingAcceptKey,

    /// `Sec-WebSocket-Accept` did not match the key we sent
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptKeyMismatch {
        /// Value derived from our handshake key
        expected: String,
        /// Value the server sent
        actual: String,
    },

    /// The upgrade response header block was not valid UTF-8
    #[error("Handshake response is not valid UTF-8")]
    HandshakeNotUtf8,

    /// A frame carried an opcode outside RFC 6455
    #[error("Unknown frame opcode: 0x{0:x}")]
    UnknownOpcode(u8),

    /// A frame declared a payload length that cannot be addressed
    #[error("Frame payload length {0} is too large")]
    PayloadTooLarge(u64),

    /// An operation needed an open connection
    #[error("WebSocket is not connected")]
    NotConnected,

    /// `connect` was called more than once
    #[error("WebSocket transport already started")]
    AlreadyStarted,

    /// The transport has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// Input/output error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error ends the connection
    ///
    /// Everything except usage errors (`NotConnected`, `AlreadyStarted`) is
    /// fatal to the transport that produced it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::NotConnected | Error::AlreadyStarted)
    }

    /// Whether the error happened during the opening handshake
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Error::HandshakeStatus(_)
                | Error::MissingAcceptKey
                | Error::AcceptKeyMismatch { .. }
                | Error::HandshakeNotUtf8
        )
    }

    /// Whether the error came from the frame decoder
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Error::UnknownOpcode(_) | Error::PayloadTooLarge(_))
    }
}

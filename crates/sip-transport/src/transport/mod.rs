//! Transport types shared by the WebSocket implementation and its users

use std::fmt;

pub mod connector;
pub mod ws;

pub use connector::{AsyncStream, BoxedStream, Endpoint, PreparedStream, StreamConnector, TlsConnector};

/// Events emitted by a transport to its owner
///
/// `Open` fires at most once. `Closed` and `Error` are terminal and between
/// them fire at most once; nothing is emitted after either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The opening handshake completed
    Open {
        /// Subprotocol selected by the server
        protocol: Option<String>,
    },

    /// A complete text message arrived
    Message {
        /// Message text
        text: String,
    },

    /// The connection ended without a transport failure
    Closed {
        /// Close status code, when one was exchanged
        code: Option<u16>,
        /// Close reason, when one was exchanged
        reason: Option<String>,
    },

    /// The connection failed
    Error {
        /// Error description
        error: String,
    },
}

impl TransportEvent {
    /// Whether this is the last event the transport emits
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportEvent::Closed { .. } | TransportEvent::Error { .. })
    }
}

/// Lifecycle of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created, `connect` not yet called
    Idle,
    /// Opening the byte stream
    Connecting,
    /// Upgrade request sent, waiting for the response
    Handshaking,
    /// Handshake complete, frames flow
    Open,
    /// Closed normally
    Closed,
    /// Ended by an error
    Failed,
}

impl TransportState {
    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Failed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Connecting => "connecting",
            TransportState::Handshaking => "handshaking",
            TransportState::Open => "open",
            TransportState::Closed => "closed",
            TransportState::Failed => "failed",
        };
        f.write_str(name)
    }
}

//! WebSocket transport for SIP signalling in the wsreg stack
//!
//! This crate provides a client-side WebSocket transport (RFC 6455) suitable
//! for carrying SIP over WebSocket (RFC 7118):
//!
//! - a pure frame codec ([`transport::ws::frame`])
//! - the opening handshake ([`transport::ws::handshake`])
//! - fragment reassembly ([`transport::ws::assembler`])
//! - [`WebSocketTransport`], which owns the stream, answers pings, runs the
//!   keepalive timer and reports [`TransportEvent`]s over a channel

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::ws::{WebSocketTransport, WsConfig, CLOSE_NORMAL};
pub use transport::{
    BoxedStream, Endpoint, PreparedStream, StreamConnector, TlsConnector, TransportEvent,
    TransportState,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Endpoint, Error, PreparedStream, Result, StreamConnector, TlsConnector, TransportEvent,
        TransportState, WebSocketTransport, WsConfig, CLOSE_NORMAL,
    };
}

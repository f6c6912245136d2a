//! SIP message handling for the wsreg stack
//!
//! This crate provides the small slice of SIP that a WebSocket registration
//! probe needs:
//!
//! - **[`SipMessage`]** - a lenient parser for received SIP text with
//!   case-insensitive, first-occurrence-wins header lookup
//! - **[`build_request`]** - serialization of an outbound request from an
//!   ordered header list
//! - **[`RegisterParams`]** - the inputs of a single REGISTER request and
//!   [`build_register`] which renders them in a fixed header order
//!
//! # Example
//!
//! ```rust
//! use wsreg_sip_core::SipMessage;
//!
//! let raw = "SIP/2.0 200 OK\r\nCSeq: 1 REGISTER\r\nCall-ID: abc\r\n\r\n";
//! let msg = SipMessage::parse(raw).unwrap();
//!
//! assert!(msg.is_response());
//! assert_eq!(msg.status_code(), Some(200));
//! assert_eq!(msg.reason_phrase(), Some("OK"));
//! assert_eq!(msg.cseq(), Some((1, "REGISTER")));
//! ```

pub mod error;
pub mod message;
pub mod register;
pub mod token;

pub use error::{Error, Result};
pub use message::{build_request, SipMessage};
pub use register::{build_register, RegisterParams};
pub use token::{random_branch, random_token, BRANCH_MAGIC_COOKIE};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        build_register, build_request, random_branch, random_token, Error, RegisterParams,
        Result, SipMessage,
    };
}

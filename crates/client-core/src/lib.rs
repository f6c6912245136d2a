//! # wsreg-client-core
//!
//! Registration session layer of the wsreg stack. It ties the SIP message
//! support from `wsreg-sip-core` to the WebSocket transport from
//! `wsreg-sip-transport` and drives a single REGISTER transaction to a
//! terminal outcome: registered, failed or timed out.
//!
//! ## Modules
//!
//! - [`config`] - the [`RegistrationConfig`] snapshot a session runs with
//! - [`instance`] - the [`InstanceIdStore`] seam for the device instance UUID
//! - [`events`] - [`SessionState`], [`SessionEvent`] and [`RegistrationOutcome`]
//! - [`session`] - the [`RegistrationSession`] state machine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsreg_client_core::{
//!     MemoryInstanceIdStore, RegistrationConfig, RegistrationSession, SessionEvent,
//! };
//!
//! # async fn example() -> wsreg_client_core::Result<()> {
//! let config = RegistrationConfig::new("wss://gw.example.com/ws", "pbx.example.com", "1001")
//!     .with_origin("https://app.example.com");
//! let store = MemoryInstanceIdStore::new();
//!
//! let (session, mut events) = RegistrationSession::from_store(config, &store)?;
//! session.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Finished(outcome) = event {
//!         println!("{}", outcome);
//!         break;
//!     }
//! }
//! session.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod session;

pub use config::RegistrationConfig;
pub use error::{Error, Result};
pub use events::{RegistrationOutcome, SessionEvent, SessionState};
pub use instance::{InstanceIdStore, MemoryInstanceIdStore};
pub use session::RegistrationSession;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Error, InstanceIdStore, MemoryInstanceIdStore, RegistrationConfig, RegistrationOutcome,
        RegistrationSession, Result, SessionEvent, SessionState,
    };
}

//! Error types for the registration session

use thiserror::Error;

/// Result type for client-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or driving a registration session
///
/// Failures of the registration itself (rejection, timeout, a dropped
/// socket) are not errors of this type; they are reported as a
/// [`RegistrationOutcome`](crate::RegistrationOutcome) on the event channel.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is incomplete or inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Operation not valid in the current session state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the problem
        message: String,
    },

    /// Instance identifier could not be loaded or persisted
    #[error("Instance id store error: {message}")]
    InstanceStore {
        /// Description of the problem
        message: String,
    },

    /// SIP message construction failed
    #[error("SIP error: {0}")]
    Sip(#[from] wsreg_sip_core::Error),

    /// Transport setup failed
    #[error("Transport error: {0}")]
    Transport(#[from] wsreg_sip_transport::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an instance-store error
    pub fn instance_store(message: impl Into<String>) -> Self {
        Self::InstanceStore {
            message: message.into(),
        }
    }
}

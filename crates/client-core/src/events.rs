//! Session states and the events reported to the session owner
//!
//! A [`RegistrationSession`](crate::RegistrationSession) reports progress on
//! an unbounded channel of [`SessionEvent`]s:
//!
//! - **StateChanged** - every phase change, in order
//! - **Log** - a human-readable line for every significant event
//! - **Finished** - the terminal outcome, sent at most once
//!
//! # Usage Examples
//!
//! ```rust
//! use std::time::Duration;
//! use wsreg_client_core::{RegistrationOutcome, SessionEvent};
//!
//! fn describe(event: &SessionEvent) -> Option<String> {
//!     match event {
//!         SessionEvent::Finished(outcome) if outcome.is_success() => Some("registered".into()),
//!         SessionEvent::Finished(outcome) => Some(format!("failed: {}", outcome)),
//!         _ => None,
//!     }
//! }
//!
//! let timeout = SessionEvent::Finished(RegistrationOutcome::TimedOut {
//!     after: Duration::from_secs(10),
//! });
//! assert_eq!(
//!     describe(&timeout).as_deref(),
//!     Some("failed: no SIP response in 10 seconds")
//! );
//! ```

use std::fmt;
use std::time::Duration;

/// Terminal result of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The registrar answered 200
    Registered {
        /// Response status code
        status_code: u16,
        /// Response reason phrase
        reason: String,
    },

    /// The attempt failed
    ///
    /// Carries the status code when the registrar answered with a
    /// non-200 response; transport and parse failures have none.
    Failed {
        /// Response status code, if a response was evaluated
        status_code: Option<u16>,
        /// What went wrong
        reason: String,
    },

    /// No SIP response arrived in time
    TimedOut {
        /// The configured timeout
        after: Duration,
    },
}

impl RegistrationOutcome {
    /// Whether the registrar accepted the binding
    pub fn is_success(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered { .. })
    }

    /// Status code of the evaluated response, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RegistrationOutcome::Registered { status_code, .. } => Some(*status_code),
            RegistrationOutcome::Failed { status_code, .. } => *status_code,
            RegistrationOutcome::TimedOut { .. } => None,
        }
    }
}

impl fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationOutcome::Registered {
                status_code,
                reason,
            } => write!(f, "registered ({} {})", status_code, reason),
            RegistrationOutcome::Failed {
                status_code: Some(code),
                reason,
            } => write!(f, "{} {}", code, reason),
            RegistrationOutcome::Failed {
                status_code: None,
                reason,
            } => f.write_str(reason),
            RegistrationOutcome::TimedOut { after } => {
                write!(f, "no SIP response in {} seconds", after.as_secs_f64())
            }
        }
    }
}

/// Phase of a registration session
///
/// ```text
/// Idle -> Connecting -> Open -> Registered | Failed | TimedOut
/// ```
///
/// `Failed` is reachable from every non-terminal phase. `Stopped` is entered
/// when the owner stops the session before an outcome was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Transport connecting or handshaking
    Connecting,
    /// Transport open, REGISTER sent
    Open,
    /// Terminal: the registrar answered 200
    Registered {
        /// Response status code
        status_code: u16,
        /// Response reason phrase
        reason: String,
    },
    /// Terminal: the attempt failed
    Failed {
        /// Response status code, if a response was evaluated
        status_code: Option<u16>,
        /// What went wrong
        reason: String,
    },
    /// Terminal: no response before the deadline
    TimedOut {
        /// The configured timeout
        after: Duration,
    },
    /// Terminal: stopped by the owner without an outcome
    Stopped,
}

impl SessionState {
    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Registered { .. }
                | SessionState::Failed { .. }
                | SessionState::TimedOut { .. }
                | SessionState::Stopped
        )
    }

    /// The outcome this phase reports, if it is an outcome
    pub fn outcome(&self) -> Option<RegistrationOutcome> {
        match self {
            SessionState::Registered {
                status_code,
                reason,
            } => Some(RegistrationOutcome::Registered {
                status_code: *status_code,
                reason: reason.clone(),
            }),
            SessionState::Failed {
                status_code,
                reason,
            } => Some(RegistrationOutcome::Failed {
                status_code: *status_code,
                reason: reason.clone(),
            }),
            SessionState::TimedOut { after } => Some(RegistrationOutcome::TimedOut { after: *after }),
            _ => None,
        }
    }
}

impl From<RegistrationOutcome> for SessionState {
    fn from(outcome: RegistrationOutcome) -> Self {
        match outcome {
            RegistrationOutcome::Registered {
                status_code,
                reason,
            } => SessionState::Registered {
                status_code,
                reason,
            },
            RegistrationOutcome::Failed {
                status_code,
                reason,
            } => SessionState::Failed {
                status_code,
                reason,
            },
            RegistrationOutcome::TimedOut { after } => SessionState::TimedOut { after },
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Open => f.write_str("open"),
            SessionState::Registered { status_code, .. } => write!(f, "registered({})", status_code),
            SessionState::Failed { .. } => f.write_str("failed"),
            SessionState::TimedOut { .. } => f.write_str("timeout"),
            SessionState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Event reported by a registration session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new phase
    StateChanged {
        /// Phase before the change
        previous: SessionState,
        /// Phase after the change
        current: SessionState,
    },

    /// Log line for display
    Log {
        /// Message text
        message: String,
    },

    /// The session reached its outcome; sent at most once
    Finished(RegistrationOutcome),
}

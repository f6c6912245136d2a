use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling SIP text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input was empty or contained only whitespace
    #[error("Empty SIP message")]
    EmptyMessage,

    /// A value required to build a request was missing
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

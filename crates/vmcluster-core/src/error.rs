//! Error types shared by the identifier types.

use thiserror::Error;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The input was empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The input does not start with the expected prefix.
    #[error("invalid prefix: expected {expected:?}, got {got:?}")]
    InvalidPrefix {
        /// The prefix the identifier type requires.
        expected: &'static str,
        /// The offending input.
        got: String,
    },

    /// The part after the prefix contains characters outside `[0-9a-z]`.
    #[error("invalid characters in identifier: {0:?}")]
    InvalidCharacters(String),
}

//! Error types for event publishing.

use thiserror::Error;

/// A result type using `EventError`.
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors that can occur while publishing change events.
#[derive(Debug, Error)]
pub enum EventError {
    /// The bus rejected the event.
    #[error("publish failed: {0}")]
    Publish(String),
}

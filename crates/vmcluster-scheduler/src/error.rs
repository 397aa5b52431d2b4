//! Error types for the scheduler crate.

use thiserror::Error;

/// Errors that can occur while planning or executing task layers.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A remote agent reported a task failure.
    #[error("task {action} on {node_id} failed: {message}")]
    RemoteExecution {
        /// Task action.
        action: String,
        /// Node (or cluster, for cluster-level tasks) the task ran on.
        node_id: String,
        /// Failure reported by the agent.
        message: String,
    },

    /// A task did not finish within its budget.
    #[error("task {action} on {node_id} timed out after {seconds}s")]
    Timeout {
        /// Task action.
        action: String,
        /// Node the task ran on.
        node_id: String,
        /// Budget in seconds.
        seconds: u64,
    },

    /// The agent could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// A directive could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::RemoteExecution { .. } => 502,
            Self::Timeout { .. } | Self::Transport(_) => 503,
            Self::Serialization(_) | Self::Config(_) => 500,
        }
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

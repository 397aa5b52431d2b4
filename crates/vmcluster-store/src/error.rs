//! Error types for the storage layer.

use thiserror::Error;

use crate::schema::Table;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A record with the same primary key already exists.
    #[error("{table} record already exists: {key}")]
    AlreadyExists {
        /// Table the insert targeted.
        table: Table,
        /// Conflicting primary key.
        key: String,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The table has no owner column to resolve.
    #[error("table {0} has no owner column")]
    NoOwnerColumn(Table),
}

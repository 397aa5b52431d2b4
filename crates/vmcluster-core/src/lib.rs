//! Core types for vmcluster.
//!
//! This crate provides the identifiers shared by every other crate in the
//! workspace:
//!
//! - **Identifiers**: `ClusterId`, `NodeId`, `JobId` (prefixed, generated)
//!   and `UserId` (opaque owner identity)
//! - **Error types**: `IdError` for identifier parsing
//!
//! # Example
//!
//! ```
//! use vmcluster_core::{ClusterId, NodeId, UserId};
//!
//! let cluster_id = ClusterId::generate();
//! assert!(cluster_id.as_str().starts_with("cl-"));
//!
//! let node_id: NodeId = "cln-0a1b2c3d".parse().unwrap();
//! let owner = UserId::new("usr-alice").unwrap();
//! # let _ = (node_id, owner);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::IdError;
pub use ids::{ClusterId, JobId, NodeId, UserId};

//! `RocksDB` storage layer for vmcluster.
//!
//! This crate persists clusters, nodes, per-role configuration, category
//! associations and lifecycle jobs using `RocksDB` with one column family per
//! table plus secondary indexes.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `cluster`: Primary cluster records, keyed by `cluster_id`
//! - `cluster_node`: Primary node records, keyed by `node_id`
//! - `cluster_role` / `cluster_common`: Role configuration, keyed by `cluster_id \0 role`
//! - `category_resource`: Category associations, keyed by `category_id \0 resource_id`
//! - `job`: Lifecycle jobs, keyed by `job_id`
//! - `clusters_by_owner`, `nodes_by_cluster`: Secondary indexes
//!
//! Every committed write is described as a [`Mutation`] and handed to the
//! registered [`MutationObserver`] once the write batch has been applied.
//!
//! # Example
//!
//! ```no_run
//! use vmcluster_store::{RocksStore, Store};
//! use vmcluster_core::UserId;
//!
//! let store = RocksStore::open("/tmp/vmcluster-db").unwrap();
//!
//! let owner = UserId::new("usr-alice").unwrap();
//! let clusters = store.list_clusters_by_owner(&owner).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod mutation;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use mutation::{
    ColumnValue, DeleteMutation, InsertMutation, Mutation, MutationObserver, Predicate,
    PredicateValue, Row, UpdateMutation,
};
pub use rocks::{OwnerLookup, RocksStore};
pub use schema::Table;
pub use types::{
    base_role, CategoryResource, Cluster, ClusterBundle, ClusterCommon, ClusterNode, ClusterPatch, ClusterRole,
    ClusterStatus, ClusterType, Job, JobAction, JobStatus, NodePatch, RoleResize,
    TransitionCondition, TransitionStatus, REPLICA_ROLE_SUFFIX,
};

use std::sync::Arc;

use vmcluster_core::{ClusterId, JobId, NodeId, UserId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Cluster Operations
    // =========================================================================

    /// Insert a new cluster record and index it by owner.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    fn insert_cluster(&self, cluster: &Cluster) -> Result<()>;

    /// Get a cluster by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Option<Cluster>>;

    /// List all clusters belonging to a user, soft-deleted ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_clusters_by_owner(&self, owner: &UserId) -> Result<Vec<Cluster>>;

    /// Apply a partial update to a cluster and return the new record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the cluster doesn't exist.
    fn update_cluster(&self, cluster_id: &ClusterId, patch: &ClusterPatch) -> Result<Cluster>;

    /// Conditionally mark a cluster as owned by a lifecycle operation.
    ///
    /// Sets the transition marker to `transition` only if the row matches
    /// `condition` (owner, idle, status allowed). The read and the write
    /// happen under the store's write lock. Returns the number of rows
    /// changed: `1` on success, `0` if the row is missing or does not match.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn begin_cluster_transition(
        &self,
        cluster_id: &ClusterId,
        transition: TransitionStatus,
        condition: &TransitionCondition,
    ) -> Result<u64>;

    /// Insert a new cluster together with its nodes, role rows and job.
    ///
    /// The rows are written in one batch: either all of them land or none.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if any id is taken; nothing is
    /// written in that case.
    fn insert_cluster_bundle(&self, bundle: &ClusterBundle) -> Result<()>;

    /// Return the owner's frontgate serving the bundle's VPC, or insert
    /// the bundle as that frontgate.
    ///
    /// The lookup and the insert happen under the store's write lock, so
    /// concurrent callers for the same owner and VPC agree on one frontgate.
    /// Returns the existing frontgate, or `None` if the bundle was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_or_insert_frontgate(&self, bundle: &ClusterBundle) -> Result<Option<Cluster>>;

    /// Permanently remove a cluster with its nodes and role configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the cluster doesn't exist.
    fn delete_cluster(&self, cluster_id: &ClusterId) -> Result<()>;

    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Insert new node records and index them by cluster.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if any id is taken; nothing is
    /// written in that case.
    fn insert_cluster_nodes(&self, nodes: &[ClusterNode]) -> Result<()>;

    /// Get a node by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cluster_node(&self, node_id: &NodeId) -> Result<Option<ClusterNode>>;

    /// List the nodes of a cluster, ordered by node ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_cluster_nodes(&self, cluster_id: &ClusterId) -> Result<Vec<ClusterNode>>;

    /// Apply a partial update to every listed node that exists.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_cluster_nodes(&self, node_ids: &[NodeId], patch: &NodePatch) -> Result<u64>;

    /// Conditionally mark a batch of nodes as owned by a lifecycle operation.
    ///
    /// All-or-nothing: if any node is missing or fails `condition`, no row
    /// is written and `0` is returned. Otherwise returns the number of
    /// distinct nodes marked; repeated ids count once.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn begin_nodes_transition(
        &self,
        node_ids: &[NodeId],
        transition: TransitionStatus,
        condition: &TransitionCondition,
    ) -> Result<u64>;

    /// Permanently remove the listed nodes. Missing ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_cluster_nodes(&self, node_ids: &[NodeId]) -> Result<()>;

    // =========================================================================
    // Role Configuration
    // =========================================================================

    /// Insert or replace role sizing rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_cluster_roles(&self, roles: &[ClusterRole]) -> Result<()>;

    /// List the role sizing rows of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_cluster_roles(&self, cluster_id: &ClusterId) -> Result<Vec<ClusterRole>>;

    /// Insert or replace role image/capability rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_cluster_commons(&self, commons: &[ClusterCommon]) -> Result<()>;

    /// List the role image/capability rows of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_cluster_commons(&self, cluster_id: &ClusterId) -> Result<Vec<ClusterCommon>>;

    // =========================================================================
    // Category Associations
    // =========================================================================

    /// Insert category/resource associations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_category_resources(&self, rows: &[CategoryResource]) -> Result<()>;

    /// List the associations of a category.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_category_resources(&self, category_id: &str) -> Result<Vec<CategoryResource>>;

    /// Remove associations between a category and the listed resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_category_resources(&self, category_id: &str, resource_ids: &[String])
        -> Result<()>;

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Insert a new job record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Conditionally move an unfinished job to `status`.
    ///
    /// Writes only if the job is still pending or working, so at most one
    /// caller can finish a job. Returns `1` on success, `0` if the job is
    /// missing or already finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn advance_job(&self, job_id: &JobId, status: JobStatus) -> Result<u64>;

    /// Update a job's status and return the new record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the job doesn't exist.
    fn update_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<Job>;
}

/// Resolves the owner of an event-eligible row.
///
/// Used by the change dispatcher after a write has committed. The read is
/// not synchronized with later writers, so it may observe a slightly newer
/// row than the one the mutation produced.
pub trait OwnerResolver: Send + Sync {
    /// Look up the owner of the row keyed by `key` in `table`.
    ///
    /// Returns `Ok(None)` if the row does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoOwnerColumn` for tables without an owner, or a
    /// database error.
    fn resolve_owner(&self, table: Table, key: &str) -> Result<Option<UserId>>;
}

impl<T: OwnerResolver + ?Sized> OwnerResolver for Arc<T> {
    fn resolve_owner(&self, table: Table, key: &str) -> Result<Option<UserId>> {
        (**self).resolve_owner(table, key)
    }
}

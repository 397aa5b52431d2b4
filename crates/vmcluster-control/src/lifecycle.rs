//! Transition guard and cluster status state machine.
//!
//! Every lifecycle operation takes ownership of its cluster (or nodes) by
//! setting the transition marker, and gives it back by clearing the marker
//! and writing a final status. Taking ownership is a conditional write
//! executed atomically by the store:
//!
//! ```text
//! set transition_status = X
//!   where transition_status = '' and owner = user and status in allowed
//! ```
//!
//! A write that changes no row is classified by re-running the read-side
//! check, so the caller learns whether the resource is missing, foreign,
//! busy or in the wrong status.
//!
//! # Status table
//!
//! | Action | Allowed | Transition | Success |
//! |---|---|---|---|
//! | create | new row | creating | active |
//! | delete | active, stopped, pending | deleting | deleted |
//! | start | stopped | starting | active |
//! | stop | active | stopping | stopped |
//! | resize | stopped | resizing | unchanged |
//! | add nodes | active, stopped | adding-nodes | unchanged |
//! | delete nodes | active, stopped | deleting-nodes | unchanged |
//! | upgrade | stopped | upgrading | unchanged |
//! | rollback | stopped | rolling-back | unchanged |
//! | recover | deleted | recovering | active |
//! | cease | deleted | ceasing | rows removed |
//!
//! A failed job always reverts to the status captured when the transition
//! was taken.

use vmcluster_core::{ClusterId, NodeId, UserId};
use vmcluster_store::{
    base_role, Cluster, ClusterNode, ClusterPatch, ClusterStatus, JobAction, NodePatch, Store,
    TransitionCondition, TransitionStatus,
};

use crate::error::{ControlError, Result};

/// Statuses and transition marker of one lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRule {
    /// Statuses the action may start from.
    pub allowed: &'static [ClusterStatus],
    /// Marker held while the action runs.
    pub transition: TransitionStatus,
}

/// The guard rule for `action`.
#[must_use]
pub const fn rule(action: JobAction) -> ActionRule {
    use ClusterStatus::{Active, Deleted, Pending, Stopped};

    let (allowed, transition): (&'static [ClusterStatus], TransitionStatus) = match action {
        JobAction::CreateCluster => (&[Pending], TransitionStatus::Creating),
        JobAction::DeleteClusters => (&[Active, Stopped, Pending], TransitionStatus::Deleting),
        JobAction::StartClusters => (&[Stopped], TransitionStatus::Starting),
        JobAction::StopClusters => (&[Active], TransitionStatus::Stopping),
        JobAction::ResizeCluster => (&[Stopped], TransitionStatus::Resizing),
        JobAction::AddClusterNodes => (&[Active, Stopped], TransitionStatus::AddingNodes),
        JobAction::DeleteClusterNodes => (&[Active, Stopped], TransitionStatus::DeletingNodes),
        JobAction::UpgradeCluster => (&[Stopped], TransitionStatus::Upgrading),
        JobAction::RollbackCluster => (&[Stopped], TransitionStatus::RollingBack),
        JobAction::RecoverClusters => (&[Deleted], TransitionStatus::Recovering),
        JobAction::CeaseClusters => (&[Deleted], TransitionStatus::Ceasing),
    };
    ActionRule {
        allowed,
        transition,
    }
}

/// Final cluster status after `action` succeeds, given the status the
/// cluster had when the transition was taken.
///
/// Cease has no final status: its rows are removed.
#[must_use]
pub const fn success_status(action: JobAction, prior: ClusterStatus) -> ClusterStatus {
    match action {
        JobAction::CreateCluster | JobAction::StartClusters | JobAction::RecoverClusters => {
            ClusterStatus::Active
        }
        JobAction::DeleteClusters => ClusterStatus::Deleted,
        JobAction::StopClusters => ClusterStatus::Stopped,
        JobAction::CeaseClusters => ClusterStatus::Ceased,
        JobAction::ResizeCluster
        | JobAction::AddClusterNodes
        | JobAction::DeleteClusterNodes
        | JobAction::UpgradeCluster
        | JobAction::RollbackCluster => prior,
    }
}

fn admitted(
    resource_id: &str,
    status: ClusterStatus,
    transition: TransitionStatus,
    allowed: &[ClusterStatus],
) -> Result<()> {
    if !transition.is_idle() {
        tracing::error!(
            resource_id = %resource_id,
            transition = transition.as_str(),
            "Resource is busy, please try later"
        );
        return Err(ControlError::busy(resource_id, transition));
    }
    if !allowed.is_empty() && !allowed.contains(&status) {
        tracing::error!(
            resource_id = %resource_id,
            status = %status,
            allowed = ?allowed,
            "Resource status does not allow the operation"
        );
        return Err(ControlError::InvalidState {
            resource_id: resource_id.to_string(),
            status,
            allowed: allowed.to_vec(),
        });
    }
    Ok(())
}

/// Load a cluster and check that `user` may start an operation on it.
///
/// An empty `allowed` list accepts any status.
///
/// # Errors
///
/// `ClusterNotFound`, `NotOwner`, `Busy` (transition marker set) or
/// `InvalidState` (status not in `allowed`), in that order.
pub fn check_permission_and_transition<S: Store + ?Sized>(
    store: &S,
    cluster_id: &ClusterId,
    user: &UserId,
    allowed: &[ClusterStatus],
) -> Result<Cluster> {
    let cluster = store
        .get_cluster(cluster_id)?
        .ok_or_else(|| ControlError::ClusterNotFound(cluster_id.clone()))?;
    if cluster.owner != *user {
        return Err(ControlError::NotOwner {
            user_id: user.clone(),
            resource_id: cluster_id.to_string(),
        });
    }
    admitted(
        cluster_id.as_str(),
        cluster.status,
        cluster.transition_status,
        allowed,
    )?;
    Ok(cluster)
}

/// Batch form of [`check_permission_and_transition`] over nodes.
///
/// Any failing node fails the whole batch.
///
/// # Errors
///
/// The first failing node's error.
pub fn check_nodes_permission_and_transition<S: Store + ?Sized>(
    store: &S,
    node_ids: &[NodeId],
    user: &UserId,
    allowed: &[ClusterStatus],
) -> Result<Vec<ClusterNode>> {
    let mut nodes = Vec::with_capacity(node_ids.len());
    for node_id in node_ids {
        let node = store
            .get_cluster_node(node_id)?
            .ok_or_else(|| ControlError::NodeNotFound(node_id.clone()))?;
        if node.owner != *user {
            return Err(ControlError::NotOwner {
                user_id: user.clone(),
                resource_id: node_id.to_string(),
            });
        }
        admitted(node_id.as_str(), node.status, node.transition_status, allowed)?;
        nodes.push(node);
    }
    Ok(nodes)
}

/// Take ownership of a cluster for `transition`.
///
/// Returns the cluster as it is after the marker was set; its status is
/// the status the operation started from.
///
/// # Errors
///
/// The classified guard error if the conditional write changed no row.
pub fn acquire_cluster_transition<S: Store + ?Sized>(
    store: &S,
    cluster_id: &ClusterId,
    user: &UserId,
    allowed: &[ClusterStatus],
    transition: TransitionStatus,
) -> Result<Cluster> {
    let condition = TransitionCondition::new(user, allowed);
    let changed = store.begin_cluster_transition(cluster_id, transition, &condition)?;
    if changed == 0 {
        check_permission_and_transition(store, cluster_id, user, allowed)?;
        // The row matched again after losing the write; someone else moved it.
        return Err(ControlError::busy(cluster_id, transition));
    }

    tracing::debug!(
        cluster_id = %cluster_id,
        transition = transition.as_str(),
        "Acquired cluster transition"
    );
    store
        .get_cluster(cluster_id)?
        .ok_or_else(|| ControlError::ClusterNotFound(cluster_id.clone()))
}

/// Take ownership of a batch of nodes for `transition`. All or nothing.
///
/// # Errors
///
/// The classified guard error of the first failing node.
pub fn acquire_nodes_transition<S: Store + ?Sized>(
    store: &S,
    node_ids: &[NodeId],
    user: &UserId,
    allowed: &[ClusterStatus],
    transition: TransitionStatus,
) -> Result<()> {
    let condition = TransitionCondition::new(user, allowed);
    let changed = store.begin_nodes_transition(node_ids, transition, &condition)?;
    if changed == 0 {
        check_nodes_permission_and_transition(store, node_ids, user, allowed)?;
        let first = node_ids.first().map(ToString::to_string).unwrap_or_default();
        return Err(ControlError::busy(first, transition));
    }
    tracing::debug!(
        nodes = node_ids.len(),
        transition = transition.as_str(),
        "Acquired node transition"
    );
    Ok(())
}

/// Clear a cluster's transition marker and set its final status.
///
/// # Errors
///
/// Returns an error if the store update fails.
pub fn release_cluster_transition<S: Store + ?Sized>(
    store: &S,
    cluster_id: &ClusterId,
    status: ClusterStatus,
) -> Result<Cluster> {
    Ok(store.update_cluster(cluster_id, &ClusterPatch::settle(status))?)
}

/// Clear the nodes' transition markers, setting `status` if given.
///
/// # Errors
///
/// Returns an error if the store update fails.
pub fn release_nodes_transition<S: Store + ?Sized>(
    store: &S,
    node_ids: &[NodeId],
    status: Option<ClusterStatus>,
) -> Result<u64> {
    let patch = NodePatch {
        status,
        transition_status: Some(TransitionStatus::Idle),
        ..NodePatch::default()
    };
    Ok(store.update_cluster_nodes(node_ids, &patch)?)
}

/// Check whether `role` of a cluster allows the advanced `action`.
///
/// The replica suffix is stripped from `role`. A missing role, an empty
/// allow-list or a failed lookup all deny.
pub fn is_action_supported<S: Store + ?Sized>(
    store: &S,
    cluster_id: &ClusterId,
    role: &str,
    action: &str,
) -> bool {
    let commons = match store.list_cluster_commons(cluster_id) {
        Ok(commons) => commons,
        Err(e) => {
            tracing::warn!(cluster_id = %cluster_id, error = %e, "Failed to load role config");
            return false;
        }
    };
    let role = base_role(role);
    match commons.iter().find(|c| c.role == role) {
        Some(common) => common.allows(action),
        None => {
            tracing::error!(cluster_id = %cluster_id, role = %role, "Cluster has no such role");
            false
        }
    }
}

//! Domain types stored in the database.
//!
//! These types represent the persisted state of clusters, their nodes, the
//! per-role configuration, category associations and lifecycle jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vmcluster_core::{ClusterId, JobId, NodeId, UserId};

use crate::mutation::{ColumnValue, Row};
use crate::schema::{column, Table};

/// Suffix marking a replica role; replicas share the base role's config.
pub const REPLICA_ROLE_SUFFIX: &str = "-replica";

/// Strip the replica suffix from a role name.
///
/// `worker-replica` resolves to `worker`; every other name is returned
/// unchanged.
#[must_use]
pub fn base_role(role: &str) -> &str {
    role.strip_suffix(REPLICA_ROLE_SUFFIX).unwrap_or(role)
}

/// Steady-state status of a cluster or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Created, resources not provisioned yet.
    Pending,
    /// Provisioned and running.
    Active,
    /// Provisioned, compute stopped.
    Stopped,
    /// Soft-deleted; the row is retained and can be recovered or ceased.
    Deleted,
    /// Permanently removed.
    Ceased,
}

impl ClusterStatus {
    /// The persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
            Self::Ceased => "ceased",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ClusterStatus> for ColumnValue {
    fn from(value: ClusterStatus) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

/// In-progress lifecycle verb of a cluster or node.
///
/// `Idle` persists as the empty string; any other value marks the resource
/// as owned by a running lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionStatus {
    /// No operation in progress.
    #[default]
    #[serde(rename = "")]
    Idle,
    /// Being provisioned.
    Creating,
    /// Being torn down.
    Deleting,
    /// Being started.
    Starting,
    /// Being stopped.
    Stopping,
    /// Being resized.
    Resizing,
    /// Nodes being added.
    AddingNodes,
    /// Nodes being removed.
    DeletingNodes,
    /// Being upgraded.
    Upgrading,
    /// Being rolled back.
    RollingBack,
    /// Being recovered from soft delete.
    Recovering,
    /// Being permanently removed.
    Ceasing,
}

impl TransitionStatus {
    /// The persisted string form (empty for `Idle`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Creating => "creating",
            Self::Deleting => "deleting",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Resizing => "resizing",
            Self::AddingNodes => "adding-nodes",
            Self::DeletingNodes => "deleting-nodes",
            Self::Upgrading => "upgrading",
            Self::RollingBack => "rolling-back",
            Self::Recovering => "recovering",
            Self::Ceasing => "ceasing",
        }
    }

    /// True when no operation owns the resource.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TransitionStatus> for ColumnValue {
    fn from(value: TransitionStatus) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

/// Kind of cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    /// A user application cluster.
    #[default]
    Normal,
    /// A management sidecar cluster supervising agents inside one VPC.
    Frontgate,
}

impl ClusterType {
    /// The persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Frontgate => "frontgate",
        }
    }
}

/// A cluster record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique identifier.
    pub cluster_id: ClusterId,
    /// Human-readable name.
    pub name: String,
    /// Owning user.
    pub owner: UserId,
    /// Application the cluster runs.
    pub app_id: String,
    /// Application version the cluster runs.
    pub version_id: String,
    /// Version before the last upgrade, if any.
    #[serde(default)]
    pub previous_version_id: Option<String>,
    /// Runtime the cluster is deployed on.
    pub runtime_id: String,
    /// Application or frontgate cluster.
    pub cluster_type: ClusterType,
    /// Steady-state status.
    pub status: ClusterStatus,
    /// In-progress lifecycle verb.
    pub transition_status: TransitionStatus,
    /// Network, resolved during provider admission.
    pub vpc_id: String,
    /// Subnet the nodes are attached to.
    pub subnet_id: String,
    /// Availability zone.
    pub zone: String,
    /// Frontgate cluster supervising this cluster.
    #[serde(default)]
    pub frontgate_id: Option<ClusterId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub status_time: DateTime<Utc>,
}

impl Row for Cluster {
    const TABLE: Table = Table::Cluster;

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            (column::CLUSTER_ID, self.cluster_id.as_str().into()),
            (column::NAME, self.name.as_str().into()),
            (column::OWNER, self.owner.as_str().into()),
            (column::APP_ID, self.app_id.as_str().into()),
            (column::VERSION_ID, self.version_id.as_str().into()),
            (
                column::PREVIOUS_VERSION_ID,
                self.previous_version_id.clone().into(),
            ),
            (column::RUNTIME_ID, self.runtime_id.as_str().into()),
            (column::CLUSTER_TYPE, self.cluster_type.as_str().into()),
            (column::STATUS, self.status.into()),
            (column::TRANSITION_STATUS, self.transition_status.into()),
            (column::VPC_ID, self.vpc_id.as_str().into()),
            (column::SUBNET_ID, self.subnet_id.as_str().into()),
            (column::ZONE, self.zone.as_str().into()),
            (
                column::FRONTGATE_ID,
                self.frontgate_id.as_ref().map(ClusterId::as_str).into(),
            ),
            (column::CREATE_TIME, self.created_at.into()),
            (column::STATUS_TIME, self.status_time.into()),
        ]
    }
}

impl Cluster {
    /// Whether this row is a frontgate that can still serve `vpc_id`.
    #[must_use]
    pub fn serves_vpc(&self, vpc_id: &str) -> bool {
        self.cluster_type == ClusterType::Frontgate
            && self.vpc_id == vpc_id
            && matches!(
                self.status,
                ClusterStatus::Pending | ClusterStatus::Active | ClusterStatus::Stopped
            )
    }
}

/// A node record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Unique identifier.
    pub node_id: NodeId,
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Owning user (same as the cluster's).
    pub owner: UserId,
    /// Logical role, possibly with the replica suffix.
    pub role: String,
    /// Steady-state status.
    pub status: ClusterStatus,
    /// In-progress lifecycle verb.
    pub transition_status: TransitionStatus,
    /// Private address, known once the instance runs.
    #[serde(default)]
    pub private_ip: String,
    /// Provider instance id, known once the instance exists.
    #[serde(default)]
    pub instance_id: String,
    /// Provider volume id, known once the volume exists.
    #[serde(default)]
    pub volume_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub status_time: DateTime<Utc>,
}

impl Row for ClusterNode {
    const TABLE: Table = Table::ClusterNode;

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            (column::NODE_ID, self.node_id.as_str().into()),
            (column::CLUSTER_ID, self.cluster_id.as_str().into()),
            (column::OWNER, self.owner.as_str().into()),
            (column::ROLE, self.role.as_str().into()),
            (column::STATUS, self.status.into()),
            (column::TRANSITION_STATUS, self.transition_status.into()),
            (column::PRIVATE_IP, self.private_ip.as_str().into()),
            (column::INSTANCE_ID, self.instance_id.as_str().into()),
            (column::VOLUME_ID, self.volume_id.as_str().into()),
            (column::CREATE_TIME, self.created_at.into()),
            (column::STATUS_TIME, self.status_time.into()),
        ]
    }
}

/// Per-role sizing and mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRole {
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Base role name (never carries the replica suffix).
    pub role: String,
    /// CPU cores per node.
    pub cpu: u32,
    /// Memory per node in MiB.
    pub memory: u32,
    /// Data volume size per node in GiB; zero means no volume.
    pub storage_size: u32,
    /// Mount point of the data volume; empty when not mounted.
    pub mount_point: String,
    /// Number of nodes with this role.
    pub count: u32,
}

impl Row for ClusterRole {
    const TABLE: Table = Table::ClusterRole;

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            (column::CLUSTER_ID, self.cluster_id.as_str().into()),
            (column::ROLE, self.role.as_str().into()),
            (column::CPU, self.cpu.into()),
            (column::MEMORY, self.memory.into()),
            (column::STORAGE_SIZE, self.storage_size.into()),
            (column::MOUNT_POINT, self.mount_point.as_str().into()),
            (column::COUNT, self.count.into()),
        ]
    }
}

/// Per-role image and capability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCommon {
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Base role name.
    pub role: String,
    /// Machine image the role's nodes boot.
    pub image_id: String,
    /// Comma-separated advanced-action allow-list.
    #[serde(default)]
    pub advanced_actions: String,
}

impl ClusterCommon {
    /// Whether `action` appears in the advanced-action allow-list.
    ///
    /// An empty allow-list denies every action.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        !self.advanced_actions.is_empty()
            && self
                .advanced_actions
                .split(',')
                .any(|allowed| allowed.trim() == action)
    }
}

impl Row for ClusterCommon {
    const TABLE: Table = Table::ClusterCommon;

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            (column::CLUSTER_ID, self.cluster_id.as_str().into()),
            (column::ROLE, self.role.as_str().into()),
            (column::IMAGE_ID, self.image_id.as_str().into()),
            (
                column::ADVANCED_ACTIONS,
                self.advanced_actions.as_str().into(),
            ),
        ]
    }
}

/// Association between a category and a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryResource {
    /// Category id.
    pub category_id: String,
    /// Associated resource id (an app, cluster or runtime id).
    pub resource_id: String,
    /// Association status (`enabled` or `disabled`).
    pub status: String,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Last status change.
    pub status_time: DateTime<Utc>,
}

impl CategoryResource {
    /// Create an association stamped with the current time.
    #[must_use]
    pub fn new(
        category_id: impl Into<String>,
        resource_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            category_id: category_id.into(),
            resource_id: resource_id.into(),
            status: status.into(),
            create_time: now,
            status_time: now,
        }
    }
}

impl Row for CategoryResource {
    const TABLE: Table = Table::CategoryResource;

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            (column::CATEGORY_ID, self.category_id.as_str().into()),
            (column::RESOURCE_ID, self.resource_id.as_str().into()),
            (column::STATUS, self.status.as_str().into()),
            (column::CREATE_TIME, self.create_time.into()),
            (column::STATUS_TIME, self.status_time.into()),
        ]
    }
}

/// The lifecycle operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Provision a new cluster.
    CreateCluster,
    /// Tear a cluster down (soft delete).
    DeleteClusters,
    /// Start a stopped cluster.
    StartClusters,
    /// Stop an active cluster.
    StopClusters,
    /// Change the sizing of one role.
    ResizeCluster,
    /// Add nodes to one role.
    AddClusterNodes,
    /// Remove nodes from one role.
    DeleteClusterNodes,
    /// Move to a newer application version.
    UpgradeCluster,
    /// Return to the previous application version.
    RollbackCluster,
    /// Re-provision a soft-deleted cluster.
    RecoverClusters,
    /// Permanently remove a soft-deleted cluster.
    CeaseClusters,
}

impl JobAction {
    /// The persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateCluster => "create_cluster",
            Self::DeleteClusters => "delete_clusters",
            Self::StartClusters => "start_clusters",
            Self::StopClusters => "stop_clusters",
            Self::ResizeCluster => "resize_cluster",
            Self::AddClusterNodes => "add_cluster_nodes",
            Self::DeleteClusterNodes => "delete_cluster_nodes",
            Self::UpgradeCluster => "upgrade_cluster",
            Self::RollbackCluster => "rollback_cluster",
            Self::RecoverClusters => "recover_clusters",
            Self::CeaseClusters => "cease_clusters",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not picked up yet.
    Pending,
    /// Being executed.
    Working,
    /// Finished successfully.
    Successful,
    /// Finished with a failure.
    Failed,
}

impl JobStatus {
    /// The persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    /// True once the job has finished either way.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

impl From<JobStatus> for ColumnValue {
    fn from(value: JobStatus) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

/// New sizing for one role, carried by a resize job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleResize {
    /// Base role name.
    pub role: String,
    /// New CPU cores per node.
    pub cpu: u32,
    /// New memory per node in MiB.
    pub memory: u32,
    /// New volume size per node in GiB.
    pub storage_size: u32,
}

/// A lifecycle job record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub job_id: JobId,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Owning user.
    pub owner: UserId,
    /// Operation performed.
    pub action: JobAction,
    /// Current status.
    pub status: JobStatus,
    /// Cluster status when the job acquired the transition; restored on failure.
    pub prior_status: ClusterStatus,
    /// Nodes the job is scoped to (node-level jobs only).
    #[serde(default)]
    pub node_ids: Vec<NodeId>,
    /// Version to move to (upgrade only).
    #[serde(default)]
    pub target_version_id: Option<String>,
    /// New role sizing (resize only).
    #[serde(default)]
    pub resize: Option<RoleResize>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub status_time: DateTime<Utc>,
}

impl Job {
    /// Create a pending job for `cluster`.
    #[must_use]
    pub fn new(cluster: &Cluster, action: JobAction) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::generate(),
            cluster_id: cluster.cluster_id.clone(),
            owner: cluster.owner.clone(),
            action,
            status: JobStatus::Pending,
            prior_status: cluster.status,
            node_ids: Vec::new(),
            target_version_id: None,
            resize: None,
            created_at: now,
            status_time: now,
        }
    }
}

impl Row for Job {
    const TABLE: Table = Table::Job;

    fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        vec![
            (column::JOB_ID, self.job_id.as_str().into()),
            (column::CLUSTER_ID, self.cluster_id.as_str().into()),
            (column::OWNER, self.owner.as_str().into()),
            (column::ACTION, self.action.as_str().into()),
            (column::STATUS, self.status.into()),
            (column::CREATE_TIME, self.created_at.into()),
            (column::STATUS_TIME, self.status_time.into()),
        ]
    }
}

/// Every row of a new cluster, written in one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBundle {
    /// The cluster row.
    pub cluster: Cluster,
    /// Its nodes.
    pub nodes: Vec<ClusterNode>,
    /// Per-role sizing.
    pub roles: Vec<ClusterRole>,
    /// Per-role image and capabilities.
    pub commons: Vec<ClusterCommon>,
    /// The job that provisions it.
    pub job: Job,
}

/// A partial update of a cluster row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterPatch {
    /// New steady-state status.
    pub status: Option<ClusterStatus>,
    /// New transition marker.
    pub transition_status: Option<TransitionStatus>,
    /// Resolved network.
    pub vpc_id: Option<String>,
    /// Resolved frontgate.
    pub frontgate_id: Option<ClusterId>,
    /// New application version.
    pub version_id: Option<String>,
    /// Version to remember for rollback.
    pub previous_version_id: Option<String>,
}

impl ClusterPatch {
    /// Clear the transition marker and settle on `status`.
    #[must_use]
    pub fn settle(status: ClusterStatus) -> Self {
        Self {
            status: Some(status),
            transition_status: Some(TransitionStatus::Idle),
            ..Self::default()
        }
    }

    /// Apply the patch to a record.
    pub fn apply(&self, cluster: &mut Cluster) {
        if let Some(status) = self.status {
            cluster.status = status;
        }
        if let Some(transition) = self.transition_status {
            cluster.transition_status = transition;
        }
        if let Some(vpc_id) = &self.vpc_id {
            cluster.vpc_id.clone_from(vpc_id);
        }
        if let Some(frontgate_id) = &self.frontgate_id {
            cluster.frontgate_id = Some(frontgate_id.clone());
        }
        if let Some(version_id) = &self.version_id {
            cluster.version_id.clone_from(version_id);
        }
        if let Some(previous) = &self.previous_version_id {
            cluster.previous_version_id = Some(previous.clone());
        }
    }

    /// The SET list this patch writes.
    #[must_use]
    pub fn assignments(&self) -> Vec<(&'static str, ColumnValue)> {
        let mut set = Vec::new();
        if let Some(status) = self.status {
            set.push((column::STATUS, status.into()));
        }
        if let Some(transition) = self.transition_status {
            set.push((column::TRANSITION_STATUS, transition.into()));
        }
        if let Some(vpc_id) = &self.vpc_id {
            set.push((column::VPC_ID, vpc_id.as_str().into()));
        }
        if let Some(frontgate_id) = &self.frontgate_id {
            set.push((column::FRONTGATE_ID, frontgate_id.as_str().into()));
        }
        if let Some(version_id) = &self.version_id {
            set.push((column::VERSION_ID, version_id.as_str().into()));
        }
        if let Some(previous) = &self.previous_version_id {
            set.push((column::PREVIOUS_VERSION_ID, previous.as_str().into()));
        }
        set
    }
}

/// A partial update of one or more node rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    /// New steady-state status.
    pub status: Option<ClusterStatus>,
    /// New transition marker.
    pub transition_status: Option<TransitionStatus>,
    /// Private address.
    pub private_ip: Option<String>,
    /// Provider instance id.
    pub instance_id: Option<String>,
    /// Provider volume id.
    pub volume_id: Option<String>,
}

impl NodePatch {
    /// Clear the transition marker and settle on `status`.
    #[must_use]
    pub fn settle(status: ClusterStatus) -> Self {
        Self {
            status: Some(status),
            transition_status: Some(TransitionStatus::Idle),
            ..Self::default()
        }
    }

    /// Apply the patch to a record.
    pub fn apply(&self, node: &mut ClusterNode) {
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(transition) = self.transition_status {
            node.transition_status = transition;
        }
        if let Some(ip) = &self.private_ip {
            node.private_ip.clone_from(ip);
        }
        if let Some(instance_id) = &self.instance_id {
            node.instance_id.clone_from(instance_id);
        }
        if let Some(volume_id) = &self.volume_id {
            node.volume_id.clone_from(volume_id);
        }
    }

    /// The SET list this patch writes.
    #[must_use]
    pub fn assignments(&self) -> Vec<(&'static str, ColumnValue)> {
        let mut set = Vec::new();
        if let Some(status) = self.status {
            set.push((column::STATUS, status.into()));
        }
        if let Some(transition) = self.transition_status {
            set.push((column::TRANSITION_STATUS, transition.into()));
        }
        if let Some(ip) = &self.private_ip {
            set.push((column::PRIVATE_IP, ip.as_str().into()));
        }
        if let Some(instance_id) = &self.instance_id {
            set.push((column::INSTANCE_ID, instance_id.as_str().into()));
        }
        if let Some(volume_id) = &self.volume_id {
            set.push((column::VOLUME_ID, volume_id.as_str().into()));
        }
        set
    }
}

/// The WHERE clause of a conditional transition write.
///
/// The write succeeds only if the row is owned by `owner`, is idle, and its
/// status is one of `allowed`. An empty `allowed` list accepts any status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCondition {
    /// Required owner.
    pub owner: UserId,
    /// Accepted statuses; empty accepts any.
    pub allowed: Vec<ClusterStatus>,
}

impl TransitionCondition {
    /// Build a condition for `owner` accepting `allowed`.
    #[must_use]
    pub fn new(owner: &UserId, allowed: &[ClusterStatus]) -> Self {
        Self {
            owner: owner.clone(),
            allowed: allowed.to_vec(),
        }
    }

    /// Whether a row with the given owner, status and marker qualifies.
    #[must_use]
    pub fn admits(
        &self,
        owner: &UserId,
        status: ClusterStatus,
        transition: TransitionStatus,
    ) -> bool {
        *owner == self.owner
            && transition.is_idle()
            && (self.allowed.is_empty() || self.allowed.contains(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_role_strips_replica_suffix() {
        assert_eq!(base_role("worker-replica"), "worker");
        assert_eq!(base_role("worker"), "worker");
        assert_eq!(base_role("replica"), "replica");
    }

    #[test]
    fn idle_transition_is_empty() {
        assert_eq!(TransitionStatus::Idle.as_str(), "");
        assert!(TransitionStatus::Idle.is_idle());
        assert!(!TransitionStatus::Creating.is_idle());
        assert_eq!(TransitionStatus::default(), TransitionStatus::Idle);
    }

    #[test]
    fn common_allow_list() {
        let common = ClusterCommon {
            cluster_id: ClusterId::generate(),
            role: "worker".to_string(),
            image_id: "img-1".to_string(),
            advanced_actions: "change_vxnet,scale_horizontal".to_string(),
        };
        assert!(common.allows("scale_horizontal"));
        assert!(!common.allows("scale"));

        let empty = ClusterCommon {
            advanced_actions: String::new(),
            ..common
        };
        assert!(!empty.allows(""));
        assert!(!empty.allows("change_vxnet"));
    }

    #[test]
    fn patch_assignments_follow_set_fields() {
        let patch = ClusterPatch::settle(ClusterStatus::Active);
        let columns: Vec<_> = patch.assignments().into_iter().map(|(c, _)| c).collect();
        assert_eq!(columns, vec![column::STATUS, column::TRANSITION_STATUS]);

        let empty = NodePatch::default();
        assert!(empty.assignments().is_empty());
    }

    #[test]
    fn transition_condition() {
        let owner = UserId::new("usr-a").unwrap();
        let other = UserId::new("usr-b").unwrap();
        let cond = TransitionCondition::new(&owner, &[ClusterStatus::Active]);

        assert!(cond.admits(&owner, ClusterStatus::Active, TransitionStatus::Idle));
        assert!(!cond.admits(&other, ClusterStatus::Active, TransitionStatus::Idle));
        assert!(!cond.admits(&owner, ClusterStatus::Stopped, TransitionStatus::Idle));
        assert!(!cond.admits(&owner, ClusterStatus::Active, TransitionStatus::Creating));

        let any = TransitionCondition::new(&owner, &[]);
        assert!(any.admits(&owner, ClusterStatus::Deleted, TransitionStatus::Idle));
    }
}

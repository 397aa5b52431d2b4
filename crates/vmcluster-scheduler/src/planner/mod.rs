//! Lifecycle planners: turn a cluster snapshot into a task layer chain.
//!
//! Each planner composes the shared sub-layer builders of [`Frame`] in the
//! order its lifecycle verb requires. Builders return `None` when they have
//! nothing to do, and the chain skips them.

mod app;
mod frame;
mod frontgate;

pub use app::AppClusterPlanner;
pub use frame::{bootstrap_user_data, Frame, HOST_CMD_PREFIX};
pub use frontgate::FrontgatePlanner;

use vmcluster_core::{JobId, UserId};
use vmcluster_store::ClusterType;

use crate::layer::TaskLayer;

/// Identity of the job the planned tasks belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    /// Owning job.
    pub job_id: JobId,
    /// Job owner.
    pub owner: UserId,
}

/// How per-task failure tolerance is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep each stage's own tolerance.
    #[default]
    Strict,
    /// Let the graph continue past every task failure.
    Tolerant,
}

impl FailurePolicy {
    /// Resolve the failure-allowed flag for a stage whose default is `stage`.
    #[must_use]
    pub const fn failure_allowed(self, stage: bool) -> bool {
        match self {
            Self::Strict => stage,
            Self::Tolerant => true,
        }
    }
}

/// Plans the four core lifecycle verbs for one cluster.
pub trait LifecyclePlanner {
    /// Provision the cluster from scratch.
    fn create(&self) -> Option<TaskLayer>;

    /// Tear the cluster's resources down.
    fn delete(&self) -> Option<TaskLayer>;

    /// Bring a stopped cluster back up.
    fn start(&self) -> Option<TaskLayer>;

    /// Stop a running cluster, keeping its volumes.
    fn stop(&self) -> Option<TaskLayer>;
}

/// Pick the planner matching the cluster's type.
#[must_use]
pub fn planner_for<'a>(frame: Frame<'a>) -> Box<dyn LifecyclePlanner + 'a> {
    match frame.wrapper().cluster.cluster_type {
        ClusterType::Frontgate => Box::new(FrontgatePlanner::new(frame)),
        ClusterType::Normal => Box::new(AppClusterPlanner::new(frame)),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use vmcluster_core::{ClusterId, JobId, NodeId, UserId};
    use vmcluster_store::{
        Cluster, ClusterCommon, ClusterNode, ClusterRole, ClusterStatus, ClusterType,
        TransitionStatus,
    };

    use super::JobContext;
    use crate::wrapper::ClusterWrapper;

    pub fn job() -> JobContext {
        JobContext {
            job_id: JobId::generate_deterministic("plan", 1),
            owner: UserId::new("usr-1").unwrap(),
        }
    }

    /// A cluster with `nodes` worker nodes (every other one a replica).
    pub fn wrapper(cluster_type: ClusterType, status: ClusterStatus, nodes: usize) -> ClusterWrapper {
        let now = Utc::now();
        let owner = UserId::new("usr-1").unwrap();
        let cluster = Cluster {
            cluster_id: ClusterId::generate_deterministic("plan", 1),
            name: "plan".to_string(),
            owner: owner.clone(),
            app_id: "app-1".to_string(),
            version_id: "appv-1".to_string(),
            previous_version_id: None,
            runtime_id: "rt-1".to_string(),
            cluster_type,
            status,
            transition_status: TransitionStatus::Idle,
            vpc_id: "vpc-1".to_string(),
            subnet_id: "vxnet-1".to_string(),
            zone: "zone-1".to_string(),
            frontgate_id: None,
            created_at: now,
            status_time: now,
        };
        let nodes = (0..nodes)
            .map(|i| ClusterNode {
                node_id: NodeId::generate_deterministic("plan", i as u64),
                cluster_id: cluster.cluster_id.clone(),
                owner: owner.clone(),
                role: if i % 2 == 0 { "worker" } else { "worker-replica" }.to_string(),
                status,
                transition_status: TransitionStatus::Idle,
                private_ip: format!("10.0.0.{}", i + 10),
                instance_id: format!("i-{i}"),
                volume_id: format!("vol-{i}"),
                created_at: now,
                status_time: now,
            })
            .collect();
        let roles = vec![ClusterRole {
            cluster_id: cluster.cluster_id.clone(),
            role: "worker".to_string(),
            cpu: 1,
            memory: 1024,
            storage_size: 10,
            mount_point: "/data".to_string(),
            count: 3,
        }];
        let commons = vec![ClusterCommon {
            cluster_id: cluster.cluster_id.clone(),
            role: "worker".to_string(),
            image_id: "img-fg".to_string(),
            advanced_actions: String::new(),
        }];
        ClusterWrapper::new(cluster, nodes, roles, commons)
    }
}

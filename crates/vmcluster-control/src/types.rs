//! Request, response and configuration types for control plane operations.

use serde::{Deserialize, Serialize};
use vmcluster_core::ClusterId;
use vmcluster_scheduler::{FailurePolicy, PlannerConfig, TaskLayer};
use vmcluster_store::Job;

/// Sizing and image settings of one role in a create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConf {
    /// Base role name.
    pub role: String,
    /// CPU cores per node.
    pub cpu: u32,
    /// Memory per node in MiB.
    pub memory: u32,
    /// Data volume size in GiB; zero means no volume.
    #[serde(default)]
    pub storage_size: u32,
    /// Mount point of the data volume.
    #[serde(default)]
    pub mount_point: String,
    /// Number of primary nodes.
    pub count: u32,
    /// Number of replica nodes; these carry the `-replica` role suffix.
    #[serde(default)]
    pub replicas: u32,
    /// Image override; defaults to the runtime image.
    #[serde(default)]
    pub image_id: Option<String>,
    /// Comma-separated advanced actions the role supports.
    #[serde(default)]
    pub advanced_actions: String,
}

/// Request to create a new cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Application the cluster runs.
    pub app_id: String,
    /// Application version.
    pub version_id: String,
    /// Runtime to deploy on.
    pub runtime_id: String,
    /// Subnet the nodes attach to.
    #[serde(default)]
    pub subnet_id: String,
    /// Per-role configuration.
    #[serde(default)]
    pub roles: Vec<RoleConf>,
}

/// Request naming a batch of clusters.
///
/// Shared by delete, start, stop, recover and cease.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterIdsRequest {
    /// Target clusters.
    pub cluster_id: Vec<String>,
}

impl ClusterIdsRequest {
    /// Build a request for the given ids.
    #[must_use]
    pub fn new<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self {
            cluster_id: ids.into_iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// Request to delete clusters.
pub type DeleteClustersRequest = ClusterIdsRequest;
/// Request to start clusters.
pub type StartClustersRequest = ClusterIdsRequest;
/// Request to stop clusters.
pub type StopClustersRequest = ClusterIdsRequest;
/// Request to recover soft-deleted clusters.
pub type RecoverClustersRequest = ClusterIdsRequest;
/// Request to permanently remove soft-deleted clusters.
pub type CeaseClustersRequest = ClusterIdsRequest;

/// Request to move a cluster to another application version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeClusterRequest {
    /// Target cluster.
    pub cluster_id: String,
    /// New version.
    pub version_id: String,
}

/// Request to restore a cluster's previous application version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackClusterRequest {
    /// Target cluster.
    pub cluster_id: String,
}

/// Request to change the sizing of one role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResizeClusterRequest {
    /// Target cluster.
    pub cluster_id: String,
    /// Role to resize.
    pub role: String,
    /// New CPU cores per node.
    pub cpu: u32,
    /// New memory per node in MiB.
    pub memory: u32,
    /// New volume size in GiB; zero keeps the current size.
    #[serde(default)]
    pub storage_size: u32,
}

/// Request to add nodes to one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddClusterNodesRequest {
    /// Target cluster.
    pub cluster_id: String,
    /// Role of the new nodes.
    pub role: String,
    /// Number of nodes to add.
    #[serde(default = "AddClusterNodesRequest::default_count")]
    pub count: u32,
}

impl AddClusterNodesRequest {
    const fn default_count() -> u32 {
        1
    }
}

/// Request to remove specific nodes of one role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteClusterNodesRequest {
    /// Target cluster.
    pub cluster_id: String,
    /// Role the nodes belong to.
    pub role: String,
    /// Nodes to remove.
    pub node_id: Vec<String>,
}

/// A job accepted by the control plane, with the graph that carries it out.
///
/// `graph` is `None` for metadata-only operations and for clusters with
/// nothing to execute; such jobs are completed directly.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    /// The persisted job.
    pub job: Job,
    /// Tasks to execute, layer by layer.
    pub graph: Option<TaskLayer>,
}

/// Result of a create request.
#[derive(Debug, Clone)]
pub struct CreateClusterOutcome {
    /// The new cluster.
    pub cluster_id: ClusterId,
    /// Job provisioning the cluster.
    pub job: ScheduledJob,
    /// Job provisioning a new frontgate for the cluster's VPC, if one was
    /// needed. Run it before `job`.
    pub frontgate_job: Option<ScheduledJob>,
}

/// A cloud runtime clusters can be deployed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime identifier.
    pub runtime_id: String,
    /// Provider name.
    #[serde(default = "RuntimeConfig::default_provider")]
    pub provider: String,
    /// API endpoint.
    pub url: String,
    /// Availability zone.
    pub zone: String,
}

impl RuntimeConfig {
    fn default_provider() -> String {
        "static".to_string()
    }
}

/// Base image for one runtime endpoint and zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeImage {
    /// Runtime endpoint.
    pub url: String,
    /// Availability zone.
    pub zone: String,
    /// Image id.
    pub image_id: String,
}

/// A subnet known to the static provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// Subnet id.
    pub subnet_id: String,
    /// VPC the subnet belongs to; empty if the VPC has no external routing.
    #[serde(default)]
    pub vpc_id: String,
    /// Availability zone.
    pub zone: String,
}

/// Configuration for the control plane service.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Planner and task execution settings.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// How task failures are tolerated.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Known runtimes.
    #[serde(default)]
    pub runtimes: Vec<RuntimeConfig>,

    /// Base images per runtime endpoint and zone.
    #[serde(default)]
    pub runtime_images: Vec<RuntimeImage>,

    /// Subnets served by the static provider.
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,

    /// Maximum nodes per cluster accepted by the static provider.
    #[serde(default = "ControlConfig::default_max_nodes_per_cluster")]
    pub max_nodes_per_cluster: u32,

    /// Number of nodes in a new frontgate cluster.
    #[serde(default = "ControlConfig::default_frontgate_node_count")]
    pub frontgate_node_count: u32,

    /// CPU cores per frontgate node.
    #[serde(default = "ControlConfig::default_frontgate_cpu")]
    pub frontgate_cpu: u32,

    /// Memory per frontgate node in MiB.
    #[serde(default = "ControlConfig::default_frontgate_memory")]
    pub frontgate_memory: u32,

    /// Frontgate data volume size in GiB.
    #[serde(default = "ControlConfig::default_frontgate_storage_size")]
    pub frontgate_storage_size: u32,

    /// Frontgate data volume mount point.
    #[serde(default = "ControlConfig::default_frontgate_mount_point")]
    pub frontgate_mount_point: String,
}

impl ControlConfig {
    const fn default_max_nodes_per_cluster() -> u32 {
        64
    }

    const fn default_frontgate_node_count() -> u32 {
        1
    }

    const fn default_frontgate_cpu() -> u32 {
        1
    }

    const fn default_frontgate_memory() -> u32 {
        1024
    }

    const fn default_frontgate_storage_size() -> u32 {
        10
    }

    fn default_frontgate_mount_point() -> String {
        "/data".to_string()
    }

    /// Look up a runtime by id.
    #[must_use]
    pub fn runtime(&self, runtime_id: &str) -> Option<&RuntimeConfig> {
        self.runtimes.iter().find(|r| r.runtime_id == runtime_id)
    }

    /// Look up the base image for a runtime endpoint and zone.
    #[must_use]
    pub fn runtime_image(&self, url: &str, zone: &str) -> Option<&str> {
        self.runtime_images
            .iter()
            .find(|i| i.url == url && i.zone == zone)
            .map(|i| i.image_id.as_str())
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            failure_policy: FailurePolicy::default(),
            runtimes: Vec::new(),
            runtime_images: Vec::new(),
            subnets: Vec::new(),
            max_nodes_per_cluster: Self::default_max_nodes_per_cluster(),
            frontgate_node_count: Self::default_frontgate_node_count(),
            frontgate_cpu: Self::default_frontgate_cpu(),
            frontgate_memory: Self::default_frontgate_memory(),
            frontgate_storage_size: Self::default_frontgate_storage_size(),
            frontgate_mount_point: Self::default_frontgate_mount_point(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.frontgate_node_count, 1);
        assert_eq!(config.failure_policy, FailurePolicy::Strict);
        assert_eq!(config.planner.pilot_port, 9110);
    }

    #[test]
    fn control_config_from_json() {
        let config: ControlConfig = serde_json::from_str(
            r#"{
                "failure_policy": "tolerant",
                "runtimes": [{"runtime_id": "rt-1", "url": "https://api.local", "zone": "z1"}],
                "runtime_images": [{"url": "https://api.local", "zone": "z1", "image_id": "img-1"}],
                "planner": {"pilot_host": "10.0.0.2"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::Tolerant);
        assert_eq!(config.runtime("rt-1").unwrap().provider, "static");
        assert_eq!(config.runtime_image("https://api.local", "z1"), Some("img-1"));
        assert_eq!(config.runtime_image("https://api.local", "z2"), None);
        assert_eq!(config.planner.pilot_host, "10.0.0.2");
        assert_eq!(config.planner.frontgate_port, 9111);
    }

    #[test]
    fn add_nodes_count_defaults_to_one() {
        let req: AddClusterNodesRequest =
            serde_json::from_str(r#"{"cluster_id": "cl-1", "role": "worker"}"#).unwrap();
        assert_eq!(req.count, 1);
    }
}

//! Table, column family and column name definitions.
//!
//! Column names are part of the change-capture contract: the event
//! dispatcher maps table names to the columns it reports, so the names here
//! must stay in sync with the records in [`crate::types`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// The persisted tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Cluster records.
    Cluster,
    /// Cluster node records.
    ClusterNode,
    /// Per-role sizing and mount configuration.
    ClusterRole,
    /// Per-role image and advanced-action configuration.
    ClusterCommon,
    /// Category/resource association rows.
    CategoryResource,
    /// Lifecycle jobs.
    Job,
}

impl Table {
    /// Every table, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Cluster,
        Self::ClusterNode,
        Self::ClusterRole,
        Self::ClusterCommon,
        Self::CategoryResource,
        Self::Job,
    ];

    /// The table name as used in change events and column family names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::ClusterNode => "cluster_node",
            Self::ClusterRole => "cluster_role",
            Self::ClusterCommon => "cluster_common",
            Self::CategoryResource => "category_resource",
            Self::Job => "job",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column names shared by the records and the mutation descriptions.
pub mod column {
    /// Primary key of `cluster`; foreign key elsewhere.
    pub const CLUSTER_ID: &str = "cluster_id";
    /// Primary key of `cluster_node`.
    pub const NODE_ID: &str = "node_id";
    /// Primary key of `job`.
    pub const JOB_ID: &str = "job_id";
    /// Owning user.
    pub const OWNER: &str = "owner";
    /// Steady-state status.
    pub const STATUS: &str = "status";
    /// In-progress lifecycle verb, empty when idle.
    pub const TRANSITION_STATUS: &str = "transition_status";
    /// Human-readable name.
    pub const NAME: &str = "name";
    /// Application id.
    pub const APP_ID: &str = "app_id";
    /// Application version id.
    pub const VERSION_ID: &str = "version_id";
    /// Version a cluster was upgraded from.
    pub const PREVIOUS_VERSION_ID: &str = "previous_version_id";
    /// Runtime the cluster is deployed on.
    pub const RUNTIME_ID: &str = "runtime_id";
    /// `normal` or `frontgate`.
    pub const CLUSTER_TYPE: &str = "cluster_type";
    /// Network the cluster lives in.
    pub const VPC_ID: &str = "vpc_id";
    /// Subnet the cluster lives in.
    pub const SUBNET_ID: &str = "subnet_id";
    /// Availability zone.
    pub const ZONE: &str = "zone";
    /// Management sidecar cluster supervising this cluster.
    pub const FRONTGATE_ID: &str = "frontgate_id";
    /// Logical role name.
    pub const ROLE: &str = "role";
    /// Private address of a node.
    pub const PRIVATE_IP: &str = "private_ip";
    /// Provider instance id of a node.
    pub const INSTANCE_ID: &str = "instance_id";
    /// Provider volume id of a node.
    pub const VOLUME_ID: &str = "volume_id";
    /// CPU cores per node.
    pub const CPU: &str = "cpu";
    /// Memory per node in MiB.
    pub const MEMORY: &str = "memory";
    /// Volume size per node in GiB.
    pub const STORAGE_SIZE: &str = "storage_size";
    /// Where the data volume is mounted.
    pub const MOUNT_POINT: &str = "mount_point";
    /// Number of nodes for the role.
    pub const COUNT: &str = "count";
    /// Machine image for the role.
    pub const IMAGE_ID: &str = "image_id";
    /// Comma-separated advanced-action allow-list.
    pub const ADVANCED_ACTIONS: &str = "advanced_actions";
    /// Category of a category/resource association.
    pub const CATEGORY_ID: &str = "category_id";
    /// Resource of a category/resource association.
    pub const RESOURCE_ID: &str = "resource_id";
    /// Lifecycle action of a job.
    pub const ACTION: &str = "action";
    /// Creation timestamp.
    pub const CREATE_TIME: &str = "create_time";
    /// Last status change timestamp.
    pub const STATUS_TIME: &str = "status_time";
}

/// Column family names for the `RocksDB` database.
pub mod cf {
    use super::Table;

    /// Primary cluster records, keyed by `cluster_id`.
    pub const CLUSTER: &str = Table::Cluster.name();

    /// Primary node records, keyed by `node_id`.
    pub const CLUSTER_NODE: &str = Table::ClusterNode.name();

    /// Role configuration, keyed by `cluster_id \0 role`.
    pub const CLUSTER_ROLE: &str = Table::ClusterRole.name();

    /// Common role configuration, keyed by `cluster_id \0 role`.
    pub const CLUSTER_COMMON: &str = Table::ClusterCommon.name();

    /// Category associations, keyed by `category_id \0 resource_id`.
    pub const CATEGORY_RESOURCE: &str = Table::CategoryResource.name();

    /// Job records, keyed by `job_id`.
    pub const JOB: &str = Table::Job.name();

    /// Index: clusters by owner, keyed by `owner \0 cluster_id`.
    pub const CLUSTERS_BY_OWNER: &str = "clusters_by_owner";

    /// Index: nodes by cluster, keyed by `cluster_id \0 node_id`.
    pub const NODES_BY_CLUSTER: &str = "nodes_by_cluster";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::CLUSTER,
        cf::CLUSTER_NODE,
        cf::CLUSTER_ROLE,
        cf::CLUSTER_COMMON,
        cf::CATEGORY_RESOURCE,
        cf::JOB,
        cf::CLUSTERS_BY_OWNER,
        cf::NODES_BY_CLUSTER,
    ]
}

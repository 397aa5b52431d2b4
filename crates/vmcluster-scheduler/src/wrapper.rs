//! In-memory cluster topology snapshot handed to the planners.

use std::collections::{BTreeMap, HashMap};

use vmcluster_core::NodeId;
use vmcluster_store::{base_role, Cluster, ClusterCommon, ClusterNode, ClusterRole};

/// One cluster with its nodes and per-role configuration.
///
/// Nodes are kept ordered by id so every fan-out layer lists its tasks in
/// the same order. Assembled per operation and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterWrapper {
    /// The cluster row.
    pub cluster: Cluster,
    /// Nodes keyed by id.
    pub nodes: BTreeMap<NodeId, ClusterNode>,
    /// Sizing per base role.
    pub roles: HashMap<String, ClusterRole>,
    /// Image and capabilities per base role.
    pub commons: HashMap<String, ClusterCommon>,
}

impl ClusterWrapper {
    /// Assemble a wrapper from loaded rows.
    #[must_use]
    pub fn new(
        cluster: Cluster,
        nodes: Vec<ClusterNode>,
        roles: Vec<ClusterRole>,
        commons: Vec<ClusterCommon>,
    ) -> Self {
        Self {
            cluster,
            nodes: nodes.into_iter().map(|n| (n.node_id.clone(), n)).collect(),
            roles: roles.into_iter().map(|r| (r.role.clone(), r)).collect(),
            commons: commons.into_iter().map(|c| (c.role.clone(), c)).collect(),
        }
    }

    /// Every node id, in order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Node ids whose role resolves to `role`, replicas included.
    #[must_use]
    pub fn node_ids_with_role(&self, role: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| base_role(&n.role) == role)
            .map(|n| n.node_id.clone())
            .collect()
    }

    /// Sizing for the role of `node_id`, with any replica suffix stripped.
    #[must_use]
    pub fn role_of(&self, node_id: &NodeId) -> Option<&ClusterRole> {
        let node = self.nodes.get(node_id)?;
        self.roles.get(base_role(&node.role))
    }

    /// Image and capabilities for the role of `node_id`.
    #[must_use]
    pub fn common_of(&self, node_id: &NodeId) -> Option<&ClusterCommon> {
        let node = self.nodes.get(node_id)?;
        self.commons.get(base_role(&node.role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vmcluster_core::{ClusterId, UserId};
    use vmcluster_store::{ClusterStatus, ClusterType, TransitionStatus};

    fn wrapper() -> ClusterWrapper {
        let now = Utc::now();
        let owner = UserId::new("usr-1").unwrap();
        let cluster = Cluster {
            cluster_id: ClusterId::generate_deterministic("wrapper", 1),
            name: "w".to_string(),
            owner: owner.clone(),
            app_id: "app-1".to_string(),
            version_id: "appv-1".to_string(),
            previous_version_id: None,
            runtime_id: "rt-1".to_string(),
            cluster_type: ClusterType::Normal,
            status: ClusterStatus::Active,
            transition_status: TransitionStatus::Idle,
            vpc_id: "vpc-1".to_string(),
            subnet_id: "vxnet-1".to_string(),
            zone: "zone-1".to_string(),
            frontgate_id: None,
            created_at: now,
            status_time: now,
        };
        let node = |label: &str, role: &str| ClusterNode {
            node_id: NodeId::generate_deterministic(label, 1),
            cluster_id: cluster.cluster_id.clone(),
            owner: owner.clone(),
            role: role.to_string(),
            status: ClusterStatus::Active,
            transition_status: TransitionStatus::Idle,
            private_ip: String::new(),
            instance_id: String::new(),
            volume_id: String::new(),
            created_at: now,
            status_time: now,
        };
        let nodes = vec![node("n1", "worker"), node("n2", "worker-replica")];
        let roles = vec![ClusterRole {
            cluster_id: cluster.cluster_id.clone(),
            role: "worker".to_string(),
            cpu: 2,
            memory: 4096,
            storage_size: 20,
            mount_point: "/data".to_string(),
            count: 2,
        }];
        let commons = vec![ClusterCommon {
            cluster_id: cluster.cluster_id.clone(),
            role: "worker".to_string(),
            image_id: "img-1".to_string(),
            advanced_actions: String::new(),
        }];
        ClusterWrapper::new(cluster, nodes, roles, commons)
    }

    #[test]
    fn replica_resolves_to_base_role() {
        let wrapper = wrapper();
        let ids = wrapper.node_ids();
        let (plain, replica) = ids
            .iter()
            .partition::<Vec<_>, _>(|id| wrapper.nodes[*id].role == "worker");

        assert_eq!(wrapper.role_of(plain[0]), wrapper.role_of(replica[0]));
        assert_eq!(wrapper.common_of(plain[0]), wrapper.common_of(replica[0]));
        assert_eq!(wrapper.role_of(replica[0]).unwrap().mount_point, "/data");
        assert_eq!(wrapper.node_ids_with_role("worker").len(), 2);
    }

    #[test]
    fn node_ids_are_ordered() {
        let wrapper = wrapper();
        let ids = wrapper.node_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}

//! Planner for application clusters, whose nodes run a drone agent.

use serde::Serialize;
use vmcluster_core::NodeId;
use vmcluster_store::{ClusterNode, ClusterStatus, RoleResize};

use super::frame::{bootstrap_user_data, Frame};
use super::LifecyclePlanner;
use crate::layer::{GraphBuilder, TaskLayer};

#[derive(Debug, Serialize)]
struct DroneConf<'a> {
    id: &'a str,
    listen_port: u16,
    node_id: &'a str,
}

/// Builds task graphs for application clusters.
///
/// Beyond the four core verbs this planner handles node subsets
/// (add and delete nodes) and in-place resize.
#[derive(Debug, Clone, Copy)]
pub struct AppClusterPlanner<'a> {
    frame: Frame<'a>,
}

impl<'a> AppClusterPlanner<'a> {
    /// Create a planner over `frame`.
    #[must_use]
    pub fn new(frame: Frame<'a>) -> Self {
        Self { frame }
    }

    /// Bootstrap user data for one drone node.
    #[must_use]
    pub fn user_data(&self, node: &ClusterNode) -> String {
        let wrapper = self.frame.wrapper();
        let config = self.frame.config();
        let cluster_id = wrapper.cluster.cluster_id.to_string();
        let node_id = node.node_id.to_string();
        let conf = DroneConf {
            id: &cluster_id,
            listen_port: config.drone_port,
            node_id: &node_id,
        };
        let conf_json = serde_json::to_string(&conf).unwrap_or_default();

        let image_id = wrapper
            .common_of(&node.node_id)
            .map_or("", |c| c.image_id.as_str());
        let mount_point = wrapper
            .role_of(&node.node_id)
            .map_or("", |r| r.mount_point.as_str());

        bootstrap_user_data(image_id, mount_point, &config.drone_conf_file, &conf_json)
    }

    fn provision(&self, ids: &[NodeId]) -> Option<TaskLayer> {
        GraphBuilder::new()
            .then(self.frame.create_volumes_layer(ids, false))
            .then(self.frame.run_instances_layer(ids, false, |node| self.user_data(node)))
            .then(self.frame.ping_drone_layer(ids, false))
            .then(self.frame.format_and_mount_layer(ids, false))
            .build()
    }

    fn teardown(&self, ids: &[NodeId]) -> Option<TaskLayer> {
        let mut graph = GraphBuilder::new();
        if self.frame.wrapper().cluster.status == ClusterStatus::Active {
            graph = graph
                .then(self.frame.umount_layer(ids, true))
                .then(self.frame.stop_instances_layer(ids, true))
                .then(self.frame.detach_volumes_layer(ids, false));
        }
        graph
            .then(self.frame.delete_instances_layer(ids, false))
            .then(self.frame.delete_volumes_layer(ids, false))
            .build()
    }

    /// Provision newly added nodes.
    #[must_use]
    pub fn add_nodes(&self, node_ids: &[NodeId]) -> Option<TaskLayer> {
        self.provision(node_ids)
    }

    /// Tear down a subset of nodes.
    #[must_use]
    pub fn delete_nodes(&self, node_ids: &[NodeId]) -> Option<TaskLayer> {
        self.teardown(node_ids)
    }

    /// Apply new sizes to every node of the resized role.
    #[must_use]
    pub fn resize(&self, resize: &RoleResize) -> Option<TaskLayer> {
        let ids = self.frame.wrapper().node_ids_with_role(&resize.role);
        GraphBuilder::new()
            .then(self.frame.resize_instances_layer(&ids, resize, false))
            .then(self.frame.resize_volumes_layer(&ids, resize, false))
            .build()
    }
}

impl LifecyclePlanner for AppClusterPlanner<'_> {
    fn create(&self) -> Option<TaskLayer> {
        self.provision(&self.frame.wrapper().node_ids())
    }

    fn delete(&self) -> Option<TaskLayer> {
        self.teardown(&self.frame.wrapper().node_ids())
    }

    fn start(&self) -> Option<TaskLayer> {
        let ids = self.frame.wrapper().node_ids();
        GraphBuilder::new()
            .then(self.frame.attach_volumes_layer(&ids, false))
            .then(self.frame.start_instances_layer(&ids, false))
            .then(self.frame.ping_drone_layer(&ids, false))
            .build()
    }

    fn stop(&self) -> Option<TaskLayer> {
        let ids = self.frame.wrapper().node_ids();
        GraphBuilder::new()
            .then(self.frame.umount_layer(&ids, true))
            .then(self.frame.detach_volumes_layer(&ids, false))
            .then(self.frame.stop_instances_layer(&ids, false))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::planner::{fixtures, planner_for, FailurePolicy};
    use crate::task::{Directive, TaskAction};
    use vmcluster_store::ClusterType;

    fn actions(graph: &TaskLayer) -> Vec<TaskAction> {
        graph.layers().map(|l| l.tasks()[0].action).collect()
    }

    #[test]
    fn create_pings_drones_before_mount() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Pending, 3);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = planner_for(frame).create().unwrap();
        assert_eq!(
            actions(&graph),
            vec![
                TaskAction::CreateVolume,
                TaskAction::RunInstance,
                TaskAction::PingDrone,
                TaskAction::FormatAndMountVolume,
            ]
        );
        assert!(graph.layers().all(|l| l.tasks().len() == 3));
    }

    #[test]
    fn tasks_follow_node_id_order() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Stopped, 4);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = AppClusterPlanner::new(frame).start().unwrap();
        let expected: Vec<String> = wrapper.node_ids().iter().map(ToString::to_string).collect();
        for layer in graph.layers() {
            let ids: Vec<String> = layer.tasks().iter().map(|t| t.node_id.clone()).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn add_nodes_covers_only_the_subset() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Active, 4);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
        let subset = &wrapper.node_ids()[2..];

        let graph = AppClusterPlanner::new(frame).add_nodes(subset).unwrap();
        assert_eq!(graph.layer_count(), 4);
        assert_eq!(graph.task_count(), 8);
    }

    #[test]
    fn delete_nodes_of_active_cluster_stops_first() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Active, 2);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
        let subset = &wrapper.node_ids()[..1];

        let graph = AppClusterPlanner::new(frame).delete_nodes(subset).unwrap();
        assert_eq!(
            actions(&graph),
            vec![
                TaskAction::UmountVolume,
                TaskAction::StopInstance,
                TaskAction::DetachVolume,
                TaskAction::DeleteInstance,
                TaskAction::DeleteVolume,
            ]
        );
        assert_eq!(graph.task_count(), 5);
    }

    #[test]
    fn unknown_node_ids_yield_no_graph() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Stopped, 2);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let stranger = NodeId::generate_deterministic("stranger", 9);
        assert!(AppClusterPlanner::new(frame).delete_nodes(&[stranger]).is_none());
    }

    #[test]
    fn resize_targets_role_and_replicas() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Stopped, 3);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
        let resize = RoleResize {
            role: "worker".to_string(),
            cpu: 4,
            memory: 8192,
            storage_size: 50,
        };

        let graph = AppClusterPlanner::new(frame).resize(&resize).unwrap();
        assert_eq!(
            actions(&graph),
            vec![TaskAction::ResizeInstance, TaskAction::ResizeVolume]
        );
        assert_eq!(graph.task_count(), 6);
        let Directive::Instance(instance) = &graph.tasks()[0].directive else {
            panic!("expected an instance directive");
        };
        assert_eq!((instance.cpu, instance.memory), (4, 8192));
    }

    #[test]
    fn resize_without_storage_change_skips_volumes() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Stopped, 1);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
        let resize = RoleResize {
            role: "worker".to_string(),
            cpu: 2,
            memory: 2048,
            storage_size: 0,
        };

        let graph = AppClusterPlanner::new(frame).resize(&resize).unwrap();
        assert_eq!(graph.layer_count(), 1);
    }

    #[test]
    fn drone_user_data_uses_drone_conf() {
        let wrapper = fixtures::wrapper(ClusterType::Normal, ClusterStatus::Pending, 1);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
        let node = wrapper.nodes.values().next().unwrap();

        let data = AppClusterPlanner::new(frame).user_data(node);
        assert!(data.starts_with("IMAGE=\"img-fg\"\nMOUNT_POINT=\"/data\"\nFILE_NAME=\"drone.conf\"\n"));
        assert!(data.contains("\\\\\"listen_port\\\\\":9112"));
    }
}

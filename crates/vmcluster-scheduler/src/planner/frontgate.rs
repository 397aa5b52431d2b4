//! Planner for frontgate clusters, the per-VPC management sidecar.

use serde::Serialize;
use vmcluster_core::NodeId;
use vmcluster_store::{ClusterNode, ClusterStatus};

use super::frame::{bootstrap_user_data, Frame, HOST_CMD_PREFIX};
use super::LifecyclePlanner;
use crate::layer::{GraphBuilder, TaskLayer};
use crate::task::{Directive, FrontgateEndpoint, Meta, RunCommandDirective, TaskAction, TaskTarget};

/// Command that removes the container the frontgate image boots with.
const REMOVE_DEFAULT_CONTAINER: &str = "docker rm -f default";

/// Config file body written by the frontgate bootstrap.
///
/// Field order is part of the agent contract.
#[derive(Debug, Serialize)]
struct FrontgateConf<'a> {
    id: &'a str,
    listen_port: u16,
    node_id: &'a str,
    pilot_host: &'a str,
    pilot_port: u16,
}

/// Builds task graphs for frontgate clusters.
#[derive(Debug, Clone, Copy)]
pub struct FrontgatePlanner<'a> {
    frame: Frame<'a>,
}

impl<'a> FrontgatePlanner<'a> {
    /// Create a planner over `frame`.
    #[must_use]
    pub fn new(frame: Frame<'a>) -> Self {
        Self { frame }
    }

    /// Bootstrap user data for one frontgate node.
    #[must_use]
    pub fn user_data(&self, node: &ClusterNode) -> String {
        let wrapper = self.frame.wrapper();
        let config = self.frame.config();
        let cluster_id = wrapper.cluster.cluster_id.to_string();
        let node_id = node.node_id.to_string();
        let conf = FrontgateConf {
            id: &cluster_id,
            listen_port: config.frontgate_port,
            node_id: &node_id,
            pilot_host: &config.pilot_host,
            pilot_port: config.pilot_port,
        };
        // Serializing a struct of strings and integers cannot fail.
        let conf_json = serde_json::to_string(&conf).unwrap_or_default();

        let image_id = wrapper
            .common_of(&node.node_id)
            .map_or("", |c| c.image_id.as_str());
        let mount_point = wrapper
            .role_of(&node.node_id)
            .map_or("", |r| r.mount_point.as_str());

        bootstrap_user_data(image_id, mount_point, &config.frontgate_conf_file, &conf_json)
    }

    fn ping_layer(&self) -> Option<TaskLayer> {
        self.frame.ping_frontgate_layer(false)
    }

    fn set_config_layer(&self, node_ids: &[NodeId]) -> Option<TaskLayer> {
        let cluster_id = self.frame.wrapper().cluster.cluster_id.to_string();
        self.frame.fan_out(
            node_ids,
            TaskAction::SetFrontgateConfig,
            TaskTarget::Pilot,
            false,
            |_| {
                Directive::Meta(Meta {
                    cluster_id: cluster_id.clone(),
                    node_id: None,
                })
            },
        )
    }

    fn remove_container_layer(&self, node_ids: &[NodeId]) -> Option<TaskLayer> {
        let config = self.frame.config();
        let cluster_id = self.frame.wrapper().cluster.cluster_id.to_string();
        self.frame.fan_out(
            node_ids,
            TaskAction::RemoveContainerOnFrontgate,
            TaskTarget::Pilot,
            false,
            |node| {
                Directive::RunCommand(RunCommandDirective {
                    endpoint: FrontgateEndpoint {
                        frontgate_id: cluster_id.clone(),
                        frontgate_node_id: node.node_id.to_string(),
                        node_ip: node.private_ip.clone(),
                        node_port: config.frontgate_port,
                    },
                    command: format!("{HOST_CMD_PREFIX} \"{REMOVE_DEFAULT_CONTAINER}\""),
                    timeout_seconds: config.remove_container_timeout_seconds,
                })
            },
        )
    }
}

impl LifecyclePlanner for FrontgatePlanner<'_> {
    fn create(&self) -> Option<TaskLayer> {
        let ids = self.frame.wrapper().node_ids();
        GraphBuilder::new()
            .then(self.frame.create_volumes_layer(&ids, false))
            .then(self.frame.run_instances_layer(&ids, false, |node| self.user_data(node)))
            .then(self.ping_layer())
            .then(self.frame.format_and_mount_layer(&ids, false))
            .then(self.remove_container_layer(&ids))
            .then(self.ping_layer())
            .then(self.set_config_layer(&ids))
            .build()
    }

    fn delete(&self) -> Option<TaskLayer> {
        let wrapper = self.frame.wrapper();
        let ids = wrapper.node_ids();
        let mut graph = GraphBuilder::new();
        if wrapper.cluster.status == ClusterStatus::Active {
            graph = graph
                .then(self.frame.umount_layer(&ids, true))
                .then(self.frame.stop_instances_layer(&ids, true))
                .then(self.frame.detach_volumes_layer(&ids, false));
        }
        graph
            .then(self.frame.delete_instances_layer(&ids, false))
            .then(self.frame.delete_volumes_layer(&ids, false))
            .build()
    }

    fn start(&self) -> Option<TaskLayer> {
        let ids = self.frame.wrapper().node_ids();
        GraphBuilder::new()
            .then(self.frame.attach_volumes_layer(&ids, false))
            .then(self.frame.start_instances_layer(&ids, false))
            .then(self.ping_layer())
            .then(self.set_config_layer(&ids))
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
    use crate::planner::fixtures;
    use crate::planner::FailurePolicy;
    use vmcluster_store::ClusterType;

    fn actions(graph: &TaskLayer) -> Vec<(TaskAction, usize)> {
        graph
            .layers()
            .map(|l| (l.tasks()[0].action, l.tasks().len()))
            .collect()
    }

    #[test]
    fn create_has_seven_layers() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Pending, 3);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = FrontgatePlanner::new(frame).create().unwrap();
        assert_eq!(
            actions(&graph),
            vec![
                (TaskAction::CreateVolume, 3),
                (TaskAction::RunInstance, 3),
                (TaskAction::PingFrontgate, 1),
                (TaskAction::FormatAndMountVolume, 3),
                (TaskAction::RemoveContainerOnFrontgate, 3),
                (TaskAction::PingFrontgate, 1),
                (TaskAction::SetFrontgateConfig, 3),
            ]
        );
        assert!(graph.layers().flat_map(|l| l.tasks()).all(|t| !t.failure_allowed));

        let ping = &graph.layers().nth(2).unwrap().tasks()[0];
        assert_eq!(ping.node_id, wrapper.cluster.cluster_id.to_string());
    }

    #[test]
    fn delete_of_inactive_cluster_skips_teardown_prefix() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Stopped, 3);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = FrontgatePlanner::new(frame).delete().unwrap();
        assert_eq!(
            actions(&graph),
            vec![(TaskAction::DeleteInstance, 3), (TaskAction::DeleteVolume, 3)]
        );
    }

    #[test]
    fn delete_of_active_cluster_tolerates_umount_and_stop() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Active, 2);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = FrontgatePlanner::new(frame).delete().unwrap();
        let allowed: Vec<bool> = graph.layers().map(|l| l.tasks()[0].failure_allowed).collect();
        assert_eq!(allowed, vec![true, true, false, false, false]);
    }

    #[test]
    fn stop_unmounts_before_detach() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Active, 1);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = FrontgatePlanner::new(frame).stop().unwrap();
        assert_eq!(
            actions(&graph),
            vec![
                (TaskAction::UmountVolume, 1),
                (TaskAction::DetachVolume, 1),
                (TaskAction::StopInstance, 1),
            ]
        );
    }

    #[test]
    fn tolerant_policy_allows_every_failure() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Stopped, 2);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Tolerant);

        let graph = FrontgatePlanner::new(frame).start().unwrap();
        assert_eq!(graph.layer_count(), 4);
        assert!(graph.layers().flat_map(|l| l.tasks()).all(|t| t.failure_allowed));
    }

    #[test]
    fn user_data_is_byte_exact() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Pending, 2);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
        let planner = FrontgatePlanner::new(frame);

        // The second node is a replica and must resolve the base role's image.
        let node = wrapper.nodes.values().find(|n| n.role == "worker-replica").unwrap();
        let expected = format!(
            "IMAGE=\"img-fg\"\nMOUNT_POINT=\"/data\"\nFILE_NAME=\"frontgate.conf\"\n\
             FILE_CONF={{\\\\\"id\\\\\":\\\\\"{cluster}\\\\\",\\\\\"listen_port\\\\\":9111,\
             \\\\\"node_id\\\\\":\\\\\"{node}\\\\\",\\\\\"pilot_host\\\\\":\\\\\"127.0.0.1\\\\\",\
             \\\\\"pilot_port\\\\\":9110}}\n",
            cluster = wrapper.cluster.cluster_id,
            node = node.node_id,
        );
        assert_eq!(planner.user_data(node), expected);
    }

    #[test]
    fn remove_container_addresses_each_node() {
        let wrapper = fixtures::wrapper(ClusterType::Frontgate, ClusterStatus::Pending, 2);
        let job = fixtures::job();
        let config = PlannerConfig::default();
        let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);

        let graph = FrontgatePlanner::new(frame).create().unwrap();
        let layer = graph.layers().nth(4).unwrap();
        for task in layer.tasks() {
            let Directive::RunCommand(cmd) = &task.directive else {
                panic!("expected a run-command directive");
            };
            let node = wrapper.nodes.values().find(|n| n.node_id.as_str() == task.node_id).unwrap();
            assert_eq!(cmd.endpoint.node_ip, node.private_ip);
            assert_eq!(cmd.endpoint.frontgate_id, wrapper.cluster.cluster_id.to_string());
            assert_eq!(cmd.endpoint.node_port, 9111);
            assert_eq!(
                cmd.command,
                "nsenter -t 1 -m -u -n -i sh -c \"docker rm -f default\""
            );
            assert_eq!(cmd.timeout_seconds, 600);
        }
    }
}

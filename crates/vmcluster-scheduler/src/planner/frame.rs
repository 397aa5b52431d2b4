//! Shared sub-layer builders.

use vmcluster_core::NodeId;
use vmcluster_store::{ClusterNode, RoleResize};

use super::{FailurePolicy, JobContext};
use crate::config::PlannerConfig;
use crate::layer::TaskLayer;
use crate::task::{
    Directive, InstanceDirective, Meta, Task, TaskAction, TaskTarget, VolumeDirective,
};
use crate::wrapper::ClusterWrapper;

/// Prefix that runs a command in the host namespaces of an agent node.
pub const HOST_CMD_PREFIX: &str = "nsenter -t 1 -m -u -n -i sh -c";

/// Placeholder for an empty mount point; agents cannot receive an empty value.
const NO_MOUNT_POINT: &str = "#";

/// Render the bootstrap block agents read from instance user data.
///
/// Every `"` in `conf_json` is replaced by `\\"` so the JSON survives the
/// agent's shell-style parsing. The format is a contract with the agents.
#[must_use]
pub fn bootstrap_user_data(
    image_id: &str,
    mount_point: &str,
    file_name: &str,
    conf_json: &str,
) -> String {
    let mount_point = if mount_point.is_empty() {
        NO_MOUNT_POINT
    } else {
        mount_point
    };
    let conf = conf_json.replace('"', "\\\\\"");

    format!(
        "IMAGE=\"{image_id}\"\nMOUNT_POINT=\"{mount_point}\"\nFILE_NAME=\"{file_name}\"\nFILE_CONF={conf}\n"
    )
}

/// Planning context plus the builders every planner shares.
///
/// Per-node builders emit one task per listed node, in the order given, and
/// skip ids that are not part of the cluster.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    wrapper: &'a ClusterWrapper,
    job: &'a JobContext,
    config: &'a PlannerConfig,
    policy: FailurePolicy,
}

impl<'a> Frame<'a> {
    /// Create a frame over one cluster snapshot.
    #[must_use]
    pub fn new(
        wrapper: &'a ClusterWrapper,
        job: &'a JobContext,
        config: &'a PlannerConfig,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            wrapper,
            job,
            config,
            policy,
        }
    }

    /// The cluster snapshot being planned.
    #[must_use]
    pub fn wrapper(&self) -> &'a ClusterWrapper {
        self.wrapper
    }

    /// The planner configuration.
    #[must_use]
    pub fn config(&self) -> &'a PlannerConfig {
        self.config
    }

    /// Build a task owned by the frame's job.
    #[must_use]
    pub fn task(
        &self,
        action: TaskAction,
        target: TaskTarget,
        node_id: String,
        directive: Directive,
        failure_allowed: bool,
    ) -> Task {
        Task {
            job_id: self.job.job_id.clone(),
            owner: self.job.owner.clone(),
            action,
            target,
            node_id,
            directive,
            failure_allowed: self.policy.failure_allowed(failure_allowed),
        }
    }

    /// One task per listed node, with a directive derived from the node.
    pub fn fan_out<F>(
        &self,
        node_ids: &[NodeId],
        action: TaskAction,
        target: TaskTarget,
        failure_allowed: bool,
        directive: F,
    ) -> Option<TaskLayer>
    where
        F: Fn(&ClusterNode) -> Directive,
    {
        let tasks = node_ids
            .iter()
            .filter_map(|id| self.wrapper.nodes.get(id))
            .map(|node| {
                self.task(
                    action,
                    target,
                    node.node_id.to_string(),
                    directive(node),
                    failure_allowed,
                )
            })
            .collect();
        TaskLayer::new(tasks)
    }

    fn instance(&self, node: &ClusterNode, user_data: String) -> InstanceDirective {
        let role = self.wrapper.role_of(&node.node_id);
        let common = self.wrapper.common_of(&node.node_id);
        InstanceDirective {
            cluster_id: self.wrapper.cluster.cluster_id.to_string(),
            node_id: node.node_id.to_string(),
            role: node.role.clone(),
            instance_id: node.instance_id.clone(),
            image_id: common.map(|c| c.image_id.clone()).unwrap_or_default(),
            cpu: role.map_or(0, |r| r.cpu),
            memory: role.map_or(0, |r| r.memory),
            subnet_id: self.wrapper.cluster.subnet_id.clone(),
            zone: self.wrapper.cluster.zone.clone(),
            volume_id: node.volume_id.clone(),
            user_data,
        }
    }

    fn volume(&self, node: &ClusterNode) -> VolumeDirective {
        let role = self.wrapper.role_of(&node.node_id);
        VolumeDirective {
            cluster_id: self.wrapper.cluster.cluster_id.to_string(),
            node_id: node.node_id.to_string(),
            volume_id: node.volume_id.clone(),
            instance_id: node.instance_id.clone(),
            size: role.map_or(0, |r| r.storage_size),
            zone: self.wrapper.cluster.zone.clone(),
            mount_point: role.map(|r| r.mount_point.clone()).unwrap_or_default(),
        }
    }

    fn instance_layer(
        &self,
        node_ids: &[NodeId],
        action: TaskAction,
        failure_allowed: bool,
    ) -> Option<TaskLayer> {
        self.fan_out(node_ids, action, TaskTarget::Runtime, failure_allowed, |node| {
            Directive::Instance(self.instance(node, String::new()))
        })
    }

    fn volume_layer(
        &self,
        node_ids: &[NodeId],
        action: TaskAction,
        target: TaskTarget,
        failure_allowed: bool,
    ) -> Option<TaskLayer> {
        self.fan_out(node_ids, action, target, failure_allowed, |node| {
            Directive::Volume(self.volume(node))
        })
    }

    /// Create each node's data volume.
    #[must_use]
    pub fn create_volumes_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.volume_layer(node_ids, TaskAction::CreateVolume, TaskTarget::Runtime, failure_allowed)
    }

    /// Run each node's instance with the given bootstrap user data.
    pub fn run_instances_layer<F>(
        &self,
        node_ids: &[NodeId],
        failure_allowed: bool,
        user_data: F,
    ) -> Option<TaskLayer>
    where
        F: Fn(&ClusterNode) -> String,
    {
        self.fan_out(
            node_ids,
            TaskAction::RunInstance,
            TaskTarget::Runtime,
            failure_allowed,
            |node| Directive::Instance(self.instance(node, user_data(node))),
        )
    }

    /// Format each node's volume and mount it.
    #[must_use]
    pub fn format_and_mount_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.volume_layer(
            node_ids,
            TaskAction::FormatAndMountVolume,
            TaskTarget::Pilot,
            failure_allowed,
        )
    }

    /// Unmount each node's volume.
    #[must_use]
    pub fn umount_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.volume_layer(node_ids, TaskAction::UmountVolume, TaskTarget::Pilot, failure_allowed)
    }

    /// Attach each node's volume (agents remount it on boot).
    #[must_use]
    pub fn attach_volumes_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.volume_layer(node_ids, TaskAction::AttachVolume, TaskTarget::Runtime, failure_allowed)
    }

    /// Detach each node's volume.
    #[must_use]
    pub fn detach_volumes_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.volume_layer(node_ids, TaskAction::DetachVolume, TaskTarget::Runtime, failure_allowed)
    }

    /// Delete each node's volume.
    #[must_use]
    pub fn delete_volumes_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.volume_layer(node_ids, TaskAction::DeleteVolume, TaskTarget::Runtime, failure_allowed)
    }

    /// Start each node's instance.
    #[must_use]
    pub fn start_instances_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.instance_layer(node_ids, TaskAction::StartInstance, failure_allowed)
    }

    /// Stop each node's instance.
    #[must_use]
    pub fn stop_instances_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.instance_layer(node_ids, TaskAction::StopInstance, failure_allowed)
    }

    /// Delete each node's instance.
    #[must_use]
    pub fn delete_instances_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.instance_layer(node_ids, TaskAction::DeleteInstance, failure_allowed)
    }

    /// Apply new CPU and memory to each node's instance.
    #[must_use]
    pub fn resize_instances_layer(
        &self,
        node_ids: &[NodeId],
        resize: &RoleResize,
        failure_allowed: bool,
    ) -> Option<TaskLayer> {
        self.fan_out(
            node_ids,
            TaskAction::ResizeInstance,
            TaskTarget::Runtime,
            failure_allowed,
            |node| {
                Directive::Instance(InstanceDirective {
                    cpu: resize.cpu,
                    memory: resize.memory,
                    ..self.instance(node, String::new())
                })
            },
        )
    }

    /// Grow each node's volume to the new size.
    #[must_use]
    pub fn resize_volumes_layer(
        &self,
        node_ids: &[NodeId],
        resize: &RoleResize,
        failure_allowed: bool,
    ) -> Option<TaskLayer> {
        if resize.storage_size == 0 {
            return None;
        }
        self.fan_out(
            node_ids,
            TaskAction::ResizeVolume,
            TaskTarget::Runtime,
            failure_allowed,
            |node| {
                Directive::Volume(VolumeDirective {
                    size: resize.storage_size,
                    ..self.volume(node)
                })
            },
        )
    }

    /// Check that each node's drone agent answers.
    #[must_use]
    pub fn ping_drone_layer(&self, node_ids: &[NodeId], failure_allowed: bool) -> Option<TaskLayer> {
        self.fan_out(
            node_ids,
            TaskAction::PingDrone,
            TaskTarget::Pilot,
            failure_allowed,
            |node| {
                Directive::Meta(Meta {
                    cluster_id: self.wrapper.cluster.cluster_id.to_string(),
                    node_id: Some(node.node_id.to_string()),
                })
            },
        )
    }

    /// A single cluster-level task checking that the frontgate answers.
    #[must_use]
    pub fn ping_frontgate_layer(&self, failure_allowed: bool) -> Option<TaskLayer> {
        let cluster_id = self.wrapper.cluster.cluster_id.to_string();
        TaskLayer::new(vec![self.task(
            TaskAction::PingFrontgate,
            TaskTarget::Pilot,
            cluster_id.clone(),
            Directive::Meta(Meta {
                cluster_id,
                node_id: None,
            }),
            failure_allowed,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_data_escapes_quotes() {
        let data = bootstrap_user_data("img-1", "/data", "frontgate.conf", r#"{"id":"cl-1"}"#);
        assert_eq!(
            data,
            "IMAGE=\"img-1\"\nMOUNT_POINT=\"/data\"\nFILE_NAME=\"frontgate.conf\"\nFILE_CONF={\\\\\"id\\\\\":\\\\\"cl-1\\\\\"}\n"
        );
    }

    #[test]
    fn empty_mount_point_becomes_placeholder() {
        let data = bootstrap_user_data("img-1", "", "drone.conf", "{}");
        assert!(data.contains("MOUNT_POINT=\"#\"\n"));
    }
}

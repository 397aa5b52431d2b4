//! Remote-execution tasks and their directives.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use vmcluster_core::{JobId, UserId};

use crate::error::Result;

/// The verb a task asks a remote agent to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskAction {
    /// Create the data volume of a node.
    CreateVolume,
    /// Run the instance of a node and attach its volume.
    RunInstance,
    /// Attach a node's volume to its instance.
    AttachVolume,
    /// Detach a node's volume from its instance.
    DetachVolume,
    /// Start a stopped instance.
    StartInstance,
    /// Stop a running instance.
    StopInstance,
    /// Delete an instance.
    DeleteInstance,
    /// Delete a volume.
    DeleteVolume,
    /// Change the CPU and memory of an instance.
    ResizeInstance,
    /// Grow a volume.
    ResizeVolume,
    /// Format the volume and mount it at the role's mount point.
    FormatAndMountVolume,
    /// Unmount the volume.
    UmountVolume,
    /// Check that the frontgate agent answers.
    PingFrontgate,
    /// Check that a node's drone agent answers.
    PingDrone,
    /// Push the final configuration to a frontgate node.
    SetFrontgateConfig,
    /// Remove the bootstrap container from a frontgate node.
    RemoveContainerOnFrontgate,
}

impl TaskAction {
    /// The wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateVolume => "create-volume",
            Self::RunInstance => "run-instance",
            Self::AttachVolume => "attach-volume",
            Self::DetachVolume => "detach-volume",
            Self::StartInstance => "start-instance",
            Self::StopInstance => "stop-instance",
            Self::DeleteInstance => "delete-instance",
            Self::DeleteVolume => "delete-volume",
            Self::ResizeInstance => "resize-instance",
            Self::ResizeVolume => "resize-volume",
            Self::FormatAndMountVolume => "format-and-mount-volume",
            Self::UmountVolume => "umount-volume",
            Self::PingFrontgate => "ping-frontgate",
            Self::PingDrone => "ping-drone",
            Self::SetFrontgateConfig => "set-frontgate-config",
            Self::RemoveContainerOnFrontgate => "remove-container-on-frontgate",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote subsystem that handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTarget {
    /// The pilot service, which relays to frontgate and drone agents.
    Pilot,
    /// The cloud runtime (compute and volume APIs).
    Runtime,
}

/// Reference to a cluster (and optionally one of its nodes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meta {
    /// Cluster the task belongs to.
    pub cluster_id: String,
    /// Node the task addresses, for node-level agent checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// Everything a runtime needs to act on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceDirective {
    /// Owning cluster.
    pub cluster_id: String,
    /// Node the instance backs.
    pub node_id: String,
    /// Node role.
    pub role: String,
    /// Existing instance id; empty before the instance is created.
    pub instance_id: String,
    /// Machine image.
    pub image_id: String,
    /// CPU cores.
    pub cpu: u32,
    /// Memory in MiB.
    pub memory: u32,
    /// Subnet to attach to.
    pub subnet_id: String,
    /// Availability zone.
    pub zone: String,
    /// Volume to attach after boot.
    pub volume_id: String,
    /// Bootstrap user data.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_data: String,
}

/// Everything a runtime or agent needs to act on one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeDirective {
    /// Owning cluster.
    pub cluster_id: String,
    /// Node the volume belongs to.
    pub node_id: String,
    /// Existing volume id; empty before the volume is created.
    pub volume_id: String,
    /// Instance the volume attaches to.
    pub instance_id: String,
    /// Size in GiB.
    pub size: u32,
    /// Availability zone.
    pub zone: String,
    /// Mount point inside the instance.
    pub mount_point: String,
}

/// Address of one frontgate node's command service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontgateEndpoint {
    /// Frontgate cluster id.
    pub frontgate_id: String,
    /// Frontgate node id.
    pub frontgate_node_id: String,
    /// Node address.
    pub node_ip: String,
    /// Frontgate service port.
    pub node_port: u16,
}

/// A shell command to run through a frontgate node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunCommandDirective {
    /// Where to run it.
    pub endpoint: FrontgateEndpoint,
    /// The command line.
    pub command: String,
    /// Execution budget.
    pub timeout_seconds: u64,
}

/// The payload of a task, serialized to JSON at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Directive {
    /// A cluster (or node) reference.
    Meta(Meta),
    /// An instance operation.
    Instance(InstanceDirective),
    /// A volume operation.
    Volume(VolumeDirective),
    /// A remote command.
    RunCommand(RunCommandDirective),
}

impl Directive {
    /// Encode the directive as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The timeout the directive carries, if any.
    #[must_use]
    pub const fn timeout_seconds(&self) -> Option<u64> {
        match self {
            Self::RunCommand(cmd) => Some(cmd.timeout_seconds),
            _ => None,
        }
    }
}

/// A unit of remote work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Job that owns the task.
    pub job_id: JobId,
    /// Owner of the job.
    pub owner: UserId,
    /// What to do.
    pub action: TaskAction,
    /// Who does it.
    pub target: TaskTarget,
    /// Node id, or the cluster id for cluster-level tasks.
    pub node_id: String,
    /// Action-specific payload.
    pub directive: Directive,
    /// Whether the graph continues past this task's failure.
    pub failure_allowed: bool,
}

impl Task {
    /// The execution budget: the directive's own timeout, else `default`.
    #[must_use]
    pub fn timeout(&self, default: Duration) -> Duration {
        self.directive
            .timeout_seconds()
            .map_or(default, Duration::from_secs)
    }
}

//! Provider admission for VM-based runtimes.
//!
//! Before a cluster is created the runtime must have a base image, the
//! subnet must belong to a routable VPC, the provider must accept the
//! requested resources, and the VPC must have a frontgate (resolved or newly
//! provisioned).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use vmcluster_core::{ClusterId, NodeId, UserId};
use vmcluster_scheduler::ClusterWrapper;
use vmcluster_store::{
    Cluster, ClusterBundle, ClusterCommon, ClusterNode, ClusterRole, ClusterStatus, ClusterType,
    Job, JobAction, Store, TransitionStatus,
};

use crate::error::{ControlError, Result};
use crate::types::{ControlConfig, RuntimeConfig, SubnetConfig};

/// Role name of frontgate nodes.
pub const FRONTGATE_ROLE: &str = "frontgate";

/// A subnet as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Subnet id.
    pub subnet_id: String,
    /// Owning VPC; empty if the VPC has no external routing.
    pub vpc_id: String,
    /// Availability zone.
    pub zone: String,
}

impl From<&SubnetConfig> for Subnet {
    fn from(value: &SubnetConfig) -> Self {
        Self {
            subnet_id: value.subnet_id.clone(),
            vpc_id: value.vpc_id.clone(),
            zone: value.zone.clone(),
        }
    }
}

/// The cloud-side checks a runtime provider answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Describe the subnets matching `subnet_id` in `zone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried.
    async fn describe_subnets(
        &self,
        runtime: &RuntimeConfig,
        subnet_id: &str,
        zone: &str,
    ) -> Result<Vec<Subnet>>;

    /// Check that the provider can host `wrapper`'s resources.
    ///
    /// # Errors
    ///
    /// Returns an error describing the missing capacity.
    async fn check_resource(&self, wrapper: &ClusterWrapper) -> Result<()>;
}

#[async_trait]
impl<T: Provider + ?Sized> Provider for Arc<T> {
    async fn describe_subnets(
        &self,
        runtime: &RuntimeConfig,
        subnet_id: &str,
        zone: &str,
    ) -> Result<Vec<Subnet>> {
        (**self).describe_subnets(runtime, subnet_id, zone).await
    }

    async fn check_resource(&self, wrapper: &ClusterWrapper) -> Result<()> {
        (**self).check_resource(wrapper).await
    }
}

/// A provider backed by configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    subnets: Vec<Subnet>,
    max_nodes_per_cluster: u32,
}

impl StaticProvider {
    /// Create a provider serving the given subnets.
    #[must_use]
    pub fn new(subnets: Vec<Subnet>, max_nodes_per_cluster: u32) -> Self {
        Self {
            subnets,
            max_nodes_per_cluster,
        }
    }

    /// Create a provider from the control plane configuration.
    #[must_use]
    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(
            config.subnets.iter().map(Subnet::from).collect(),
            config.max_nodes_per_cluster,
        )
    }
}

#[async_trait]
impl Provider for StaticProvider {
    async fn describe_subnets(
        &self,
        _runtime: &RuntimeConfig,
        subnet_id: &str,
        zone: &str,
    ) -> Result<Vec<Subnet>> {
        Ok(self
            .subnets
            .iter()
            .filter(|s| s.subnet_id == subnet_id && s.zone == zone)
            .cloned()
            .collect())
    }

    async fn check_resource(&self, wrapper: &ClusterWrapper) -> Result<()> {
        let nodes = wrapper.nodes.len();
        if nodes > self.max_nodes_per_cluster as usize {
            return Err(ControlError::QuotaExceeded(format!(
                "{nodes} nodes requested, limit is {}",
                self.max_nodes_per_cluster
            )));
        }
        Ok(())
    }
}

/// Outcome of frontgate resolution.
#[derive(Debug, Clone)]
pub enum FrontgateResolution {
    /// An existing frontgate serves the VPC.
    Existing(ClusterId),
    /// A new frontgate was persisted and must be provisioned.
    Provisioned(Box<ClusterBundle>),
}

impl FrontgateResolution {
    /// The frontgate cluster id.
    #[must_use]
    pub fn cluster_id(&self) -> &ClusterId {
        match self {
            Self::Existing(id) => id,
            Self::Provisioned(p) => &p.cluster.cluster_id,
        }
    }
}

/// Admit a new cluster on a VM-based runtime.
///
/// Sets `vpc_id` and `frontgate_id` on the wrapper's cluster. Runs before
/// any transition is taken, so a rejection leaves no state behind except a
/// frontgate that was provisioned for the VPC.
///
/// # Errors
///
/// - `ImageNotFound` if the runtime has no base image
/// - `SubnetLookup` if the subnet cannot be described
/// - `SubnetUnavailable` unless exactly one subnet with a VPC is found
/// - `QuotaExceeded` (or the provider's error) if resources are refused
pub async fn check_vm_based_provider<S: Store + ?Sized>(
    store: &S,
    config: &ControlConfig,
    runtime: &RuntimeConfig,
    provider: &dyn Provider,
    wrapper: &mut ClusterWrapper,
) -> Result<FrontgateResolution> {
    let image_id = config
        .runtime_image(&runtime.url, &runtime.zone)
        .ok_or_else(|| ControlError::ImageNotFound {
            url: runtime.url.clone(),
            zone: runtime.zone.clone(),
        })?
        .to_string();

    let subnet_id = wrapper.cluster.subnet_id.clone();
    let subnets = provider
        .describe_subnets(runtime, &subnet_id, &wrapper.cluster.zone)
        .await
        .map_err(|e| {
            tracing::error!(
                subnet_id = %subnet_id,
                runtime_id = %runtime.runtime_id,
                error = %e,
                "Describe subnet failed"
            );
            ControlError::SubnetLookup {
                subnet_id: subnet_id.clone(),
                message: e.to_string(),
            }
        })?;

    let vpc_id = match subnets.as_slice() {
        [subnet] if !subnet.vpc_id.is_empty() => subnet.vpc_id.clone(),
        _ => return Err(ControlError::SubnetUnavailable(subnet_id)),
    };
    wrapper.cluster.vpc_id.clone_from(&vpc_id);

    provider.check_resource(wrapper).await.map_err(|e| match e {
        ControlError::QuotaExceeded(_) => e,
        other => ControlError::QuotaExceeded(other.to_string()),
    })?;

    let resolution = resolve_frontgate(store, config, &wrapper.cluster, &image_id)?;
    wrapper.cluster.frontgate_id = Some(resolution.cluster_id().clone());
    Ok(resolution)
}

/// Find the frontgate serving the cluster's VPC, or persist a new one.
fn resolve_frontgate<S: Store + ?Sized>(
    store: &S,
    config: &ControlConfig,
    cluster: &Cluster,
    image_id: &str,
) -> Result<FrontgateResolution> {
    let bundle = frontgate_rows(config, cluster, image_id);
    if let Some(frontgate) = store.find_or_insert_frontgate(&bundle)? {
        tracing::debug!(
            frontgate_id = %frontgate.cluster_id,
            vpc_id = %cluster.vpc_id,
            "Resolved existing frontgate"
        );
        return Ok(FrontgateResolution::Existing(frontgate.cluster_id));
    }

    tracing::info!(
        frontgate_id = %bundle.cluster.cluster_id,
        vpc_id = %cluster.vpc_id,
        owner = %cluster.owner,
        nodes = bundle.nodes.len(),
        "Provisioning new frontgate"
    );
    Ok(FrontgateResolution::Provisioned(Box::new(bundle)))
}

fn frontgate_rows(config: &ControlConfig, cluster: &Cluster, image_id: &str) -> ClusterBundle {
    let now = Utc::now();
    let owner: &UserId = &cluster.owner;
    let frontgate = Cluster {
        cluster_id: ClusterId::generate(),
        name: format!("frontgate-{}", cluster.vpc_id),
        owner: owner.clone(),
        app_id: String::new(),
        version_id: String::new(),
        previous_version_id: None,
        runtime_id: cluster.runtime_id.clone(),
        cluster_type: ClusterType::Frontgate,
        status: ClusterStatus::Pending,
        transition_status: TransitionStatus::Creating,
        vpc_id: cluster.vpc_id.clone(),
        subnet_id: cluster.subnet_id.clone(),
        zone: cluster.zone.clone(),
        frontgate_id: None,
        created_at: now,
        status_time: now,
    };
    let nodes = (0..config.frontgate_node_count)
        .map(|_| ClusterNode {
            node_id: NodeId::generate(),
            cluster_id: frontgate.cluster_id.clone(),
            owner: owner.clone(),
            role: FRONTGATE_ROLE.to_string(),
            status: ClusterStatus::Pending,
            transition_status: TransitionStatus::Creating,
            private_ip: String::new(),
            instance_id: String::new(),
            volume_id: String::new(),
            created_at: now,
            status_time: now,
        })
        .collect();
    let role = ClusterRole {
        cluster_id: frontgate.cluster_id.clone(),
        role: FRONTGATE_ROLE.to_string(),
        cpu: config.frontgate_cpu,
        memory: config.frontgate_memory,
        storage_size: config.frontgate_storage_size,
        mount_point: config.frontgate_mount_point.clone(),
        count: config.frontgate_node_count,
    };
    let common = ClusterCommon {
        cluster_id: frontgate.cluster_id.clone(),
        role: FRONTGATE_ROLE.to_string(),
        image_id: image_id.to_string(),
        advanced_actions: String::new(),
    };
    let job = Job::new(&frontgate, JobAction::CreateCluster);

    ClusterBundle {
        cluster: frontgate,
        nodes,
        roles: vec![role],
        commons: vec![common],
        job,
    }
}

/// Scriptable provider for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use vmcluster_scheduler::ClusterWrapper;

    use super::{Provider, Subnet};
    use crate::error::{ControlError, Result};
    use crate::types::RuntimeConfig;

    /// Answers with fixed subnets and optional failures.
    #[derive(Debug, Default)]
    pub struct MockProvider {
        subnets: Mutex<Vec<Subnet>>,
        describe_error: Mutex<Option<String>>,
        resource_error: Mutex<Option<String>>,
    }

    impl MockProvider {
        /// Create a provider that knows no subnets.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve a subnet.
        pub fn add_subnet(&self, subnet_id: &str, vpc_id: &str, zone: &str) {
            self.subnets.lock().push(Subnet {
                subnet_id: subnet_id.to_string(),
                vpc_id: vpc_id.to_string(),
                zone: zone.to_string(),
            });
        }

        /// Fail subnet lookups with `message`.
        pub fn fail_describe(&self, message: &str) {
            *self.describe_error.lock() = Some(message.to_string());
        }

        /// Refuse resources with `message`.
        pub fn fail_check_resource(&self, message: &str) {
            *self.resource_error.lock() = Some(message.to_string());
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn describe_subnets(
            &self,
            _runtime: &RuntimeConfig,
            subnet_id: &str,
            _zone: &str,
        ) -> Result<Vec<Subnet>> {
            if let Some(message) = self.describe_error.lock().clone() {
                return Err(ControlError::Provider(message));
            }
            Ok(self
                .subnets
                .lock()
                .iter()
                .filter(|s| s.subnet_id == subnet_id)
                .cloned()
                .collect())
        }

        async fn check_resource(&self, _wrapper: &ClusterWrapper) -> Result<()> {
            match self.resource_error.lock().clone() {
                Some(message) => Err(ControlError::Provider(message)),
                None => Ok(()),
            }
        }
    }
}

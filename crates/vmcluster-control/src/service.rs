//! Control plane service implementation.
//!
//! This module provides the `ClusterService` trait and `ControlPlaneService`
//! implementation. Every lifecycle entry point validates its request, takes
//! the transition marker, persists a job and plans the task graph that
//! carries the job out. [`ClusterService::complete_job`] settles the cluster
//! once the graph has run.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use vmcluster_core::{ClusterId, JobId, NodeId, UserId};
use vmcluster_scheduler::{
    planner_for, AppClusterPlanner, ClusterWrapper, Frame, GraphRunner, JobContext,
    LifecyclePlanner, TaskLayer,
};
use vmcluster_store::{
    base_role, Cluster, ClusterBundle, ClusterCommon, ClusterNode, ClusterPatch, ClusterRole,
    ClusterStatus, ClusterType, Job, JobAction, JobStatus, RoleResize, Store, TransitionStatus,
    REPLICA_ROLE_SUFFIX,
};

use crate::error::{ControlError, Result};
use crate::lifecycle::{self, ActionRule};
use crate::provider::{check_vm_based_provider, FrontgateResolution, Provider};
use crate::types::{
    AddClusterNodesRequest, CeaseClustersRequest, ClusterIdsRequest, ControlConfig,
    CreateClusterOutcome, CreateClusterRequest, DeleteClusterNodesRequest, DeleteClustersRequest,
    RecoverClustersRequest, ResizeClusterRequest, RollbackClusterRequest, ScheduledJob,
    StartClustersRequest, StopClustersRequest, UpgradeClusterRequest,
};
use crate::validate::Validate;

/// The lifecycle operations of the control plane.
///
/// Each operation returns the persisted job(s) with the graph to execute.
/// Guard and validation failures abort before any transition is taken.
#[async_trait]
pub trait ClusterService: Send + Sync {
    // =========================================================================
    // Cluster Lifecycle
    // =========================================================================

    /// Create a new cluster, provisioning a frontgate for its VPC if needed.
    ///
    /// # Errors
    ///
    /// Returns a validation, runtime or provider admission error.
    async fn create_cluster(
        &self,
        user_id: &UserId,
        request: CreateClusterRequest,
    ) -> Result<CreateClusterOutcome>;

    /// Tear down clusters (soft delete).
    ///
    /// # Errors
    ///
    /// Fails as a whole if any cluster cannot be taken.
    async fn delete_clusters(
        &self,
        user_id: &UserId,
        request: DeleteClustersRequest,
    ) -> Result<Vec<ScheduledJob>>;

    /// Start stopped clusters.
    async fn start_clusters(
        &self,
        user_id: &UserId,
        request: StartClustersRequest,
    ) -> Result<Vec<ScheduledJob>>;

    /// Stop active clusters.
    async fn stop_clusters(
        &self,
        user_id: &UserId,
        request: StopClustersRequest,
    ) -> Result<Vec<ScheduledJob>>;

    /// Re-provision soft-deleted clusters.
    async fn recover_clusters(
        &self,
        user_id: &UserId,
        request: RecoverClustersRequest,
    ) -> Result<Vec<ScheduledJob>>;

    /// Permanently remove soft-deleted clusters.
    async fn cease_clusters(
        &self,
        user_id: &UserId,
        request: CeaseClustersRequest,
    ) -> Result<Vec<ScheduledJob>>;

    // =========================================================================
    // Cluster Changes
    // =========================================================================

    /// Change the sizing of one role of a stopped cluster.
    async fn resize_cluster(
        &self,
        user_id: &UserId,
        request: ResizeClusterRequest,
    ) -> Result<ScheduledJob>;

    /// Add nodes to one role.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ActionNotSupported` unless the role lists the
    /// action in its advanced actions.
    async fn add_cluster_nodes(
        &self,
        user_id: &UserId,
        request: AddClusterNodesRequest,
    ) -> Result<ScheduledJob>;

    /// Remove specific nodes of one role.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ActionNotSupported` unless the role lists the
    /// action in its advanced actions.
    async fn delete_cluster_nodes(
        &self,
        user_id: &UserId,
        request: DeleteClusterNodesRequest,
    ) -> Result<ScheduledJob>;

    /// Move a stopped cluster to another application version.
    async fn upgrade_cluster(
        &self,
        user_id: &UserId,
        request: UpgradeClusterRequest,
    ) -> Result<ScheduledJob>;

    /// Restore a stopped cluster's previous application version.
    async fn rollback_cluster(
        &self,
        user_id: &UserId,
        request: RollbackClusterRequest,
    ) -> Result<ScheduledJob>;

    // =========================================================================
    // Jobs and Queries
    // =========================================================================

    /// Settle a job's cluster once its graph has run.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::JobFinished` if the job was already completed.
    async fn complete_job(&self, job_id: &JobId, succeeded: bool) -> Result<Job>;

    /// Load a cluster with its nodes and role configuration.
    async fn describe_cluster(&self, user_id: &UserId, cluster_id: &str)
        -> Result<ClusterWrapper>;
}

/// The main control plane service implementation.
pub struct ControlPlaneService<S: Store> {
    store: Arc<S>,
    provider: Arc<dyn Provider>,
    config: ControlConfig,
}

impl<S: Store> ControlPlaneService<S> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(store: Arc<S>, provider: Arc<dyn Provider>, config: ControlConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Run a scheduled job's graph and complete the job with the outcome.
    ///
    /// A job without a graph succeeds immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be marked or completed.
    pub async fn execute(&self, runner: &GraphRunner, scheduled: &ScheduledJob) -> Result<Job>
    where
        S: 'static,
    {
        let job_id = &scheduled.job.job_id;
        if self.store.advance_job(job_id, JobStatus::Working)? == 0 {
            return Err(self.unfinished_job_error(job_id)?);
        }

        let succeeded = match &scheduled.graph {
            Some(graph) => {
                let report = runner.run(graph).await;
                if let Some(e) = report.failure() {
                    tracing::warn!(
                        job_id = %job_id,
                        action = %scheduled.job.action,
                        layers = report.layers_executed,
                        error = %e,
                        "Job graph halted"
                    );
                }
                report.succeeded()
            }
            None => true,
        };

        self.complete_job(job_id, succeeded).await
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn load_wrapper(&self, cluster: Cluster) -> Result<ClusterWrapper> {
        let nodes = self.store.list_cluster_nodes(&cluster.cluster_id)?;
        let roles = self.store.list_cluster_roles(&cluster.cluster_id)?;
        let commons = self.store.list_cluster_commons(&cluster.cluster_id)?;
        Ok(ClusterWrapper::new(cluster, nodes, roles, commons))
    }

    /// Build the graph for `job` over `wrapper` with `plan`.
    fn plan<F>(&self, wrapper: &ClusterWrapper, job: &Job, plan: F) -> Option<TaskLayer>
    where
        F: FnOnce(Frame<'_>) -> Option<TaskLayer>,
    {
        let context = JobContext {
            job_id: job.job_id.clone(),
            owner: job.owner.clone(),
        };
        let frame = Frame::new(
            wrapper,
            &context,
            &self.config.planner,
            self.config.failure_policy,
        );
        let graph = plan(frame);
        tracing::debug!(
            job_id = %job.job_id,
            cluster_id = %job.cluster_id,
            action = %job.action,
            layers = graph.as_ref().map_or(0, TaskLayer::layer_count),
            tasks = graph.as_ref().map_or(0, TaskLayer::task_count),
            "Planned job graph"
        );
        graph
    }

    fn schedule(&self, job: Job, graph: Option<TaskLayer>) -> Result<ScheduledJob> {
        self.store.insert_job(&job)?;
        tracing::info!(
            job_id = %job.job_id,
            cluster_id = %job.cluster_id,
            action = %job.action,
            "Job scheduled"
        );
        Ok(ScheduledJob { job, graph })
    }

    /// Run the steps that follow taking `cluster`; if one fails, give the
    /// cluster back.
    fn holding<T, F>(&self, cluster: &Cluster, steps: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        steps().map_err(|e| {
            self.abandon(std::slice::from_ref(cluster), &[]);
            e
        })
    }

    /// Fail `scheduled` and restore every cluster of `clusters` to the
    /// status it had when it was taken.
    fn abandon(&self, clusters: &[Cluster], scheduled: &[ScheduledJob]) {
        for ScheduledJob { job, .. } in scheduled {
            if let Err(e) = self.store.advance_job(&job.job_id, JobStatus::Failed) {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to abandon job");
            }
        }
        for cluster in clusters {
            if let Err(e) = lifecycle::release_cluster_transition(
                self.store.as_ref(),
                &cluster.cluster_id,
                cluster.status,
            ) {
                tracing::error!(
                    cluster_id = %cluster.cluster_id,
                    error = %e,
                    "Failed to release cluster transition"
                );
            }
        }
    }

    /// The error for a job that could not be advanced.
    fn unfinished_job_error(&self, job_id: &JobId) -> Result<ControlError> {
        Ok(match self.store.get_job(job_id)? {
            Some(_) => ControlError::JobFinished(job_id.clone()),
            None => ControlError::JobNotFound(job_id.clone()),
        })
    }

    /// Take every cluster of a batch request, or none of them.
    ///
    /// All clusters are checked before any marker is set; if an acquisition
    /// still fails, the markers already set are cleared again.
    fn acquire_batch(
        &self,
        user_id: &UserId,
        request: &ClusterIdsRequest,
        rule: ActionRule,
    ) -> Result<Vec<Cluster>> {
        request.validate()?;
        let cluster_ids = request
            .cluster_id
            .iter()
            .map(|id| ClusterId::parse(id))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for cluster_id in &cluster_ids {
            lifecycle::check_permission_and_transition(
                self.store.as_ref(),
                cluster_id,
                user_id,
                rule.allowed,
            )?;
        }

        let mut acquired: Vec<Cluster> = Vec::with_capacity(cluster_ids.len());
        for cluster_id in &cluster_ids {
            match lifecycle::acquire_cluster_transition(
                self.store.as_ref(),
                cluster_id,
                user_id,
                rule.allowed,
                rule.transition,
            ) {
                Ok(cluster) => acquired.push(cluster),
                Err(e) => {
                    self.abandon(&acquired, &[]);
                    return Err(e);
                }
            }
        }
        Ok(acquired)
    }

    /// Shared body of the batch lifecycle operations.
    fn batch<F>(
        &self,
        user_id: &UserId,
        request: &ClusterIdsRequest,
        action: JobAction,
        plan: F,
    ) -> Result<Vec<ScheduledJob>>
    where
        F: Fn(&dyn LifecyclePlanner) -> Option<TaskLayer>,
    {
        let clusters = self.acquire_batch(user_id, request, lifecycle::rule(action))?;

        let mut scheduled = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let job = Job::new(cluster, action);
            let step = self.load_wrapper(cluster.clone()).and_then(|wrapper| {
                let graph = self.plan(&wrapper, &job, |frame| plan(&*planner_for(frame)));
                self.schedule(job, graph)
            });
            match step {
                Ok(job) => scheduled.push(job),
                Err(e) => {
                    self.abandon(&clusters, &scheduled);
                    return Err(e);
                }
            }
        }
        Ok(scheduled)
    }

    /// Take a single cluster for `action`.
    fn acquire_one(&self, user_id: &UserId, cluster_id: &ClusterId, action: JobAction) -> Result<Cluster> {
        let rule = lifecycle::rule(action);
        lifecycle::acquire_cluster_transition(
            self.store.as_ref(),
            cluster_id,
            user_id,
            rule.allowed,
            rule.transition,
        )
    }

    fn require_action(&self, cluster_id: &ClusterId, role: &str, action: JobAction) -> Result<()> {
        if lifecycle::is_action_supported(self.store.as_ref(), cluster_id, role, action.as_str()) {
            return Ok(());
        }
        Err(ControlError::ActionNotSupported {
            cluster_id: cluster_id.clone(),
            role: role.to_string(),
            action: action.as_str().to_string(),
        })
    }

    fn find_role(&self, cluster_id: &ClusterId, role: &str) -> Result<ClusterRole> {
        self.store
            .list_cluster_roles(cluster_id)?
            .into_iter()
            .find(|r| r.role == base_role(role))
            .ok_or_else(|| ControlError::Validation(format!("role [{role}] not found")))
    }

    /// Settle the cluster and, for cluster-wide jobs, its nodes.
    fn settle(&self, job: &Job, status: ClusterStatus) -> Result<Cluster> {
        let cluster = lifecycle::release_cluster_transition(self.store.as_ref(), &job.cluster_id, status)?;
        if job.node_ids.is_empty() || job.action == JobAction::CreateCluster {
            let node_ids: Vec<NodeId> = self
                .store
                .list_cluster_nodes(&job.cluster_id)?
                .into_iter()
                .map(|n| n.node_id)
                .collect();
            lifecycle::release_nodes_transition(self.store.as_ref(), &node_ids, Some(status))?;
        }
        Ok(cluster)
    }

    fn complete_success(&self, job: &Job) -> Result<()> {
        let status = lifecycle::success_status(job.action, job.prior_status);
        match job.action {
            JobAction::CreateCluster
            | JobAction::DeleteClusters
            | JobAction::StartClusters
            | JobAction::StopClusters
            | JobAction::RecoverClusters => {
                self.settle(job, status)?;
            }
            JobAction::CeaseClusters => {
                self.store.delete_cluster(&job.cluster_id)?;
            }
            JobAction::ResizeCluster => {
                if let Some(resize) = &job.resize {
                    let mut role = self.find_role(&job.cluster_id, &resize.role)?;
                    role.cpu = resize.cpu;
                    role.memory = resize.memory;
                    if resize.storage_size > 0 {
                        role.storage_size = resize.storage_size;
                    }
                    self.store.put_cluster_roles(std::slice::from_ref(&role))?;
                }
                self.settle(job, status)?;
            }
            JobAction::AddClusterNodes => {
                lifecycle::release_nodes_transition(
                    self.store.as_ref(),
                    &job.node_ids,
                    Some(ClusterStatus::Active),
                )?;
                self.adjust_role_count(job, i64::try_from(job.node_ids.len()).unwrap_or(i64::MAX))?;
                self.settle(job, status)?;
            }
            JobAction::DeleteClusterNodes => {
                self.adjust_role_count(job, -i64::try_from(job.node_ids.len()).unwrap_or(i64::MAX))?;
                self.store.delete_cluster_nodes(&job.node_ids)?;
                self.settle(job, status)?;
            }
            JobAction::UpgradeCluster | JobAction::RollbackCluster => {
                let cluster = self
                    .store
                    .get_cluster(&job.cluster_id)?
                    .ok_or_else(|| ControlError::ClusterNotFound(job.cluster_id.clone()))?;
                let patch = ClusterPatch {
                    version_id: job.target_version_id.clone(),
                    previous_version_id: Some(cluster.version_id),
                    ..ClusterPatch::settle(status)
                };
                self.store.update_cluster(&job.cluster_id, &patch)?;
            }
        }
        Ok(())
    }

    fn complete_failure(&self, job: &Job) -> Result<()> {
        match job.action {
            JobAction::AddClusterNodes => {
                self.store.delete_cluster_nodes(&job.node_ids)?;
            }
            JobAction::DeleteClusterNodes => {
                lifecycle::release_nodes_transition(self.store.as_ref(), &job.node_ids, None)?;
            }
            _ => {}
        }
        self.settle(job, job.prior_status)?;
        Ok(())
    }

    /// Shift the count of the role the job's nodes belong to.
    fn adjust_role_count(&self, job: &Job, delta: i64) -> Result<()> {
        let Some(node_id) = job.node_ids.first() else {
            return Ok(());
        };
        let Some(node) = self.store.get_cluster_node(node_id)? else {
            return Ok(());
        };
        let mut role = self.find_role(&job.cluster_id, &node.role)?;
        let count = (i64::from(role.count) + delta).max(0);
        role.count = u32::try_from(count).unwrap_or(u32::MAX);
        self.store.put_cluster_roles(std::slice::from_ref(&role))?;
        Ok(())
    }
}

/// Build the node rows of a role, primaries first, then replicas.
fn role_nodes(
    cluster: &Cluster,
    role: &str,
    count: u32,
    replicas: u32,
    transition: TransitionStatus,
) -> Vec<ClusterNode> {
    let now = Utc::now();
    let replica_role = format!("{role}{REPLICA_ROLE_SUFFIX}");
    (0..count)
        .map(|_| role)
        .chain((0..replicas).map(|_| replica_role.as_str()))
        .map(|role| ClusterNode {
            node_id: NodeId::generate(),
            cluster_id: cluster.cluster_id.clone(),
            owner: cluster.owner.clone(),
            role: role.to_string(),
            status: ClusterStatus::Pending,
            transition_status: transition,
            private_ip: String::new(),
            instance_id: String::new(),
            volume_id: String::new(),
            created_at: now,
            status_time: now,
        })
        .collect()
}

#[async_trait]
impl<S: Store + 'static> ClusterService for ControlPlaneService<S> {
    // =========================================================================
    // Cluster Lifecycle
    // =========================================================================

    async fn create_cluster(
        &self,
        user_id: &UserId,
        request: CreateClusterRequest,
    ) -> Result<CreateClusterOutcome> {
        request.validate()?;
        let runtime = self
            .config
            .runtime(&request.runtime_id)
            .ok_or_else(|| ControlError::RuntimeNotFound(request.runtime_id.clone()))?
            .clone();

        let now = Utc::now();
        let cluster = Cluster {
            cluster_id: ClusterId::generate(),
            name: request.name,
            owner: user_id.clone(),
            app_id: request.app_id,
            version_id: request.version_id,
            previous_version_id: None,
            runtime_id: runtime.runtime_id.clone(),
            cluster_type: ClusterType::Normal,
            status: ClusterStatus::Pending,
            transition_status: TransitionStatus::Creating,
            vpc_id: String::new(),
            subnet_id: request.subnet_id,
            zone: runtime.zone.clone(),
            frontgate_id: None,
            created_at: now,
            status_time: now,
        };

        let base_image = self
            .config
            .runtime_image(&runtime.url, &runtime.zone)
            .unwrap_or_default()
            .to_string();
        let mut nodes = Vec::new();
        let mut roles = Vec::with_capacity(request.roles.len());
        let mut commons = Vec::with_capacity(request.roles.len());
        for conf in request.roles {
            nodes.extend(role_nodes(
                &cluster,
                &conf.role,
                conf.count,
                conf.replicas,
                TransitionStatus::Creating,
            ));
            roles.push(ClusterRole {
                cluster_id: cluster.cluster_id.clone(),
                role: conf.role.clone(),
                cpu: conf.cpu,
                memory: conf.memory,
                storage_size: conf.storage_size,
                mount_point: conf.mount_point,
                count: conf.count + conf.replicas,
            });
            commons.push(ClusterCommon {
                cluster_id: cluster.cluster_id.clone(),
                role: conf.role,
                image_id: conf.image_id.unwrap_or_else(|| base_image.clone()),
                advanced_actions: conf.advanced_actions,
            });
        }

        let mut wrapper = ClusterWrapper::new(cluster, nodes, roles, commons);
        let resolution = check_vm_based_provider(
            self.store.as_ref(),
            &self.config,
            &runtime,
            self.provider.as_ref(),
            &mut wrapper,
        )
        .await?;

        let mut job = Job::new(&wrapper.cluster, JobAction::CreateCluster);
        job.node_ids = wrapper.node_ids();
        let bundle = ClusterBundle {
            cluster: wrapper.cluster.clone(),
            nodes: wrapper.nodes.values().cloned().collect(),
            roles: wrapper.roles.values().cloned().collect(),
            commons: wrapper.commons.values().cloned().collect(),
            job,
        };
        self.store.insert_cluster_bundle(&bundle)?;

        tracing::info!(
            cluster_id = %bundle.cluster.cluster_id,
            owner = %user_id,
            nodes = bundle.nodes.len(),
            vpc_id = %bundle.cluster.vpc_id,
            job_id = %bundle.job.job_id,
            "Cluster created"
        );

        let graph = self.plan(&wrapper, &bundle.job, |frame| planner_for(frame).create());
        let job = ScheduledJob {
            job: bundle.job,
            graph,
        };

        let frontgate_job = match resolution {
            FrontgateResolution::Existing(_) => None,
            FrontgateResolution::Provisioned(provision) => {
                let ClusterBundle {
                    cluster,
                    nodes,
                    roles,
                    commons,
                    job,
                } = *provision;
                let frontgate = ClusterWrapper::new(cluster, nodes, roles, commons);
                let graph = self.plan(&frontgate, &job, |frame| planner_for(frame).create());
                Some(ScheduledJob { job, graph })
            }
        };

        Ok(CreateClusterOutcome {
            cluster_id: wrapper.cluster.cluster_id,
            job,
            frontgate_job,
        })
    }

    async fn delete_clusters(
        &self,
        user_id: &UserId,
        request: DeleteClustersRequest,
    ) -> Result<Vec<ScheduledJob>> {
        self.batch(user_id, &request, JobAction::DeleteClusters, |p| p.delete())
    }

    async fn start_clusters(
        &self,
        user_id: &UserId,
        request: StartClustersRequest,
    ) -> Result<Vec<ScheduledJob>> {
        self.batch(user_id, &request, JobAction::StartClusters, |p| p.start())
    }

    async fn stop_clusters(
        &self,
        user_id: &UserId,
        request: StopClustersRequest,
    ) -> Result<Vec<ScheduledJob>> {
        self.batch(user_id, &request, JobAction::StopClusters, |p| p.stop())
    }

    async fn recover_clusters(
        &self,
        user_id: &UserId,
        request: RecoverClustersRequest,
    ) -> Result<Vec<ScheduledJob>> {
        self.batch(user_id, &request, JobAction::RecoverClusters, |p| p.create())
    }

    async fn cease_clusters(
        &self,
        user_id: &UserId,
        request: CeaseClustersRequest,
    ) -> Result<Vec<ScheduledJob>> {
        self.batch(user_id, &request, JobAction::CeaseClusters, |_| None)
    }

    // =========================================================================
    // Cluster Changes
    // =========================================================================

    async fn resize_cluster(
        &self,
        user_id: &UserId,
        request: ResizeClusterRequest,
    ) -> Result<ScheduledJob> {
        request.validate()?;
        let cluster_id = ClusterId::parse(&request.cluster_id)?;
        let rule = lifecycle::rule(JobAction::ResizeCluster);
        lifecycle::check_permission_and_transition(
            self.store.as_ref(),
            &cluster_id,
            user_id,
            rule.allowed,
        )?;
        self.find_role(&cluster_id, &request.role)?;

        let cluster = self.acquire_one(user_id, &cluster_id, JobAction::ResizeCluster)?;
        self.holding(&cluster, || {
            let resize = RoleResize {
                role: base_role(&request.role).to_string(),
                cpu: request.cpu,
                memory: request.memory,
                storage_size: request.storage_size,
            };
            let mut job = Job::new(&cluster, JobAction::ResizeCluster);
            let wrapper = self.load_wrapper(cluster.clone())?;
            job.node_ids = wrapper.node_ids_with_role(&resize.role);
            let graph =
                self.plan(&wrapper, &job, |frame| AppClusterPlanner::new(frame).resize(&resize));
            job.resize = Some(resize);
            self.schedule(job, graph)
        })
    }

    async fn add_cluster_nodes(
        &self,
        user_id: &UserId,
        request: AddClusterNodesRequest,
    ) -> Result<ScheduledJob> {
        request.validate()?;
        let cluster_id = ClusterId::parse(&request.cluster_id)?;
        let rule = lifecycle::rule(JobAction::AddClusterNodes);
        let cluster = lifecycle::check_permission_and_transition(
            self.store.as_ref(),
            &cluster_id,
            user_id,
            rule.allowed,
        )?;
        self.require_action(&cluster_id, &request.role, JobAction::AddClusterNodes)?;

        let new_nodes = role_nodes(
            &cluster,
            base_role(&request.role),
            request.count,
            0,
            TransitionStatus::AddingNodes,
        );
        let mut planned = self.load_wrapper(cluster)?;
        for node in &new_nodes {
            planned.nodes.insert(node.node_id.clone(), node.clone());
        }
        self.provider.check_resource(&planned).await?;

        let cluster = self.acquire_one(user_id, &cluster_id, JobAction::AddClusterNodes)?;
        self.holding(&cluster, || {
            self.store.insert_cluster_nodes(&new_nodes)?;
            let node_ids: Vec<NodeId> = new_nodes.iter().map(|n| n.node_id.clone()).collect();
            let mut job = Job::new(&cluster, JobAction::AddClusterNodes);
            job.node_ids.clone_from(&node_ids);
            self.load_wrapper(cluster.clone())
                .and_then(|wrapper| {
                    let graph = self.plan(&wrapper, &job, |frame| {
                        AppClusterPlanner::new(frame).add_nodes(&job.node_ids)
                    });
                    self.schedule(job, graph)
                })
                .map_err(|e| {
                    if let Err(discard) = self.store.delete_cluster_nodes(&node_ids) {
                        tracing::error!(
                            cluster_id = %cluster_id,
                            error = %discard,
                            "Failed to discard planned nodes"
                        );
                    }
                    e
                })
        })
    }

    async fn delete_cluster_nodes(
        &self,
        user_id: &UserId,
        request: DeleteClusterNodesRequest,
    ) -> Result<ScheduledJob> {
        request.validate()?;
        let cluster_id = ClusterId::parse(&request.cluster_id)?;
        let mut seen = HashSet::new();
        let node_ids: Vec<NodeId> = request
            .node_id
            .iter()
            .map(|id| NodeId::parse(id))
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let rule = lifecycle::rule(JobAction::DeleteClusterNodes);

        lifecycle::check_permission_and_transition(
            self.store.as_ref(),
            &cluster_id,
            user_id,
            rule.allowed,
        )?;
        self.require_action(&cluster_id, &request.role, JobAction::DeleteClusterNodes)?;
        let nodes = lifecycle::check_nodes_permission_and_transition(
            self.store.as_ref(),
            &node_ids,
            user_id,
            rule.allowed,
        )?;
        if let Some(node) = nodes
            .iter()
            .find(|n| n.cluster_id != cluster_id || base_role(&n.role) != base_role(&request.role))
        {
            return Err(ControlError::Validation(format!(
                "node [{}] is not a [{}] node of cluster [{cluster_id}]",
                node.node_id, request.role
            )));
        }

        let cluster = self.acquire_one(user_id, &cluster_id, JobAction::DeleteClusterNodes)?;
        self.holding(&cluster, || {
            lifecycle::acquire_nodes_transition(
                self.store.as_ref(),
                &node_ids,
                user_id,
                &[],
                TransitionStatus::DeletingNodes,
            )?;
            let mut job = Job::new(&cluster, JobAction::DeleteClusterNodes);
            job.node_ids.clone_from(&node_ids);
            self.load_wrapper(cluster.clone())
                .and_then(|wrapper| {
                    let graph = self.plan(&wrapper, &job, |frame| {
                        AppClusterPlanner::new(frame).delete_nodes(&job.node_ids)
                    });
                    self.schedule(job, graph)
                })
                .map_err(|e| {
                    if let Err(release) =
                        lifecycle::release_nodes_transition(self.store.as_ref(), &node_ids, None)
                    {
                        tracing::error!(
                            cluster_id = %cluster_id,
                            error = %release,
                            "Failed to release node transition"
                        );
                    }
                    e
                })
        })
    }

    async fn upgrade_cluster(
        &self,
        user_id: &UserId,
        request: UpgradeClusterRequest,
    ) -> Result<ScheduledJob> {
        request.validate()?;
        let cluster_id = ClusterId::parse(&request.cluster_id)?;
        let cluster = self.acquire_one(user_id, &cluster_id, JobAction::UpgradeCluster)?;
        self.holding(&cluster, || {
            let mut job = Job::new(&cluster, JobAction::UpgradeCluster);
            job.target_version_id = Some(request.version_id);
            self.schedule(job, None)
        })
    }

    async fn rollback_cluster(
        &self,
        user_id: &UserId,
        request: RollbackClusterRequest,
    ) -> Result<ScheduledJob> {
        request.validate()?;
        let cluster_id = ClusterId::parse(&request.cluster_id)?;
        let rule = lifecycle::rule(JobAction::RollbackCluster);
        let cluster = lifecycle::check_permission_and_transition(
            self.store.as_ref(),
            &cluster_id,
            user_id,
            rule.allowed,
        )?;
        let Some(previous) = cluster.previous_version_id else {
            return Err(ControlError::Validation(format!(
                "cluster [{cluster_id}] has no previous version"
            )));
        };

        let cluster = self.acquire_one(user_id, &cluster_id, JobAction::RollbackCluster)?;
        self.holding(&cluster, || {
            let mut job = Job::new(&cluster, JobAction::RollbackCluster);
            job.target_version_id = Some(previous);
            self.schedule(job, None)
        })
    }

    // =========================================================================
    // Jobs and Queries
    // =========================================================================

    async fn complete_job(&self, job_id: &JobId, succeeded: bool) -> Result<Job> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| ControlError::JobNotFound(job_id.clone()))?;
        if job.status.is_finished() {
            return Err(ControlError::JobFinished(job_id.clone()));
        }

        let status = if succeeded {
            JobStatus::Successful
        } else {
            JobStatus::Failed
        };
        if self.store.advance_job(job_id, status)? == 0 {
            return Err(ControlError::JobFinished(job_id.clone()));
        }

        let settled = if succeeded {
            self.complete_success(&job)
        } else {
            self.complete_failure(&job)
        };
        if let Err(e) = settled {
            // Reopen so the completion can be retried.
            if let Err(reopen) = self.store.update_job_status(job_id, job.status) {
                tracing::error!(job_id = %job_id, error = %reopen, "Failed to reopen job");
            }
            return Err(e);
        }

        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| ControlError::JobNotFound(job_id.clone()))?;
        tracing::info!(
            job_id = %job.job_id,
            cluster_id = %job.cluster_id,
            action = %job.action,
            status = job.status.as_str(),
            "Job completed"
        );
        Ok(job)
    }

    async fn describe_cluster(
        &self,
        user_id: &UserId,
        cluster_id: &str,
    ) -> Result<ClusterWrapper> {
        let cluster_id = ClusterId::parse(cluster_id)?;
        let cluster = self
            .store
            .get_cluster(&cluster_id)?
            .ok_or_else(|| ControlError::ClusterNotFound(cluster_id.clone()))?;
        if cluster.owner != *user_id {
            return Err(ControlError::NotOwner {
                user_id: user_id.clone(),
                resource_id: cluster_id.to_string(),
            });
        }
        self.load_wrapper(cluster)
    }
}

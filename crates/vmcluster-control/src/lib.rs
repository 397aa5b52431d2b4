//! Control plane for vmcluster lifecycle operations.
//!
//! This crate owns the business rules around the task scheduling engine:
//! request validation, provider admission, the transition guard that keeps
//! overlapping lifecycle operations apart, and job completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ControlPlaneService                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  Validate   │ │  Provider   │ │  Transition Guard   │   │
//! │  │  requests   │ │  admission  │ │  (conditional write)│   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │ Planner  │   │  Events  │
//!        │ (RocksDB)│   │ + Runner │   │ (owner)  │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmcluster_control::{
//!     ClusterIdsRequest, ClusterService, ControlConfig, ControlPlaneService, StaticProvider,
//! };
//! use vmcluster_core::UserId;
//! use vmcluster_scheduler::{GraphRunner, NoopAgentClient};
//! use vmcluster_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/vmcluster")?);
//! let config = ControlConfig::default();
//! let provider = Arc::new(StaticProvider::from_config(&config));
//! let control = ControlPlaneService::new(store, provider, config);
//!
//! let owner = UserId::new("usr-alice")?;
//! let jobs = control
//!     .stop_clusters(&owner, ClusterIdsRequest::new(["cl-0a1b2c3d"]))
//!     .await?;
//!
//! let runner = GraphRunner::new(
//!     Arc::new(NoopAgentClient::new()),
//!     control.config().planner.task_timeout(),
//! );
//! for job in &jobs {
//!     control.execute(&runner, job).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the status table every operation follows,
//! and [`api`] for the HTTP routes that run jobs in the background.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod service;
pub mod types;
pub mod validate;

pub use error::{ControlError, ErrorKind, Result};
pub use provider::{
    check_vm_based_provider, FrontgateResolution, Provider, StaticProvider, Subnet,
    FRONTGATE_ROLE,
};
pub use service::{ClusterService, ControlPlaneService};
pub use types::{
    AddClusterNodesRequest, CeaseClustersRequest, ClusterIdsRequest, ControlConfig,
    CreateClusterOutcome, CreateClusterRequest, DeleteClusterNodesRequest, DeleteClustersRequest,
    RecoverClustersRequest, ResizeClusterRequest, RoleConf, RollbackClusterRequest,
    RuntimeConfig, RuntimeImage, ScheduledJob, StartClustersRequest, StopClustersRequest,
    SubnetConfig, UpgradeClusterRequest,
};
pub use validate::Validate;

// Re-export commonly used types from dependencies for convenience
pub use vmcluster_core::{ClusterId, JobId, NodeId, UserId};
pub use vmcluster_store::{
    Cluster, ClusterBundle, ClusterNode, ClusterStatus, Job, JobAction, JobStatus, TransitionStatus,
};

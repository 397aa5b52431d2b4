//! Task graph planning and execution for vmcluster lifecycle operations.
//!
//! A lifecycle operation (create, stop, resize, ...) becomes a chain of
//! [`TaskLayer`]s. Layers run strictly in order; the tasks inside one layer
//! are independent and run concurrently.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │  ClusterWrapper  │──▶│  LifecyclePlanner  │──▶│    TaskLayer     │
//! │  (snapshot)      │   │  Frontgate / App   │   │    chain         │
//! └──────────────────┘   └────────────────────┘   └──────────────────┘
//!                                                          │
//!                                                          ▼
//!                        ┌────────────────────┐   ┌──────────────────┐
//!                        │    AgentClient     │◀──│   GraphRunner    │
//!                        │  (pilot over HTTP) │   │  layer barrier   │
//!                        └────────────────────┘   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmcluster_scheduler::{
//!     planner_for, ClusterWrapper, FailurePolicy, Frame, GraphRunner, HttpAgentClient,
//!     JobContext, PlannerConfig,
//! };
//!
//! # async fn example(wrapper: ClusterWrapper, job: JobContext) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlannerConfig::default();
//! let frame = Frame::new(&wrapper, &job, &config, FailurePolicy::Strict);
//!
//! if let Some(graph) = planner_for(frame).create() {
//!     let client = Arc::new(HttpAgentClient::new("http://pilot:9110")?);
//!     let report = GraphRunner::new(client, config.task_timeout()).run(&graph).await;
//!     println!("succeeded: {}", report.succeeded());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod error;
pub mod layer;
pub mod planner;
pub mod runner;
pub mod task;
pub mod wrapper;

pub use client::{AgentClient, HttpAgentClient, NoopAgentClient};
pub use config::PlannerConfig;
pub use error::{Result, SchedulerError};
pub use layer::{GraphBuilder, Layers, TaskLayer};
pub use planner::{
    bootstrap_user_data, planner_for, AppClusterPlanner, FailurePolicy, Frame, FrontgatePlanner,
    JobContext, LifecyclePlanner, HOST_CMD_PREFIX,
};
pub use runner::{GraphRunner, RunReport, TaskOutcome};
pub use task::{
    Directive, FrontgateEndpoint, InstanceDirective, Meta, RunCommandDirective, Task,
    TaskAction, TaskTarget, VolumeDirective,
};
pub use wrapper::ClusterWrapper;

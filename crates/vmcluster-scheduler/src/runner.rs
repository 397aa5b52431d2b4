//! Layer-by-layer execution of a task graph.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::AgentClient;
use crate::error::SchedulerError;
use crate::layer::TaskLayer;
use crate::task::{Task, TaskAction};

/// Result of one executed task.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Task action.
    pub action: TaskAction,
    /// Node (or cluster) the task addressed.
    pub node_id: String,
    /// Whether a failure of this task was tolerated.
    pub failure_allowed: bool,
    /// `None` on success.
    pub error: Option<SchedulerError>,
}

impl TaskOutcome {
    /// Whether the task succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one graph execution.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Number of layers that ran to completion (successfully or not).
    pub layers_executed: usize,
    /// Outcomes of every task that ran, in layer order.
    pub outcomes: Vec<TaskOutcome>,
    /// Index into `outcomes` of the failure that halted the graph.
    pub halted_by: Option<usize>,
}

impl RunReport {
    /// Whether the whole graph ran without a halting failure.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.halted_by.is_none()
    }

    /// The error that halted the graph.
    #[must_use]
    pub fn failure(&self) -> Option<&SchedulerError> {
        self.halted_by
            .and_then(|i| self.outcomes.get(i))
            .and_then(|o| o.error.as_ref())
    }
}

/// Walks a layer chain, running each layer's tasks concurrently.
///
/// A layer is a barrier: the next one starts only after every task of the
/// current one settles. A failure of a task that is not failure-allowed
/// halts the chain after its layer. Completed layers are never undone.
#[derive(Clone)]
pub struct GraphRunner {
    client: Arc<dyn AgentClient>,
    default_timeout: Duration,
}

impl std::fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRunner")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl GraphRunner {
    /// Create a runner over `client`; tasks without their own budget get
    /// `default_timeout`.
    #[must_use]
    pub fn new(client: Arc<dyn AgentClient>, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }

    /// Execute `graph` to completion or to the first halting failure.
    pub async fn run(&self, graph: &TaskLayer) -> RunReport {
        let mut report = RunReport::default();

        for (index, layer) in graph.layers().enumerate() {
            debug!(layer = index, tasks = layer.tasks().len(), "Running task layer");

            let outcomes = join_all(layer.tasks().iter().map(|task| self.run_task(task))).await;
            report.layers_executed += 1;

            for outcome in outcomes {
                if let Some(err) = &outcome.error {
                    if outcome.failure_allowed {
                        warn!(
                            action = %outcome.action,
                            node_id = %outcome.node_id,
                            error = %err,
                            "Task failed, continuing"
                        );
                    } else if report.halted_by.is_none() {
                        report.halted_by = Some(report.outcomes.len());
                    }
                }
                report.outcomes.push(outcome);
            }

            if let Some(err) = report.failure() {
                warn!(layer = index, error = %err, "Task graph halted");
                return report;
            }
        }

        info!(layers = report.layers_executed, "Task graph completed");
        report
    }

    async fn run_task(&self, task: &Task) -> TaskOutcome {
        let budget = task.timeout(self.default_timeout);
        debug!(action = %task.action, node_id = %task.node_id, "Executing task");

        let error = match tokio::time::timeout(budget, self.client.execute(task)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(SchedulerError::Timeout {
                action: task.action.to_string(),
                node_id: task.node_id.clone(),
                seconds: budget.as_secs(),
            }),
        };

        TaskOutcome {
            action: task.action,
            node_id: task.node_id.clone(),
            failure_allowed: task.failure_allowed,
            error,
        }
    }
}

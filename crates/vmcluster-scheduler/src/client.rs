//! Clients that hand tasks to remote agents.
//!
//! [`HttpAgentClient`] posts each task to the pilot service, which relays it
//! to the runtime or to the frontgate and drone agents.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::task::{Directive, Task, TaskAction, TaskTarget};

/// Executes a single task on a remote agent.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Run `task` and wait for the agent's verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent cannot be reached or reports a failure.
    async fn execute(&self, task: &Task) -> Result<()>;
}

/// HTTP client for the pilot task API.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    pilot_url: String,
}

impl HttpAgentClient {
    /// Create a client for the pilot at `pilot_url` (e.g. `http://pilot:9110`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(pilot_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SchedulerError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, pilot_url))
    }

    /// Create a client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, pilot_url: impl Into<String>) -> Self {
        Self {
            client,
            pilot_url: pilot_url.into(),
        }
    }

    /// Get the pilot base URL.
    #[must_use]
    pub fn pilot_url(&self) -> &str {
        &self.pilot_url
    }
}

/// Request body for the pilot task endpoint.
#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    action: TaskAction,
    target: TaskTarget,
    node_id: &'a str,
    directive: &'a Directive,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_seconds: Option<u64>,
}

/// Error response from the pilot.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[allow(dead_code)]
    code: u16,
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn execute(&self, task: &Task) -> Result<()> {
        let url = format!("{}/v1/tasks", self.pilot_url);
        let request = TaskRequest {
            action: task.action,
            target: task.target,
            node_id: &task.node_id,
            directive: &task.directive,
            timeout_seconds: task.directive.timeout_seconds(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(format!("pilot request failed: {e}")))?;

        if response.status().is_success() {
            tracing::debug!(
                job_id = %task.job_id,
                action = %task.action,
                node_id = %task.node_id,
                "Task executed via pilot"
            );
            Ok(())
        } else {
            let status = response.status();
            let error = response
                .json::<ErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("pilot returned status {status}"));

            tracing::error!(
                job_id = %task.job_id,
                action = %task.action,
                node_id = %task.node_id,
                status = %status,
                error = %error,
                "Task failed"
            );

            Err(SchedulerError::RemoteExecution {
                action: task.action.to_string(),
                node_id: task.node_id.clone(),
                message: error,
            })
        }
    }
}

/// A client that accepts every task without running it.
///
/// Used when no pilot is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopAgentClient;

impl NoopAgentClient {
    /// Create a new no-op client.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentClient for NoopAgentClient {
    async fn execute(&self, task: &Task) -> Result<()> {
        tracing::warn!(
            action = %task.action,
            node_id = %task.node_id,
            "NoopAgentClient: task accepted but no pilot configured"
        );
        Ok(())
    }
}

/// Recording agent client for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::AgentClient;
    use crate::error::{Result, SchedulerError};
    use crate::task::{Task, TaskAction};

    /// Records every task and fails the actions it is told to fail.
    #[derive(Debug, Default)]
    pub struct MockAgentClient {
        executed: Mutex<Vec<Task>>,
        failing: Mutex<HashSet<TaskAction>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MockAgentClient {
        /// Create a client that succeeds on every task.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every task with `action` fail.
        pub fn fail_action(&self, action: TaskAction) {
            self.failing.lock().insert(action);
        }

        /// Delay every task by `delay` before answering.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = Some(delay);
        }

        /// Tasks received so far, in call order.
        #[must_use]
        pub fn executed(&self) -> Vec<Task> {
            self.executed.lock().clone()
        }
    }

    #[async_trait]
    impl AgentClient for MockAgentClient {
        async fn execute(&self, task: &Task) -> Result<()> {
            self.executed.lock().push(task.clone());
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().contains(&task.action) {
                return Err(SchedulerError::RemoteExecution {
                    action: task.action.to_string(),
                    node_id: task.node_id.clone(),
                    message: "mock failure".to_string(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FrontgateEndpoint, RunCommandDirective};
    use vmcluster_core::{JobId, UserId};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remove_container_task() -> Task {
        Task {
            job_id: JobId::generate_deterministic("client", 1),
            owner: UserId::new("usr-1").unwrap(),
            action: TaskAction::RemoveContainerOnFrontgate,
            target: TaskTarget::Pilot,
            node_id: "cln-1".to_string(),
            directive: Directive::RunCommand(RunCommandDirective {
                endpoint: FrontgateEndpoint {
                    frontgate_id: "cl-fg".to_string(),
                    frontgate_node_id: "cln-1".to_string(),
                    node_ip: "10.0.0.1".to_string(),
                    node_port: 9111,
                },
                command: "true".to_string(),
                timeout_seconds: 600,
            }),
            failure_allowed: false,
        }
    }

    #[tokio::test]
    async fn posts_task_to_pilot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tasks"))
            .and(body_partial_json(serde_json::json!({
                "action": "remove-container-on-frontgate",
                "target": "pilot",
                "node_id": "cln-1",
                "timeout_seconds": 600,
                "directive": { "endpoint": { "node_ip": "10.0.0.1" } }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpAgentClient::new(server.uri()).unwrap();
        client.execute(&remove_container_task()).await.unwrap();
    }

    #[tokio::test]
    async fn pilot_error_becomes_remote_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tasks"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "docker not running",
                "code": 500
            })))
            .mount(&server)
            .await;

        let client = HttpAgentClient::new(server.uri()).unwrap();
        let err = client.execute(&remove_container_task()).await.unwrap_err();
        match err {
            SchedulerError::RemoteExecution { message, .. } => {
                assert_eq!(message, "docker not running");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_pilot_is_a_transport_error() {
        let client = HttpAgentClient::new("http://127.0.0.1:1").unwrap();
        let err = client.execute(&remove_container_task()).await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn noop_client_accepts_tasks() {
        NoopAgentClient::new()
            .execute(&remove_container_task())
            .await
            .unwrap();
    }
}

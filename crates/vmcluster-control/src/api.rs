//! HTTP surface of the control plane.
//!
//! Lifecycle requests are scheduled synchronously; the task graphs of the
//! resulting jobs run in the background on the shared [`GraphRunner`]. Each
//! caller can follow the change events of their own resources on
//! `/v1/events`.
//!
//! The caller is identified by the `x-vmcluster-user` header.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use vmcluster_core::{ClusterId, JobId, UserId};
use vmcluster_events::{ChangeEvent, ChannelPublisher};
use vmcluster_scheduler::{GraphRunner, TaskLayer};
use vmcluster_store::{
    Cluster, ClusterCommon, ClusterNode, ClusterRole, JobAction, JobStatus, Store,
};

use crate::error::ControlError;
use crate::service::{ClusterService, ControlPlaneService};
use crate::types::{
    AddClusterNodesRequest, ClusterIdsRequest, CreateClusterRequest, DeleteClusterNodesRequest,
    ResizeClusterRequest, RollbackClusterRequest, ScheduledJob, UpgradeClusterRequest,
};

/// Header carrying the calling user.
pub const USER_HEADER: &str = "x-vmcluster-user";

/// Application state shared across handlers.
pub struct AppState<S: Store> {
    /// Lifecycle service.
    pub control: Arc<ControlPlaneService<S>>,
    /// Executes scheduled task graphs.
    pub runner: Arc<GraphRunner>,
    /// Per-owner change event channels.
    pub events: Arc<ChannelPublisher>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            runner: Arc::clone(&self.runner),
            events: Arc::clone(&self.events),
        }
    }
}

impl<S: Store + 'static> AppState<S> {
    /// Run `jobs` one after another in the background.
    fn dispatch(&self, jobs: Vec<ScheduledJob>) -> JobsResponse {
        let response = JobsResponse {
            jobs: jobs.iter().map(JobSummary::from).collect(),
        };
        let control = Arc::clone(&self.control);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            for scheduled in jobs {
                if let Err(e) = control.execute(&runner, &scheduled).await {
                    tracing::error!(
                        job_id = %scheduled.job.job_id,
                        cluster_id = %scheduled.job.cluster_id,
                        error = %e,
                        "Job execution failed"
                    );
                }
            }
        });
        response
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// A scheduled job as reported to the caller.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    /// Job ID.
    pub job_id: JobId,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Operation performed.
    pub action: JobAction,
    /// Status at scheduling time.
    pub status: JobStatus,
    /// Number of layers in the task graph.
    pub layers: usize,
    /// Number of tasks in the task graph.
    pub tasks: usize,
}

impl From<&ScheduledJob> for JobSummary {
    fn from(scheduled: &ScheduledJob) -> Self {
        let graph = scheduled.graph.as_ref();
        Self {
            job_id: scheduled.job.job_id.clone(),
            cluster_id: scheduled.job.cluster_id.clone(),
            action: scheduled.job.action,
            status: scheduled.job.status,
            layers: graph.map_or(0, TaskLayer::layer_count),
            tasks: graph.map_or(0, TaskLayer::task_count),
        }
    }
}

/// Response for every lifecycle request.
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    /// Jobs in execution order.
    pub jobs: Vec<JobSummary>,
}

/// Response for cluster creation.
#[derive(Debug, Serialize)]
pub struct CreateClusterResponse {
    /// The new cluster.
    pub cluster_id: ClusterId,
    /// Jobs in execution order; a new frontgate comes first.
    pub jobs: Vec<JobSummary>,
}

/// Query of the describe endpoint.
#[derive(Debug, Deserialize)]
pub struct DescribeQuery {
    /// Cluster to describe.
    pub cluster_id: String,
}

/// A cluster with its nodes and role configuration.
#[derive(Debug, Serialize)]
pub struct ClusterView {
    /// The cluster row.
    pub cluster: Cluster,
    /// Nodes ordered by ID.
    pub nodes: Vec<ClusterNode>,
    /// Sizing per role, ordered by role name.
    pub roles: Vec<ClusterRole>,
    /// Image and capabilities per role, ordered by role name.
    pub commons: Vec<ClusterCommon>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

/// A control plane error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ControlError);

impl From<ControlError> for ApiError {
    fn from(value: ControlError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.http_status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

/// The calling user.
fn caller(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let value = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    UserId::new(value).map_err(|e| ApiError(ControlError::from(e)))
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "vmcluster-control",
    })
}

async fn ready<S: Store + 'static>(State(state): State<AppState<S>>) -> impl IntoResponse {
    match state.control.store().get_cluster(&ClusterId::generate()) {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Store is not ready");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn create_cluster<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<CreateClusterRequest>,
) -> Result<(StatusCode, Json<CreateClusterResponse>), ApiError> {
    let user = caller(&headers)?;
    let outcome = state.control.create_cluster(&user, request).await?;
    let jobs: Vec<ScheduledJob> = outcome
        .frontgate_job
        .into_iter()
        .chain([outcome.job])
        .collect();
    let JobsResponse { jobs } = state.dispatch(jobs);
    Ok((
        StatusCode::CREATED,
        Json(CreateClusterResponse {
            cluster_id: outcome.cluster_id,
            jobs,
        }),
    ))
}

async fn delete_clusters<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ClusterIdsRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let jobs = state.control.delete_clusters(&user, request).await?;
    Ok(Json(state.dispatch(jobs)))
}

async fn start_clusters<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ClusterIdsRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let jobs = state.control.start_clusters(&user, request).await?;
    Ok(Json(state.dispatch(jobs)))
}

async fn stop_clusters<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ClusterIdsRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let jobs = state.control.stop_clusters(&user, request).await?;
    Ok(Json(state.dispatch(jobs)))
}

async fn recover_clusters<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ClusterIdsRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let jobs = state.control.recover_clusters(&user, request).await?;
    Ok(Json(state.dispatch(jobs)))
}

async fn cease_clusters<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ClusterIdsRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let jobs = state.control.cease_clusters(&user, request).await?;
    Ok(Json(state.dispatch(jobs)))
}

async fn resize_cluster<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<ResizeClusterRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let job = state.control.resize_cluster(&user, request).await?;
    Ok(Json(state.dispatch(vec![job])))
}

async fn add_cluster_nodes<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<AddClusterNodesRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let job = state.control.add_cluster_nodes(&user, request).await?;
    Ok(Json(state.dispatch(vec![job])))
}

async fn delete_cluster_nodes<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<DeleteClusterNodesRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let job = state.control.delete_cluster_nodes(&user, request).await?;
    Ok(Json(state.dispatch(vec![job])))
}

async fn upgrade_cluster<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<UpgradeClusterRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let job = state.control.upgrade_cluster(&user, request).await?;
    Ok(Json(state.dispatch(vec![job])))
}

async fn rollback_cluster<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<RollbackClusterRequest>,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = caller(&headers)?;
    let job = state.control.rollback_cluster(&user, request).await?;
    Ok(Json(state.dispatch(vec![job])))
}

async fn describe_cluster<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Query(query): Query<DescribeQuery>,
) -> Result<Json<ClusterView>, ApiError> {
    let user = caller(&headers)?;
    let wrapper = state.control.describe_cluster(&user, &query.cluster_id).await?;
    let mut roles: Vec<ClusterRole> = wrapper.roles.into_values().collect();
    roles.sort_by(|a, b| a.role.cmp(&b.role));
    let mut commons: Vec<ClusterCommon> = wrapper.commons.into_values().collect();
    commons.sort_by(|a, b| a.role.cmp(&b.role));
    Ok(Json(ClusterView {
        cluster: wrapper.cluster,
        nodes: wrapper.nodes.into_values().collect(),
        roles,
        commons,
    }))
}

/// Turn an owner's event channel into a server-sent event stream.
fn change_stream(
    rx: UnboundedReceiver<ChangeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let change = rx.recv().await?;
        let event = Event::default()
            .event(change.action.to_string())
            .json_data(&change)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to encode change event");
                Event::default().comment("unencodable change event")
            });
        Some((Ok(event), rx))
    })
}

async fn events<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = caller(&headers)?;
    tracing::debug!(user_id = %user, "Change event subscriber attached");
    let rx = state.events.subscribe(&user);
    Ok(Sse::new(change_stream(rx)).keep_alive(KeepAlive::default()))
}

/// Build the control plane router.
pub fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<S>))
        .route("/v1/clusters", post(create_cluster::<S>))
        .route("/v1/clusters/describe", get(describe_cluster::<S>))
        .route("/v1/clusters/delete", post(delete_clusters::<S>))
        .route("/v1/clusters/start", post(start_clusters::<S>))
        .route("/v1/clusters/stop", post(stop_clusters::<S>))
        .route("/v1/clusters/recover", post(recover_clusters::<S>))
        .route("/v1/clusters/cease", post(cease_clusters::<S>))
        .route("/v1/clusters/resize", post(resize_cluster::<S>))
        .route("/v1/clusters/add-nodes", post(add_cluster_nodes::<S>))
        .route("/v1/clusters/delete-nodes", post(delete_cluster_nodes::<S>))
        .route("/v1/clusters/upgrade", post(upgrade_cluster::<S>))
        .route("/v1/clusters/rollback", post(rollback_cluster::<S>))
        .route("/v1/events", get(events::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::mock::MockProvider;
    use crate::types::{ControlConfig, RoleConf, RuntimeConfig, RuntimeImage};
    use axum::http::HeaderValue;
    use futures::StreamExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use vmcluster_events::{ChangeAction, ChangeDispatcher};
    use vmcluster_scheduler::NoopAgentClient;
    use vmcluster_store::{ClusterStatus, RocksStore, Table};

    fn config() -> ControlConfig {
        ControlConfig {
            runtimes: vec![RuntimeConfig {
                runtime_id: "rt-1".to_string(),
                provider: "static".to_string(),
                url: "https://api.local".to_string(),
                zone: "zone-1".to_string(),
            }],
            runtime_images: vec![RuntimeImage {
                url: "https://api.local".to_string(),
                zone: "zone-1".to_string(),
                image_id: "img-base".to_string(),
            }],
            ..ControlConfig::default()
        }
    }

    fn create_test_state() -> (AppState<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let events = Arc::new(ChannelPublisher::new());
        store.set_observer(Arc::new(ChangeDispatcher::new(
            store.owner_lookup(),
            Arc::clone(&events),
        )));
        let provider = MockProvider::new();
        provider.add_subnet("vxnet-1", "vpc-1", "zone-1");
        let state = AppState {
            control: Arc::new(ControlPlaneService::new(store, Arc::new(provider), config())),
            runner: Arc::new(GraphRunner::new(
                Arc::new(NoopAgentClient::new()),
                Duration::from_secs(5),
            )),
            events,
        };
        (state, dir)
    }

    fn headers(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(user).unwrap());
        headers
    }

    fn create_request() -> CreateClusterRequest {
        CreateClusterRequest {
            name: "db".to_string(),
            app_id: "app-1".to_string(),
            version_id: "appv-1".to_string(),
            runtime_id: "rt-1".to_string(),
            subnet_id: "vxnet-1".to_string(),
            roles: vec![RoleConf {
                role: "worker".to_string(),
                cpu: 2,
                memory: 2048,
                storage_size: 0,
                mount_point: String::new(),
                count: 2,
                replicas: 0,
                image_id: None,
                advanced_actions: String::new(),
            }],
        }
    }

    async fn wait_for_status(
        state: &AppState<RocksStore>,
        cluster_id: &ClusterId,
        status: ClusterStatus,
    ) {
        for _ in 0..200 {
            let cluster = state.control.store().get_cluster(cluster_id).unwrap().unwrap();
            if cluster.status == status && cluster.transition_status.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cluster {cluster_id} never settled on {status:?}");
    }

    #[test]
    fn missing_caller_is_rejected() {
        let err = caller(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.0.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        assert_eq!(caller(&headers("usr-1")).unwrap().as_str(), "usr-1");
    }

    #[test]
    fn error_status_follows_kind() {
        let response = ApiError(ControlError::JobNotFound(JobId::generate())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_stop_runs_jobs_in_background() {
        let (state, _dir) = create_test_state();

        let (status, Json(created)) =
            create_cluster(State(state.clone()), headers("usr-1"), Json(create_request()))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.jobs.len(), 2);
        assert_eq!(created.jobs[0].layers, 7);
        assert_eq!(created.jobs[1].action, JobAction::CreateCluster);
        wait_for_status(&state, &created.cluster_id, ClusterStatus::Active).await;

        let Json(stopped) = stop_clusters(
            State(state.clone()),
            headers("usr-1"),
            Json(ClusterIdsRequest::new([&created.cluster_id])),
        )
        .await
        .unwrap();
        assert_eq!(stopped.jobs.len(), 1);
        wait_for_status(&state, &created.cluster_id, ClusterStatus::Stopped).await;

        let Json(view) = describe_cluster(
            State(state.clone()),
            headers("usr-1"),
            Query(DescribeQuery {
                cluster_id: created.cluster_id.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(view.cluster.status, ClusterStatus::Stopped);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.roles.len(), 1);
    }

    #[tokio::test]
    async fn foreign_cluster_is_forbidden() {
        let (state, _dir) = create_test_state();
        let (_, Json(created)) =
            create_cluster(State(state.clone()), headers("usr-1"), Json(create_request()))
                .await
                .unwrap();

        let err = describe_cluster(
            State(state.clone()),
            headers("usr-2"),
            Query(DescribeQuery {
                cluster_id: created.cluster_id.to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn change_stream_follows_owner_channel() {
        let (state, _dir) = create_test_state();
        let owner = UserId::new("usr-1").unwrap();
        let mut stream = Box::pin(change_stream(state.events.subscribe(&owner)));

        state
            .control
            .create_cluster(&owner, create_request())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn change_stream_ends_with_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(ChangeEvent::new(
            Table::Cluster,
            "cl-1",
            ChangeAction::Create,
            UserId::new("usr-1").unwrap(),
        ))
        .unwrap();
        drop(tx);

        let mut stream = Box::pin(change_stream(rx));
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
    }
}

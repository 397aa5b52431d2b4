//! Error types for the control plane.
//!
//! Every error maps to an [`ErrorKind`], which fixes the HTTP status a
//! front end should answer with.

use thiserror::Error;
use vmcluster_core::{ClusterId, IdError, JobId, NodeId, UserId};
use vmcluster_scheduler::SchedulerError;
use vmcluster_store::{ClusterStatus, StoreError, TransitionStatus};

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Coarse classification of control plane errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The resource (or something it depends on) does not exist.
    NotFound,
    /// The caller may not act on the resource.
    PermissionDenied,
    /// Another lifecycle operation holds the resource.
    Conflict,
    /// The resource is in the wrong status for the operation.
    InvalidState,
    /// The request is malformed.
    ValidationFailed,
    /// A remote agent or provider failed.
    RemoteExecutionFailure,
    /// Anything else.
    Internal,
}

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested cluster was not found.
    #[error("cluster not found: {0}")]
    ClusterNotFound(ClusterId),

    /// The requested node was not found.
    #[error("cluster node not found: {0}")]
    NodeNotFound(NodeId),

    /// The requested job was not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The user is not the owner of the requested resource.
    #[error("user {user_id} is not the owner of {resource_id}")]
    NotOwner {
        /// The user making the request.
        user_id: UserId,
        /// The resource being accessed.
        resource_id: String,
    },

    /// A lifecycle operation is already in progress on the resource.
    #[error("{resource_id} is [{transition}], please try later")]
    Busy {
        /// The held resource.
        resource_id: String,
        /// The operation holding it.
        transition: &'static str,
    },

    /// The resource status does not allow the operation.
    #[error("{resource_id} status is [{status}] not in {allowed:?}")]
    InvalidState {
        /// The resource.
        resource_id: String,
        /// Its current status.
        status: ClusterStatus,
        /// Statuses the operation accepts.
        allowed: Vec<ClusterStatus>,
    },

    /// The job has already been completed.
    #[error("job {0} is already finished")]
    JobFinished(JobId),

    /// The role does not allow the requested advanced action.
    #[error("action {action} is not supported by role {role} of cluster {cluster_id}")]
    ActionNotSupported {
        /// The cluster.
        cluster_id: ClusterId,
        /// The role checked.
        role: String,
        /// The requested action.
        action: String,
    },

    /// A request failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier in the request is malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The runtime is not configured.
    #[error("runtime not found: {0}")]
    RuntimeNotFound(String),

    /// No image is configured for the runtime.
    #[error("no image for runtime url [{url}] zone [{zone}]")]
    ImageNotFound {
        /// Runtime endpoint.
        url: String,
        /// Runtime zone.
        zone: String,
    },

    /// The subnet lookup failed.
    #[error("describe subnet [{subnet_id}] failed: {message}")]
    SubnetLookup {
        /// The subnet.
        subnet_id: String,
        /// Provider message.
        message: String,
    },

    /// The subnet is unusable.
    #[error("subnet [{0}] not found or vpc has no external routing")]
    SubnetUnavailable(String),

    /// The provider refused the resources.
    #[error("resource quota not enough: {0}")]
    QuotaExceeded(String),

    /// A provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Remote execution error.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Build a `Busy` error for a resource held by `transition`.
    #[must_use]
    pub fn busy(resource_id: impl ToString, transition: TransitionStatus) -> Self {
        Self::Busy {
            resource_id: resource_id.to_string(),
            transition: transition.as_str(),
        }
    }

    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ClusterNotFound(_)
            | Self::NodeNotFound(_)
            | Self::JobNotFound(_)
            | Self::RuntimeNotFound(_)
            | Self::ImageNotFound { .. }
            | Self::SubnetLookup { .. }
            | Self::Store(StoreError::NotFound) => ErrorKind::NotFound,
            Self::NotOwner { .. }
            | Self::ActionNotSupported { .. }
            | Self::SubnetUnavailable(_)
            | Self::QuotaExceeded(_) => ErrorKind::PermissionDenied,
            Self::Busy { .. } | Self::JobFinished(_) => ErrorKind::Conflict,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Validation(_) | Self::InvalidId(_) => ErrorKind::ValidationFailed,
            Self::Provider(_) | Self::Scheduler(_) => ErrorKind::RemoteExecutionFailure,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::Conflict | ErrorKind::InvalidState => 409,
            ErrorKind::ValidationFailed => 400,
            ErrorKind::RemoteExecutionFailure => 502,
            ErrorKind::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let cluster_id = ClusterId::generate_deterministic("err", 1);
        let user_id = UserId::new("usr-1").unwrap();

        assert_eq!(
            ControlError::ClusterNotFound(cluster_id.clone()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::NotOwner {
                user_id,
                resource_id: cluster_id.to_string()
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            ControlError::busy(&cluster_id, TransitionStatus::Creating).http_status_code(),
            409
        );
        assert_eq!(
            ControlError::InvalidState {
                resource_id: cluster_id.to_string(),
                status: ClusterStatus::Active,
                allowed: vec![ClusterStatus::Stopped],
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            ControlError::Validation("missing cluster_id".to_string()).http_status_code(),
            400
        );
        assert_eq!(ControlError::Provider("boom".to_string()).http_status_code(), 502);
        assert_eq!(ControlError::Internal("boom".to_string()).http_status_code(), 500);
    }

    #[test]
    fn busy_message_asks_to_retry() {
        let err = ControlError::busy("cl-1", TransitionStatus::Stopping);
        assert_eq!(err.to_string(), "cl-1 is [stopping], please try later");
    }
}

//! Required-field checks for lifecycle requests.

use crate::error::{ControlError, Result};
use crate::types::{
    AddClusterNodesRequest, ClusterIdsRequest, CreateClusterRequest, DeleteClusterNodesRequest,
    ResizeClusterRequest, RollbackClusterRequest, UpgradeClusterRequest,
};

/// A request that can check itself before any state is touched.
pub trait Validate {
    /// Check that every required field is present.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` naming the first missing field.
    fn validate(&self) -> Result<()>;
}

/// Fail on the first field whose `present` flag is false.
fn required(fields: &[(&str, bool)]) -> Result<()> {
    match fields.iter().find(|(_, present)| !present) {
        Some((name, _)) => Err(ControlError::Validation(format!(
            "missing required field [{name}]"
        ))),
        None => Ok(()),
    }
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

fn all_filled(values: &[String]) -> bool {
    !values.is_empty() && values.iter().all(|v| filled(v))
}

impl Validate for CreateClusterRequest {
    fn validate(&self) -> Result<()> {
        required(&[
            ("app_id", filled(&self.app_id)),
            ("version_id", filled(&self.version_id)),
            ("runtime_id", filled(&self.runtime_id)),
            ("conf", !self.roles.is_empty()),
        ])?;
        if let Some(role) = self.roles.iter().find(|r| !filled(&r.role)) {
            return Err(ControlError::Validation(format!(
                "role name is empty (count {})",
                role.count
            )));
        }
        if let Some(role) = self.roles.iter().find(|r| r.count == 0 && r.replicas == 0) {
            return Err(ControlError::Validation(format!(
                "role [{}] has no nodes",
                role.role
            )));
        }
        Ok(())
    }
}

impl Validate for ClusterIdsRequest {
    fn validate(&self) -> Result<()> {
        required(&[("cluster_id", all_filled(&self.cluster_id))])
    }
}

impl Validate for UpgradeClusterRequest {
    fn validate(&self) -> Result<()> {
        required(&[
            ("cluster_id", filled(&self.cluster_id)),
            ("version_id", filled(&self.version_id)),
        ])
    }
}

impl Validate for RollbackClusterRequest {
    fn validate(&self) -> Result<()> {
        required(&[("cluster_id", filled(&self.cluster_id))])
    }
}

impl Validate for ResizeClusterRequest {
    fn validate(&self) -> Result<()> {
        required(&[
            ("cluster_id", filled(&self.cluster_id)),
            ("role", filled(&self.role)),
        ])
    }
}

impl Validate for AddClusterNodesRequest {
    fn validate(&self) -> Result<()> {
        required(&[
            ("cluster_id", filled(&self.cluster_id)),
            ("role", filled(&self.role)),
        ])?;
        if self.count == 0 {
            return Err(ControlError::Validation("count must be positive".to_string()));
        }
        Ok(())
    }
}

impl Validate for DeleteClusterNodesRequest {
    fn validate(&self) -> Result<()> {
        required(&[
            ("cluster_id", filled(&self.cluster_id)),
            ("role", filled(&self.role)),
            ("node_id", all_filled(&self.node_id)),
        ])
    }
}

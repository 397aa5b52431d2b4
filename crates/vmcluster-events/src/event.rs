//! Change event types.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use vmcluster_core::UserId;
use vmcluster_store::{ColumnValue, Table};

/// The kind of change a [`ChangeEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Row inserted.
    Create,
    /// Row updated.
    Update,
    /// Row removed.
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A committed change to one row, scoped to the row's owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Table the row lives in.
    pub table: Table,
    /// Key of the row.
    pub resource_id: String,
    /// Kind of change.
    pub action: ChangeAction,
    /// Reported columns the change carried, with their new values.
    pub values: BTreeMap<String, ColumnValue>,
    /// Owner the event is delivered to. Not part of the published body.
    #[serde(skip)]
    pub owner: UserId,
}

impl ChangeEvent {
    /// Create an event without values.
    #[must_use]
    pub fn new(
        table: Table,
        resource_id: impl Into<String>,
        action: ChangeAction,
        owner: UserId,
    ) -> Self {
        Self {
            table,
            resource_id: resource_id.into(),
            action,
            values: BTreeMap::new(),
            owner,
        }
    }

    /// Attach a column value.
    #[must_use]
    pub fn with_value(mut self, column: &str, value: ColumnValue) -> Self {
        self.values.insert(column.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_body_omits_owner() {
        let event = ChangeEvent::new(
            Table::Cluster,
            "cl-00000001",
            ChangeAction::Update,
            UserId::new("usr-1").unwrap(),
        )
        .with_value("status", ColumnValue::from("active"));

        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "table": "cluster",
                "resource_id": "cl-00000001",
                "action": "update",
                "values": { "status": "active" },
            })
        );
    }
}

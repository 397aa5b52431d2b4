//! Tables whose changes are pushed to subscribers.

use vmcluster_store::schema::column;
use vmcluster_store::Table;

const CLUSTER_COLUMNS: &[&str] = &[
    column::CLUSTER_ID,
    column::STATUS,
    column::TRANSITION_STATUS,
];

const CLUSTER_NODE_COLUMNS: &[&str] = &[
    column::NODE_ID,
    column::STATUS,
    column::TRANSITION_STATUS,
    column::PRIVATE_IP,
];

const JOB_COLUMNS: &[&str] = &[column::JOB_ID, column::STATUS];

/// The reported columns of an event-eligible table.
///
/// The first column is the key; the rest are reported when a mutation
/// carries them. Returns `None` for tables that never produce events.
#[must_use]
pub fn event_columns(table: Table) -> Option<&'static [&'static str]> {
    match table {
        Table::Cluster => Some(CLUSTER_COLUMNS),
        Table::ClusterNode => Some(CLUSTER_NODE_COLUMNS),
        Table::Job => Some(JOB_COLUMNS),
        Table::ClusterRole | Table::ClusterCommon | Table::CategoryResource => None,
    }
}

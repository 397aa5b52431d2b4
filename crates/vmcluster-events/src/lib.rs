//! Change-capture event dispatch for vmcluster.
//!
//! The store describes every committed write as a
//! [`Mutation`](vmcluster_store::Mutation). The [`ChangeDispatcher`] turns
//! mutations of event-eligible tables into [`ChangeEvent`]s and publishes
//! each one on the topic of the changed row's owner.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmcluster_core::UserId;
//! use vmcluster_events::{ChangeDispatcher, ChannelPublisher};
//! use vmcluster_store::RocksStore;
//!
//! let store = RocksStore::open("/tmp/vmcluster-db").unwrap();
//! let publisher = Arc::new(ChannelPublisher::new());
//! let dispatcher = ChangeDispatcher::new(store.owner_lookup(), publisher.clone());
//! store.set_observer(Arc::new(dispatcher));
//!
//! let mut events = publisher.subscribe(&UserId::new("usr-alice").unwrap());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod publisher;
pub mod tables;

pub use dispatcher::ChangeDispatcher;
pub use error::{EventError, Result};
pub use event::{ChangeAction, ChangeEvent};
pub use publisher::{ChannelPublisher, EventPublisher};
pub use tables::event_columns;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tempfile::TempDir;
    use vmcluster_core::{ClusterId, UserId};
    use vmcluster_store::{
        Cluster, ClusterPatch, ClusterStatus, ClusterType, RocksStore, Store, Table,
        TransitionCondition, TransitionStatus,
    };

    fn cluster(owner: &UserId) -> Cluster {
        let now = Utc::now();
        Cluster {
            cluster_id: ClusterId::generate(),
            name: "events".to_string(),
            owner: owner.clone(),
            app_id: "app-1".to_string(),
            version_id: "appv-1".to_string(),
            previous_version_id: None,
            runtime_id: "rt-1".to_string(),
            cluster_type: ClusterType::Normal,
            status: ClusterStatus::Pending,
            transition_status: TransitionStatus::Idle,
            vpc_id: String::new(),
            subnet_id: "vxnet-1".to_string(),
            zone: "zone-1".to_string(),
            frontgate_id: None,
            created_at: now,
            status_time: now,
        }
    }

    #[tokio::test]
    async fn store_writes_reach_owner_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let publisher = Arc::new(ChannelPublisher::new());
        store.set_observer(Arc::new(ChangeDispatcher::new(
            store.owner_lookup(),
            publisher.clone(),
        )));

        let owner = UserId::new("usr-alice").unwrap();
        let mut rx = publisher.subscribe(&owner);
        let cluster = cluster(&owner);
        let id = &cluster.cluster_id;

        store.insert_cluster(&cluster).unwrap();
        let condition = TransitionCondition::new(&owner, &[ClusterStatus::Pending]);
        store
            .begin_cluster_transition(id, TransitionStatus::Creating, &condition)
            .unwrap();
        store
            .update_cluster(id, &ClusterPatch::settle(ClusterStatus::Active))
            .unwrap();
        store.delete_cluster(id).unwrap();

        let mut actions = Vec::new();
        for _ in 0..4 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.table, Table::Cluster);
            assert_eq!(event.resource_id, id.as_str());
            actions.push(event.action);
        }
        assert_eq!(
            actions,
            vec![
                ChangeAction::Create,
                ChangeAction::Update,
                ChangeAction::Update,
                ChangeAction::Delete,
            ]
        );
    }
}

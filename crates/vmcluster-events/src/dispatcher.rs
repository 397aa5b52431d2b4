//! Turns committed store mutations into owner-scoped change events.

use std::collections::{BTreeMap, HashMap, HashSet};

use vmcluster_core::UserId;
use vmcluster_store::{
    ColumnValue, DeleteMutation, InsertMutation, Mutation, MutationObserver, OwnerResolver,
    Predicate, PredicateValue, Table, UpdateMutation,
};

use crate::event::{ChangeAction, ChangeEvent};
use crate::publisher::EventPublisher;
use crate::tables::event_columns;

/// Observes store commits and publishes change events for eligible tables.
///
/// Failures never reach the writer: a row whose owner cannot be resolved is
/// skipped, and publish errors are logged and dropped.
pub struct ChangeDispatcher<R, P> {
    resolver: R,
    publisher: P,
}

impl<R: OwnerResolver, P: EventPublisher> ChangeDispatcher<R, P> {
    /// Create a dispatcher resolving owners with `resolver` and publishing
    /// through `publisher`.
    pub fn new(resolver: R, publisher: P) -> Self {
        Self {
            resolver,
            publisher,
        }
    }

    /// Compute the events a mutation produces, resolving owners as needed.
    #[must_use]
    pub fn events_for(&self, mutation: &Mutation) -> Vec<ChangeEvent> {
        let Some(columns) = event_columns(mutation.table()) else {
            return Vec::new();
        };
        let (key, reported) = (columns[0], &columns[1..]);

        match mutation {
            Mutation::Insert(insert) => self.insert_events(insert, key, reported),
            Mutation::Update(update) => self.update_events(update, key, reported),
            Mutation::Delete(delete) => self.delete_events(delete, key),
        }
    }

    fn insert_events(
        &self,
        insert: &InsertMutation,
        key: &str,
        reported: &[&str],
    ) -> Vec<ChangeEvent> {
        let Some(key_idx) = insert.columns.iter().position(|c| *c == key) else {
            return Vec::new();
        };
        let value_idx: Vec<(usize, &str)> = insert
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| reported.contains(*c))
            .map(|(idx, c)| (idx, *c))
            .collect();

        // One event per distinct key; a later row with the same key wins.
        let mut order = Vec::new();
        let mut resources: HashMap<String, BTreeMap<String, ColumnValue>> = HashMap::new();
        for row in &insert.rows {
            let Some(rid) = row.get(key_idx).and_then(ColumnValue::as_text) else {
                continue;
            };
            let values = value_idx
                .iter()
                .filter_map(|(idx, c)| row.get(*idx).map(|v| ((*c).to_string(), v.clone())))
                .collect();
            if resources.insert(rid.to_string(), values).is_none() {
                order.push(rid.to_string());
            }
        }

        order
            .into_iter()
            .filter_map(|rid| {
                let owner = self.owner_of(insert.table, &rid)?;
                let values = resources.remove(&rid).unwrap_or_default();
                Some(ChangeEvent {
                    values,
                    ..ChangeEvent::new(insert.table, rid, ChangeAction::Create, owner)
                })
            })
            .collect()
    }

    fn update_events(
        &self,
        update: &UpdateMutation,
        key: &str,
        reported: &[&str],
    ) -> Vec<ChangeEvent> {
        let values: BTreeMap<String, ColumnValue> = update
            .assignments
            .iter()
            .filter(|(c, _)| reported.contains(c))
            .map(|(c, v)| ((*c).to_string(), v.clone()))
            .collect();

        resource_ids(key, &update.predicates)
            .into_iter()
            .filter_map(|rid| {
                let owner = self.owner_of(update.table, &rid)?;
                Some(ChangeEvent {
                    values: values.clone(),
                    ..ChangeEvent::new(update.table, rid, ChangeAction::Update, owner)
                })
            })
            .collect()
    }

    fn delete_events(&self, delete: &DeleteMutation, key: &str) -> Vec<ChangeEvent> {
        resource_ids(key, &delete.predicates)
            .into_iter()
            .filter_map(|rid| {
                let owner = delete
                    .prior_owners
                    .iter()
                    .find(|(id, _)| *id == rid)
                    .map(|(_, owner)| owner.clone())
                    .or_else(|| self.owner_of(delete.table, &rid))?;
                Some(ChangeEvent::new(
                    delete.table,
                    rid,
                    ChangeAction::Delete,
                    owner,
                ))
            })
            .collect()
    }

    fn owner_of(&self, table: Table, rid: &str) -> Option<UserId> {
        match self.resolver.resolve_owner(table, rid) {
            Ok(Some(owner)) => Some(owner),
            Ok(None) => {
                tracing::debug!(
                    table = %table,
                    resource_id = %rid,
                    "No owner for changed row, skipping event"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    table = %table,
                    resource_id = %rid,
                    error = %e,
                    "Owner lookup failed, skipping event"
                );
                None
            }
        }
    }
}

/// Extract resource ids from a WHERE clause.
///
/// Only equality predicates on the key column count. A write filtered by
/// any other predicate (`!=`, ranges, patterns, or equality on a non-key
/// column) produces no events even though it changed rows.
fn resource_ids(key: &str, predicates: &[Predicate]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for predicate in predicates {
        let Predicate::Eq { column, value } = predicate else {
            continue;
        };
        if *column != key {
            continue;
        }
        let values = match value {
            PredicateValue::One(v) => std::slice::from_ref(v),
            PredicateValue::Many(vs) => vs.as_slice(),
        };
        for id in values.iter().filter_map(ColumnValue::as_text) {
            if seen.insert(id.to_string()) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

impl<R: OwnerResolver, P: EventPublisher> MutationObserver for ChangeDispatcher<R, P> {
    fn on_commit(&self, mutation: &Mutation) {
        for event in self.events_for(mutation) {
            if let Err(e) = self.publisher.publish(&event.owner, &event) {
                tracing::warn!(
                    table = %event.table,
                    resource_id = %event.resource_id,
                    action = %event.action,
                    error = %e,
                    "Failed to publish change event"
                );
            }
        }
    }
}

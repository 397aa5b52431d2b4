//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! All writes go through one write lock so that conditional transition
//! writes can read and write the same row atomically. Mutation descriptions
//! are handed to the observer only after the lock is released.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use vmcluster_core::{ClusterId, JobId, NodeId, UserId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::mutation::{
    ColumnValue, DeleteMutation, InsertMutation, Mutation, MutationObserver, Predicate,
    UpdateMutation,
};
use crate::schema::{all_column_families, cf, column, Table};
use crate::types::{
    CategoryResource, Cluster, ClusterBundle, ClusterCommon, ClusterNode, ClusterPatch,
    ClusterRole, Job, JobStatus, NodePatch, TransitionCondition, TransitionStatus,
};
use crate::{OwnerResolver, Store};

type Db = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
    write_lock: Mutex<()>,
    observer: RwLock<Option<Arc<dyn MutationObserver>>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
            observer: RwLock::new(None),
        })
    }

    /// Register the observer that receives every committed mutation.
    ///
    /// Replaces any previously registered observer.
    pub fn set_observer(&self, observer: Arc<dyn MutationObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// A read-only owner resolver sharing this store's database handle.
    ///
    /// The resolver does not keep the store itself alive, so it can be
    /// handed to the observer without forming a reference cycle.
    #[must_use]
    pub fn owner_lookup(&self) -> OwnerLookup {
        OwnerLookup {
            db: Arc::clone(&self.db),
        }
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn notify(&self, mutations: &[Mutation]) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            for mutation in mutations {
                observer.on_commit(mutation);
            }
        }
    }

    fn ensure_absent(&self, cf_name: &str, table: Table, key: &str) -> Result<()> {
        let handle = cf(&self.db, cf_name)?;
        let existing = self
            .db
            .get_pinned_cf(&handle, keys::id_key(key))
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists {
                table,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_nodes_absent(&self, nodes: &[ClusterNode]) -> Result<()> {
        let mut seen = HashSet::new();
        for node in nodes {
            if !seen.insert(&node.node_id) {
                return Err(StoreError::AlreadyExists {
                    table: Table::ClusterNode,
                    key: node.node_id.to_string(),
                });
            }
            self.ensure_absent(cf::CLUSTER_NODE, Table::ClusterNode, node.node_id.as_str())?;
        }
        Ok(())
    }

    /// Write every row of `bundle` in one batch. Callers hold the write lock.
    fn write_bundle(&self, bundle: &ClusterBundle) -> Result<Vec<Mutation>> {
        let cluster = &bundle.cluster;
        self.ensure_absent(cf::CLUSTER, Table::Cluster, cluster.cluster_id.as_str())?;
        self.ensure_nodes_absent(&bundle.nodes)?;
        self.ensure_absent(cf::JOB, Table::Job, bundle.job.job_id.as_str())?;

        let cf_clusters = cf(&self.db, cf::CLUSTER)?;
        let cf_by_owner = cf(&self.db, cf::CLUSTERS_BY_OWNER)?;
        let cf_by_cluster = cf(&self.db, cf::NODES_BY_CLUSTER)?;
        let cf_roles = cf(&self.db, cf::CLUSTER_ROLE)?;
        let cf_commons = cf(&self.db, cf::CLUSTER_COMMON)?;
        let cf_jobs = cf(&self.db, cf::JOB)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_clusters,
            keys::id_key(cluster.cluster_id.as_str()),
            serialize(cluster)?,
        );
        batch.put_cf(
            &cf_by_owner,
            keys::composite_key(cluster.owner.as_str(), cluster.cluster_id.as_str()),
            [],
        );
        self.put_nodes(&mut batch, &bundle.nodes)?;
        for node in &bundle.nodes {
            batch.put_cf(
                &cf_by_cluster,
                keys::composite_key(node.cluster_id.as_str(), node.node_id.as_str()),
                [],
            );
        }
        for role in &bundle.roles {
            batch.put_cf(
                &cf_roles,
                keys::composite_key(role.cluster_id.as_str(), &role.role),
                serialize(role)?,
            );
        }
        for common in &bundle.commons {
            batch.put_cf(
                &cf_commons,
                keys::composite_key(common.cluster_id.as_str(), &common.role),
                serialize(common)?,
            );
        }
        batch.put_cf(
            &cf_jobs,
            keys::id_key(bundle.job.job_id.as_str()),
            serialize(&bundle.job)?,
        );
        self.write(batch)?;

        Ok([
            InsertMutation::from_rows(std::slice::from_ref(cluster)),
            InsertMutation::from_rows(&bundle.nodes),
            InsertMutation::from_rows(&bundle.roles),
            InsertMutation::from_rows(&bundle.commons),
            InsertMutation::from_rows(std::slice::from_ref(&bundle.job)),
        ]
        .into_iter()
        .flatten()
        .map(Mutation::Insert)
        .collect())
    }

    fn load_nodes(&self, node_ids: &[NodeId]) -> Result<Vec<Option<ClusterNode>>> {
        node_ids
            .iter()
            .map(|id| get(&self.db, cf::CLUSTER_NODE, &keys::id_key(id.as_str())))
            .collect()
    }

    fn put_nodes(&self, batch: &mut WriteBatch, nodes: &[ClusterNode]) -> Result<()> {
        let cf_nodes = cf(&self.db, cf::CLUSTER_NODE)?;
        for node in nodes {
            batch.put_cf(
                &cf_nodes,
                keys::id_key(node.node_id.as_str()),
                serialize(node)?,
            );
        }
        Ok(())
    }
}

/// Read-only owner lookups over a shared database handle.
#[derive(Clone)]
pub struct OwnerLookup {
    db: Arc<Db>,
}

impl OwnerResolver for OwnerLookup {
    fn resolve_owner(&self, table: Table, key: &str) -> Result<Option<UserId>> {
        resolve_owner(&self.db, table, key)
    }
}

impl OwnerResolver for RocksStore {
    fn resolve_owner(&self, table: Table, key: &str) -> Result<Option<UserId>> {
        resolve_owner(&self.db, table, key)
    }
}

fn resolve_owner(db: &Db, table: Table, key: &str) -> Result<Option<UserId>> {
    let id = keys::id_key(key);
    match table {
        Table::Cluster => Ok(get::<Cluster>(db, cf::CLUSTER, &id)?.map(|c| c.owner)),
        Table::ClusterNode => Ok(get::<ClusterNode>(db, cf::CLUSTER_NODE, &id)?.map(|n| n.owner)),
        Table::Job => Ok(get::<Job>(db, cf::JOB, &id)?.map(|j| j.owner)),
        other => Err(StoreError::NoOwnerColumn(other)),
    }
}

/// Get a column family handle.
fn cf<'a>(db: &'a Db, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
}

/// Serialize a value using CBOR.
fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn get<T: DeserializeOwned>(db: &Db, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
    let handle = cf(db, cf_name)?;
    db.get_pinned_cf(&handle, key)
        .map_err(|e| StoreError::Database(e.to_string()))?
        .map(|data| deserialize(&data))
        .transpose()
}

/// Collect every `(key, value)` pair whose key starts with `prefix`.
fn scan_prefix(db: &Db, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
    let handle = cf(db, cf_name)?;
    let iter = db.iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));

    let mut entries = Vec::new();
    for item in iter {
        let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

        // Stop if we're past the prefix
        if !key.starts_with(prefix) {
            break;
        }
        entries.push((key, value));
    }
    Ok(entries)
}

/// Deserialize every value stored under `prefix`.
fn scan_values<T: DeserializeOwned>(db: &Db, cf_name: &str, prefix: &[u8]) -> Result<Vec<T>> {
    scan_prefix(db, cf_name, prefix)?
        .iter()
        .map(|(_, value)| deserialize(value))
        .collect()
}

fn transition_predicates(
    key_column: &'static str,
    key_values: Vec<ColumnValue>,
    condition: &TransitionCondition,
) -> Vec<Predicate> {
    let mut predicates = vec![
        Predicate::eq_any(key_column, key_values),
        Predicate::eq(column::OWNER, condition.owner.as_str()),
        Predicate::eq(column::TRANSITION_STATUS, TransitionStatus::Idle),
    ];
    if !condition.allowed.is_empty() {
        predicates.push(Predicate::eq_any(
            column::STATUS,
            condition.allowed.iter().copied(),
        ));
    }
    predicates
}

impl Store for RocksStore {
    // =========================================================================
    // Cluster Operations
    // =========================================================================

    fn insert_cluster(&self, cluster: &Cluster) -> Result<()> {
        let mutations = {
            let _guard = self.write_lock.lock();
            self.ensure_absent(cf::CLUSTER, Table::Cluster, cluster.cluster_id.as_str())?;

            let cf_clusters = cf(&self.db, cf::CLUSTER)?;
            let cf_by_owner = cf(&self.db, cf::CLUSTERS_BY_OWNER)?;

            let mut batch = WriteBatch::default();
            batch.put_cf(
                &cf_clusters,
                keys::id_key(cluster.cluster_id.as_str()),
                serialize(cluster)?,
            );
            batch.put_cf(
                &cf_by_owner,
                keys::composite_key(cluster.owner.as_str(), cluster.cluster_id.as_str()),
                [],
            );
            self.write(batch)?;

            InsertMutation::from_rows(std::slice::from_ref(cluster))
                .map(Mutation::Insert)
                .into_iter()
                .collect::<Vec<_>>()
        };

        tracing::debug!(cluster_id = %cluster.cluster_id, owner = %cluster.owner, "Cluster inserted");
        self.notify(&mutations);
        Ok(())
    }

    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Option<Cluster>> {
        get(&self.db, cf::CLUSTER, &keys::id_key(cluster_id.as_str()))
    }

    fn list_clusters_by_owner(&self, owner: &UserId) -> Result<Vec<Cluster>> {
        let prefix = keys::prefix(owner.as_str());

        let mut clusters = Vec::new();
        for (key, _) in scan_prefix(&self.db, cf::CLUSTERS_BY_OWNER, &prefix)? {
            let Some(cluster_id) = keys::second_part(&key) else {
                continue;
            };
            if let Some(cluster) = get(&self.db, cf::CLUSTER, &keys::id_key(cluster_id))? {
                clusters.push(cluster);
            }
        }

        Ok(clusters)
    }

    fn update_cluster(&self, cluster_id: &ClusterId, patch: &ClusterPatch) -> Result<Cluster> {
        let assignments = patch.assignments();
        let (cluster, mutation) = {
            let _guard = self.write_lock.lock();
            let mut cluster: Cluster = self.get_cluster(cluster_id)?.ok_or(StoreError::NotFound)?;
            if assignments.is_empty() {
                return Ok(cluster);
            }

            patch.apply(&mut cluster);
            if patch.status.is_some() {
                cluster.status_time = Utc::now();
            }

            let cf_clusters = cf(&self.db, cf::CLUSTER)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(
                &cf_clusters,
                keys::id_key(cluster_id.as_str()),
                serialize(&cluster)?,
            );
            self.write(batch)?;

            let mutation = Mutation::Update(UpdateMutation {
                table: Table::Cluster,
                assignments,
                predicates: vec![Predicate::eq(column::CLUSTER_ID, cluster_id.as_str())],
            });
            (cluster, mutation)
        };

        self.notify(std::slice::from_ref(&mutation));
        Ok(cluster)
    }

    fn begin_cluster_transition(
        &self,
        cluster_id: &ClusterId,
        transition: TransitionStatus,
        condition: &TransitionCondition,
    ) -> Result<u64> {
        let mutation = {
            let _guard = self.write_lock.lock();
            let Some(mut cluster) = self.get_cluster(cluster_id)? else {
                return Ok(0);
            };
            if !condition.admits(&cluster.owner, cluster.status, cluster.transition_status) {
                return Ok(0);
            }

            cluster.transition_status = transition;
            let cf_clusters = cf(&self.db, cf::CLUSTER)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(
                &cf_clusters,
                keys::id_key(cluster_id.as_str()),
                serialize(&cluster)?,
            );
            self.write(batch)?;

            Mutation::Update(UpdateMutation {
                table: Table::Cluster,
                assignments: vec![(column::TRANSITION_STATUS, transition.into())],
                predicates: transition_predicates(
                    column::CLUSTER_ID,
                    vec![cluster_id.as_str().into()],
                    condition,
                ),
            })
        };

        tracing::debug!(cluster_id = %cluster_id, transition = %transition, "Cluster transition acquired");
        self.notify(std::slice::from_ref(&mutation));
        Ok(1)
    }

    fn insert_cluster_bundle(&self, bundle: &ClusterBundle) -> Result<()> {
        let mutations = {
            let _guard = self.write_lock.lock();
            self.write_bundle(bundle)?
        };

        tracing::debug!(
            cluster_id = %bundle.cluster.cluster_id,
            nodes = bundle.nodes.len(),
            job_id = %bundle.job.job_id,
            "Cluster bundle inserted"
        );
        self.notify(&mutations);
        Ok(())
    }

    fn find_or_insert_frontgate(&self, bundle: &ClusterBundle) -> Result<Option<Cluster>> {
        let cluster = &bundle.cluster;
        let mutations = {
            let _guard = self.write_lock.lock();
            let existing = self
                .list_clusters_by_owner(&cluster.owner)?
                .into_iter()
                .find(|c| c.serves_vpc(&cluster.vpc_id));
            if existing.is_some() {
                return Ok(existing);
            }
            self.write_bundle(bundle)?
        };

        tracing::debug!(
            frontgate_id = %cluster.cluster_id,
            vpc_id = %cluster.vpc_id,
            "Frontgate inserted"
        );
        self.notify(&mutations);
        Ok(None)
    }

    fn delete_cluster(&self, cluster_id: &ClusterId) -> Result<()> {
        let mutations = {
            let _guard = self.write_lock.lock();
            let cluster = self.get_cluster(cluster_id)?.ok_or(StoreError::NotFound)?;
            let nodes = self.list_cluster_nodes(cluster_id)?;
            let prefix = keys::prefix(cluster_id.as_str());
            let role_keys = scan_prefix(&self.db, cf::CLUSTER_ROLE, &prefix)?;
            let common_keys = scan_prefix(&self.db, cf::CLUSTER_COMMON, &prefix)?;

            let cf_clusters = cf(&self.db, cf::CLUSTER)?;
            let cf_by_owner = cf(&self.db, cf::CLUSTERS_BY_OWNER)?;
            let cf_nodes = cf(&self.db, cf::CLUSTER_NODE)?;
            let cf_by_cluster = cf(&self.db, cf::NODES_BY_CLUSTER)?;
            let cf_roles = cf(&self.db, cf::CLUSTER_ROLE)?;
            let cf_commons = cf(&self.db, cf::CLUSTER_COMMON)?;

            let mut batch = WriteBatch::default();
            batch.delete_cf(&cf_clusters, keys::id_key(cluster_id.as_str()));
            batch.delete_cf(
                &cf_by_owner,
                keys::composite_key(cluster.owner.as_str(), cluster_id.as_str()),
            );
            for node in &nodes {
                batch.delete_cf(&cf_nodes, keys::id_key(node.node_id.as_str()));
                batch.delete_cf(
                    &cf_by_cluster,
                    keys::composite_key(cluster_id.as_str(), node.node_id.as_str()),
                );
            }
            for (key, _) in &role_keys {
                batch.delete_cf(&cf_roles, key);
            }
            for (key, _) in &common_keys {
                batch.delete_cf(&cf_commons, key);
            }
            self.write(batch)?;

            let mut mutations = vec![Mutation::Delete(DeleteMutation {
                table: Table::Cluster,
                predicates: vec![Predicate::eq(column::CLUSTER_ID, cluster_id.as_str())],
                prior_owners: vec![(cluster_id.to_string(), cluster.owner.clone())],
            })];
            if !nodes.is_empty() {
                mutations.push(Mutation::Delete(DeleteMutation {
                    table: Table::ClusterNode,
                    predicates: vec![Predicate::eq_any(
                        column::NODE_ID,
                        nodes.iter().map(|n| n.node_id.as_str()),
                    )],
                    prior_owners: nodes
                        .iter()
                        .map(|n| (n.node_id.to_string(), n.owner.clone()))
                        .collect(),
                }));
            }
            for (table, removed) in [
                (Table::ClusterRole, role_keys.len()),
                (Table::ClusterCommon, common_keys.len()),
            ] {
                if removed > 0 {
                    mutations.push(Mutation::Delete(DeleteMutation {
                        table,
                        predicates: vec![Predicate::eq(column::CLUSTER_ID, cluster_id.as_str())],
                        prior_owners: Vec::new(),
                    }));
                }
            }
            mutations
        };

        tracing::info!(cluster_id = %cluster_id, "Cluster rows removed");
        self.notify(&mutations);
        Ok(())
    }

    // =========================================================================
    // Node Operations
    // =========================================================================

    fn insert_cluster_nodes(&self, nodes: &[ClusterNode]) -> Result<()> {
        let Some(insert) = InsertMutation::from_rows(nodes) else {
            return Ok(());
        };

        {
            let _guard = self.write_lock.lock();
            self.ensure_nodes_absent(nodes)?;

            let cf_by_cluster = cf(&self.db, cf::NODES_BY_CLUSTER)?;
            let mut batch = WriteBatch::default();
            self.put_nodes(&mut batch, nodes)?;
            for node in nodes {
                batch.put_cf(
                    &cf_by_cluster,
                    keys::composite_key(node.cluster_id.as_str(), node.node_id.as_str()),
                    [],
                );
            }
            self.write(batch)?;
        }

        self.notify(&[Mutation::Insert(insert)]);
        Ok(())
    }

    fn get_cluster_node(&self, node_id: &NodeId) -> Result<Option<ClusterNode>> {
        get(&self.db, cf::CLUSTER_NODE, &keys::id_key(node_id.as_str()))
    }

    fn list_cluster_nodes(&self, cluster_id: &ClusterId) -> Result<Vec<ClusterNode>> {
        let prefix = keys::prefix(cluster_id.as_str());

        let mut nodes = Vec::new();
        for (key, _) in scan_prefix(&self.db, cf::NODES_BY_CLUSTER, &prefix)? {
            let Some(node_id) = keys::second_part(&key) else {
                continue;
            };
            if let Some(node) = get(&self.db, cf::CLUSTER_NODE, &keys::id_key(node_id))? {
                nodes.push(node);
            }
        }

        Ok(nodes)
    }

    fn update_cluster_nodes(&self, node_ids: &[NodeId], patch: &NodePatch) -> Result<u64> {
        let assignments = patch.assignments();
        if assignments.is_empty() || node_ids.is_empty() {
            return Ok(0);
        }

        let (changed, mutation) = {
            let _guard = self.write_lock.lock();
            let mut nodes: Vec<ClusterNode> =
                self.load_nodes(node_ids)?.into_iter().flatten().collect();
            if nodes.is_empty() {
                return Ok(0);
            }

            let now = Utc::now();
            for node in &mut nodes {
                patch.apply(node);
                if patch.status.is_some() {
                    node.status_time = now;
                }
            }

            let mut batch = WriteBatch::default();
            self.put_nodes(&mut batch, &nodes)?;
            self.write(batch)?;

            let mutation = Mutation::Update(UpdateMutation {
                table: Table::ClusterNode,
                assignments,
                predicates: vec![Predicate::eq_any(
                    column::NODE_ID,
                    nodes.iter().map(|n| n.node_id.as_str()),
                )],
            });
            (nodes.len() as u64, mutation)
        };

        self.notify(std::slice::from_ref(&mutation));
        Ok(changed)
    }

    fn begin_nodes_transition(
        &self,
        node_ids: &[NodeId],
        transition: TransitionStatus,
        condition: &TransitionCondition,
    ) -> Result<u64> {
        let mut seen = HashSet::new();
        let node_ids: Vec<NodeId> = node_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        if node_ids.is_empty() {
            return Ok(0);
        }

        let mutation = {
            let _guard = self.write_lock.lock();
            let mut nodes = Vec::with_capacity(node_ids.len());
            for node in self.load_nodes(&node_ids)? {
                match node {
                    Some(node)
                        if condition.admits(&node.owner, node.status, node.transition_status) =>
                    {
                        nodes.push(node);
                    }
                    _ => return Ok(0),
                }
            }

            for node in &mut nodes {
                node.transition_status = transition;
            }
            let mut batch = WriteBatch::default();
            self.put_nodes(&mut batch, &nodes)?;
            self.write(batch)?;

            Mutation::Update(UpdateMutation {
                table: Table::ClusterNode,
                assignments: vec![(column::TRANSITION_STATUS, transition.into())],
                predicates: transition_predicates(
                    column::NODE_ID,
                    node_ids.iter().map(|id| id.as_str().into()).collect(),
                    condition,
                ),
            })
        };

        tracing::debug!(nodes = node_ids.len(), transition = %transition, "Node transition acquired");
        self.notify(std::slice::from_ref(&mutation));
        Ok(node_ids.len() as u64)
    }

    fn delete_cluster_nodes(&self, node_ids: &[NodeId]) -> Result<()> {
        let mutation = {
            let _guard = self.write_lock.lock();
            let nodes: Vec<ClusterNode> =
                self.load_nodes(node_ids)?.into_iter().flatten().collect();
            if nodes.is_empty() {
                return Ok(());
            }

            let cf_nodes = cf(&self.db, cf::CLUSTER_NODE)?;
            let cf_by_cluster = cf(&self.db, cf::NODES_BY_CLUSTER)?;
            let mut batch = WriteBatch::default();
            for node in &nodes {
                batch.delete_cf(&cf_nodes, keys::id_key(node.node_id.as_str()));
                batch.delete_cf(
                    &cf_by_cluster,
                    keys::composite_key(node.cluster_id.as_str(), node.node_id.as_str()),
                );
            }
            self.write(batch)?;

            Mutation::Delete(DeleteMutation {
                table: Table::ClusterNode,
                predicates: vec![Predicate::eq_any(
                    column::NODE_ID,
                    nodes.iter().map(|n| n.node_id.as_str()),
                )],
                prior_owners: nodes
                    .iter()
                    .map(|n| (n.node_id.to_string(), n.owner.clone()))
                    .collect(),
            })
        };

        self.notify(std::slice::from_ref(&mutation));
        Ok(())
    }

    // =========================================================================
    // Role Configuration
    // =========================================================================

    fn put_cluster_roles(&self, roles: &[ClusterRole]) -> Result<()> {
        let Some(insert) = InsertMutation::from_rows(roles) else {
            return Ok(());
        };

        {
            let _guard = self.write_lock.lock();
            let cf_roles = cf(&self.db, cf::CLUSTER_ROLE)?;
            let mut batch = WriteBatch::default();
            for role in roles {
                batch.put_cf(
                    &cf_roles,
                    keys::composite_key(role.cluster_id.as_str(), &role.role),
                    serialize(role)?,
                );
            }
            self.write(batch)?;
        }

        self.notify(&[Mutation::Insert(insert)]);
        Ok(())
    }

    fn list_cluster_roles(&self, cluster_id: &ClusterId) -> Result<Vec<ClusterRole>> {
        scan_values(&self.db, cf::CLUSTER_ROLE, &keys::prefix(cluster_id.as_str()))
    }

    fn put_cluster_commons(&self, commons: &[ClusterCommon]) -> Result<()> {
        let Some(insert) = InsertMutation::from_rows(commons) else {
            return Ok(());
        };

        {
            let _guard = self.write_lock.lock();
            let cf_commons = cf(&self.db, cf::CLUSTER_COMMON)?;
            let mut batch = WriteBatch::default();
            for common in commons {
                batch.put_cf(
                    &cf_commons,
                    keys::composite_key(common.cluster_id.as_str(), &common.role),
                    serialize(common)?,
                );
            }
            self.write(batch)?;
        }

        self.notify(&[Mutation::Insert(insert)]);
        Ok(())
    }

    fn list_cluster_commons(&self, cluster_id: &ClusterId) -> Result<Vec<ClusterCommon>> {
        scan_values(&self.db, cf::CLUSTER_COMMON, &keys::prefix(cluster_id.as_str()))
    }

    // =========================================================================
    // Category Associations
    // =========================================================================

    fn insert_category_resources(&self, rows: &[CategoryResource]) -> Result<()> {
        let Some(insert) = InsertMutation::from_rows(rows) else {
            return Ok(());
        };

        {
            let _guard = self.write_lock.lock();
            let cf_categories = cf(&self.db, cf::CATEGORY_RESOURCE)?;
            let mut batch = WriteBatch::default();
            for row in rows {
                batch.put_cf(
                    &cf_categories,
                    keys::composite_key(&row.category_id, &row.resource_id),
                    serialize(row)?,
                );
            }
            self.write(batch)?;
        }

        self.notify(&[Mutation::Insert(insert)]);
        Ok(())
    }

    fn list_category_resources(&self, category_id: &str) -> Result<Vec<CategoryResource>> {
        scan_values(&self.db, cf::CATEGORY_RESOURCE, &keys::prefix(category_id))
    }

    fn delete_category_resources(
        &self,
        category_id: &str,
        resource_ids: &[String],
    ) -> Result<()> {
        if resource_ids.is_empty() {
            return Ok(());
        }

        {
            let _guard = self.write_lock.lock();
            let cf_categories = cf(&self.db, cf::CATEGORY_RESOURCE)?;
            let mut batch = WriteBatch::default();
            for resource_id in resource_ids {
                batch.delete_cf(
                    &cf_categories,
                    keys::composite_key(category_id, resource_id),
                );
            }
            self.write(batch)?;
        }

        self.notify(&[Mutation::Delete(DeleteMutation {
            table: Table::CategoryResource,
            predicates: vec![
                Predicate::eq(column::CATEGORY_ID, category_id),
                Predicate::eq_any(column::RESOURCE_ID, resource_ids.iter().map(String::as_str)),
            ],
            prior_owners: Vec::new(),
        })]);
        Ok(())
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    fn insert_job(&self, job: &Job) -> Result<()> {
        let mutations = {
            let _guard = self.write_lock.lock();
            self.ensure_absent(cf::JOB, Table::Job, job.job_id.as_str())?;

            let cf_jobs = cf(&self.db, cf::JOB)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_jobs, keys::id_key(job.job_id.as_str()), serialize(job)?);
            self.write(batch)?;

            InsertMutation::from_rows(std::slice::from_ref(job))
                .map(Mutation::Insert)
                .into_iter()
                .collect::<Vec<_>>()
        };

        tracing::debug!(job_id = %job.job_id, action = %job.action, "Job inserted");
        self.notify(&mutations);
        Ok(())
    }

    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        get(&self.db, cf::JOB, &keys::id_key(job_id.as_str()))
    }

    fn advance_job(&self, job_id: &JobId, status: JobStatus) -> Result<u64> {
        let mutation = {
            let _guard = self.write_lock.lock();
            let Some(mut job) = self.get_job(job_id)? else {
                return Ok(0);
            };
            if job.status.is_finished() {
                return Ok(0);
            }
            job.status = status;
            job.status_time = Utc::now();

            let cf_jobs = cf(&self.db, cf::JOB)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_jobs, keys::id_key(job_id.as_str()), serialize(&job)?);
            self.write(batch)?;

            Mutation::Update(UpdateMutation {
                table: Table::Job,
                assignments: vec![
                    (column::STATUS, status.into()),
                    (column::STATUS_TIME, job.status_time.into()),
                ],
                predicates: vec![
                    Predicate::eq(column::JOB_ID, job_id.as_str()),
                    Predicate::eq_any(column::STATUS, [JobStatus::Pending, JobStatus::Working]),
                ],
            })
        };

        tracing::debug!(job_id = %job_id, status = status.as_str(), "Job advanced");
        self.notify(std::slice::from_ref(&mutation));
        Ok(1)
    }

    fn update_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<Job> {
        let (job, mutation) = {
            let _guard = self.write_lock.lock();
            let mut job = self.get_job(job_id)?.ok_or(StoreError::NotFound)?;
            job.status = status;
            job.status_time = Utc::now();

            let cf_jobs = cf(&self.db, cf::JOB)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(&cf_jobs, keys::id_key(job_id.as_str()), serialize(&job)?);
            self.write(batch)?;

            let mutation = Mutation::Update(UpdateMutation {
                table: Table::Job,
                assignments: vec![
                    (column::STATUS, status.into()),
                    (column::STATUS_TIME, job.status_time.into()),
                ],
                predicates: vec![Predicate::eq(column::JOB_ID, job_id.as_str())],
            });
            (job, mutation)
        };

        self.notify(std::slice::from_ref(&mutation));
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterStatus, ClusterType, JobAction};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        mutations: Mutex<Vec<Mutation>>,
    }

    impl MutationObserver for Recorder {
        fn on_commit(&self, mutation: &Mutation) {
            self.mutations.lock().push(mutation.clone());
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<Mutation> {
            std::mem::take(&mut *self.mutations.lock())
        }
    }

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn recorded_store() -> (RocksStore, Arc<Recorder>, TempDir) {
        let (store, dir) = create_test_store();
        let recorder = Arc::new(Recorder::default());
        store.set_observer(recorder.clone());
        (store, recorder, dir)
    }

    fn create_test_cluster(owner: &UserId, name: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            cluster_id: ClusterId::generate_deterministic(name, 42),
            name: name.to_string(),
            owner: owner.clone(),
            app_id: "app-1".to_string(),
            version_id: "appv-1".to_string(),
            previous_version_id: None,
            runtime_id: "rt-1".to_string(),
            cluster_type: ClusterType::Normal,
            status: ClusterStatus::Active,
            transition_status: TransitionStatus::Idle,
            vpc_id: "vpc-1".to_string(),
            subnet_id: "vxnet-1".to_string(),
            zone: "zone-1".to_string(),
            frontgate_id: None,
            created_at: now,
            status_time: now,
        }
    }

    fn create_test_node(cluster: &Cluster, label: &str) -> ClusterNode {
        let now = Utc::now();
        ClusterNode {
            node_id: NodeId::generate_deterministic(label, 7),
            cluster_id: cluster.cluster_id.clone(),
            owner: cluster.owner.clone(),
            role: "worker".to_string(),
            status: cluster.status,
            transition_status: TransitionStatus::Idle,
            private_ip: String::new(),
            instance_id: String::new(),
            volume_id: String::new(),
            created_at: now,
            status_time: now,
        }
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[test]
    fn cluster_crud() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");

        store.insert_cluster(&cluster).unwrap();
        assert!(matches!(
            store.insert_cluster(&cluster),
            Err(StoreError::AlreadyExists { .. })
        ));

        let retrieved = store.get_cluster(&cluster.cluster_id).unwrap().unwrap();
        assert_eq!(retrieved, cluster);

        let updated = store
            .update_cluster(
                &cluster.cluster_id,
                &ClusterPatch::settle(ClusterStatus::Stopped),
            )
            .unwrap();
        assert_eq!(updated.status, ClusterStatus::Stopped);
        assert_eq!(
            store.get_cluster(&cluster.cluster_id).unwrap().unwrap().status,
            ClusterStatus::Stopped
        );

        store.delete_cluster(&cluster.cluster_id).unwrap();
        assert!(store.get_cluster(&cluster.cluster_id).unwrap().is_none());
        assert!(matches!(
            store.delete_cluster(&cluster.cluster_id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_clusters_by_owner() {
        let (store, _dir) = create_test_store();
        let alice = user("usr-alice");
        let bob = user("usr-bob");

        store.insert_cluster(&create_test_cluster(&alice, "a1")).unwrap();
        store.insert_cluster(&create_test_cluster(&alice, "a2")).unwrap();
        store.insert_cluster(&create_test_cluster(&bob, "b1")).unwrap();

        assert_eq!(store.list_clusters_by_owner(&alice).unwrap().len(), 2);
        assert_eq!(store.list_clusters_by_owner(&bob).unwrap().len(), 1);
    }

    #[test]
    fn cluster_transition_is_conditional() {
        let (store, recorder, _dir) = recorded_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");
        store.insert_cluster(&cluster).unwrap();
        recorder.take();

        let wrong_owner = TransitionCondition::new(&user("usr-2"), &[ClusterStatus::Active]);
        let wrong_status = TransitionCondition::new(&owner, &[ClusterStatus::Stopped]);
        let ok = TransitionCondition::new(&owner, &[ClusterStatus::Active]);

        let id = &cluster.cluster_id;
        assert_eq!(
            store
                .begin_cluster_transition(id, TransitionStatus::Stopping, &wrong_owner)
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .begin_cluster_transition(id, TransitionStatus::Stopping, &wrong_status)
                .unwrap(),
            0
        );
        assert!(recorder.take().is_empty());

        assert_eq!(
            store
                .begin_cluster_transition(id, TransitionStatus::Stopping, &ok)
                .unwrap(),
            1
        );
        // Busy now: a second acquire fails even with a matching status.
        assert_eq!(
            store
                .begin_cluster_transition(id, TransitionStatus::Deleting, &ok)
                .unwrap(),
            0
        );
        assert_eq!(
            store.get_cluster(id).unwrap().unwrap().transition_status,
            TransitionStatus::Stopping
        );

        let recorded = recorder.take();
        assert_eq!(recorded.len(), 1);
        let Mutation::Update(update) = &recorded[0] else {
            panic!("expected an update");
        };
        assert_eq!(update.table, Table::Cluster);
        assert_eq!(
            update.assignments,
            vec![(column::TRANSITION_STATUS, ColumnValue::from("stopping"))]
        );
    }

    #[test]
    fn missing_cluster_transition_changes_nothing() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let condition = TransitionCondition::new(&owner, &[]);
        let changed = store
            .begin_cluster_transition(
                &ClusterId::generate(),
                TransitionStatus::Deleting,
                &condition,
            )
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[test]
    fn node_transition_is_all_or_nothing() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");
        store.insert_cluster(&cluster).unwrap();

        let n1 = create_test_node(&cluster, "n1");
        let mut n2 = create_test_node(&cluster, "n2");
        n2.transition_status = TransitionStatus::Starting;
        store
            .insert_cluster_nodes(&[n1.clone(), n2.clone()])
            .unwrap();

        let condition = TransitionCondition::new(&owner, &[ClusterStatus::Active]);
        let ids = vec![n1.node_id.clone(), n2.node_id.clone()];
        assert_eq!(
            store
                .begin_nodes_transition(&ids, TransitionStatus::DeletingNodes, &condition)
                .unwrap(),
            0
        );
        assert!(store
            .get_cluster_node(&n1.node_id)
            .unwrap()
            .unwrap()
            .transition_status
            .is_idle());

        let only_idle = vec![n1.node_id.clone()];
        assert_eq!(
            store
                .begin_nodes_transition(&only_idle, TransitionStatus::DeletingNodes, &condition)
                .unwrap(),
            1
        );
    }

    #[test]
    fn nodes_are_listed_per_cluster_in_id_order() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let c1 = create_test_cluster(&owner, "c1");
        let c2 = create_test_cluster(&owner, "c2");
        store.insert_cluster(&c1).unwrap();
        store.insert_cluster(&c2).unwrap();

        let nodes: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|label| create_test_node(&c1, label))
            .collect();
        store.insert_cluster_nodes(&nodes).unwrap();
        store
            .insert_cluster_nodes(&[create_test_node(&c2, "d")])
            .unwrap();

        let listed = store.list_cluster_nodes(&c1.cluster_id).unwrap();
        assert_eq!(listed.len(), 3);
        let ids: Vec<_> = listed.iter().map(|n| n.node_id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        assert!(matches!(
            store.insert_cluster_nodes(&[nodes[0].clone()]),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn update_cluster_nodes_counts_existing_rows() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");
        let node = create_test_node(&cluster, "n1");
        store.insert_cluster_nodes(&[node.clone()]).unwrap();

        let patch = NodePatch {
            private_ip: Some("10.0.0.5".to_string()),
            ..NodePatch::default()
        };
        let changed = store
            .update_cluster_nodes(&[node.node_id.clone(), NodeId::generate()], &patch)
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            store
                .get_cluster_node(&node.node_id)
                .unwrap()
                .unwrap()
                .private_ip,
            "10.0.0.5"
        );
    }

    #[test]
    fn delete_cluster_cascades_and_reports_prior_owners() {
        let (store, recorder, _dir) = recorded_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");
        store.insert_cluster(&cluster).unwrap();
        let node = create_test_node(&cluster, "n1");
        store.insert_cluster_nodes(&[node.clone()]).unwrap();
        store
            .put_cluster_roles(&[ClusterRole {
                cluster_id: cluster.cluster_id.clone(),
                role: "worker".to_string(),
                cpu: 2,
                memory: 2048,
                storage_size: 10,
                mount_point: "/data".to_string(),
                count: 1,
            }])
            .unwrap();
        recorder.take();

        store.delete_cluster(&cluster.cluster_id).unwrap();
        assert!(store.get_cluster_node(&node.node_id).unwrap().is_none());
        assert!(store
            .list_cluster_roles(&cluster.cluster_id)
            .unwrap()
            .is_empty());
        assert!(store.list_clusters_by_owner(&owner).unwrap().is_empty());

        let recorded = recorder.take();
        let tables: Vec<_> = recorded.iter().map(Mutation::table).collect();
        assert_eq!(
            tables,
            vec![Table::Cluster, Table::ClusterNode, Table::ClusterRole]
        );
        let Mutation::Delete(delete) = &recorded[1] else {
            panic!("expected a delete");
        };
        assert_eq!(
            delete.prior_owners,
            vec![(node.node_id.to_string(), owner.clone())]
        );
    }

    #[test]
    fn role_and_common_config() {
        let (store, _dir) = create_test_store();
        let cluster_id = ClusterId::generate();
        let other = ClusterId::generate();

        let role = |cluster_id: &ClusterId, name: &str| ClusterRole {
            cluster_id: cluster_id.clone(),
            role: name.to_string(),
            cpu: 1,
            memory: 1024,
            storage_size: 0,
            mount_point: String::new(),
            count: 1,
        };
        store
            .put_cluster_roles(&[role(&cluster_id, "master"), role(&cluster_id, "worker")])
            .unwrap();
        store.put_cluster_roles(&[role(&other, "worker")]).unwrap();
        assert_eq!(store.list_cluster_roles(&cluster_id).unwrap().len(), 2);

        store
            .put_cluster_commons(&[ClusterCommon {
                cluster_id: cluster_id.clone(),
                role: "worker".to_string(),
                image_id: "img-1".to_string(),
                advanced_actions: "scale_horizontal".to_string(),
            }])
            .unwrap();
        let commons = store.list_cluster_commons(&cluster_id).unwrap();
        assert_eq!(commons.len(), 1);
        assert!(commons[0].allows("scale_horizontal"));
    }

    #[test]
    fn category_resources() {
        let (store, recorder, _dir) = recorded_store();
        store
            .insert_category_resources(&[
                CategoryResource::new("ctg-1", "app-1", "enabled"),
                CategoryResource::new("ctg-1", "app-2", "enabled"),
            ])
            .unwrap();
        assert_eq!(store.list_category_resources("ctg-1").unwrap().len(), 2);

        store
            .delete_category_resources("ctg-1", &["app-1".to_string()])
            .unwrap();
        let remaining = store.list_category_resources("ctg-1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].resource_id, "app-2");

        let tables: Vec<_> = recorder.take().iter().map(Mutation::table).collect();
        assert_eq!(
            tables,
            vec![Table::CategoryResource, Table::CategoryResource]
        );
    }

    #[test]
    fn job_status_updates() {
        let (store, _dir) = create_test_store();
        let cluster = create_test_cluster(&user("usr-1"), "c1");
        let job = Job::new(&cluster, JobAction::StopClusters);
        store.insert_job(&job).unwrap();

        let updated = store
            .update_job_status(&job.job_id, JobStatus::Successful)
            .unwrap();
        assert_eq!(updated.status, JobStatus::Successful);
        assert_eq!(updated.prior_status, ClusterStatus::Active);
        assert!(matches!(
            store.update_job_status(&JobId::generate(), JobStatus::Failed),
            Err(StoreError::NotFound)
        ));
    }

    fn create_test_bundle(owner: &UserId, name: &str, cluster_type: ClusterType) -> ClusterBundle {
        let mut cluster = create_test_cluster(owner, name);
        cluster.cluster_id = ClusterId::generate();
        cluster.cluster_type = cluster_type;
        cluster.status = ClusterStatus::Pending;
        cluster.transition_status = TransitionStatus::Creating;
        let mut node = create_test_node(&cluster, name);
        node.node_id = NodeId::generate();
        let role = ClusterRole {
            cluster_id: cluster.cluster_id.clone(),
            role: "worker".to_string(),
            cpu: 1,
            memory: 1024,
            storage_size: 0,
            mount_point: String::new(),
            count: 1,
        };
        let common = ClusterCommon {
            cluster_id: cluster.cluster_id.clone(),
            role: "worker".to_string(),
            image_id: "img-1".to_string(),
            advanced_actions: String::new(),
        };
        let job = Job::new(&cluster, JobAction::CreateCluster);
        ClusterBundle {
            cluster,
            nodes: vec![node],
            roles: vec![role],
            commons: vec![common],
            job,
        }
    }

    #[test]
    fn cluster_bundle_is_written_together() {
        let (store, recorder, _dir) = recorded_store();
        let bundle = create_test_bundle(&user("usr-1"), "c1", ClusterType::Normal);
        store.insert_cluster_bundle(&bundle).unwrap();

        let cluster_id = &bundle.cluster.cluster_id;
        assert_eq!(store.get_cluster(cluster_id).unwrap().unwrap(), bundle.cluster);
        assert_eq!(store.list_cluster_nodes(cluster_id).unwrap(), bundle.nodes);
        assert_eq!(store.list_cluster_roles(cluster_id).unwrap(), bundle.roles);
        assert_eq!(store.list_cluster_commons(cluster_id).unwrap(), bundle.commons);
        assert_eq!(store.get_job(&bundle.job.job_id).unwrap().unwrap(), bundle.job);

        let tables: Vec<_> = recorder.take().iter().map(Mutation::table).collect();
        assert_eq!(
            tables,
            vec![
                Table::Cluster,
                Table::ClusterNode,
                Table::ClusterRole,
                Table::ClusterCommon,
                Table::Job,
            ]
        );
    }

    #[test]
    fn rejected_bundle_writes_nothing() {
        let (store, recorder, _dir) = recorded_store();
        let owner = user("usr-1");
        let first = create_test_bundle(&owner, "c1", ClusterType::Normal);
        store.insert_job(&first.job).unwrap();
        recorder.take();

        assert!(matches!(
            store.insert_cluster_bundle(&first),
            Err(StoreError::AlreadyExists { table: Table::Job, .. })
        ));
        assert!(store.get_cluster(&first.cluster.cluster_id).unwrap().is_none());
        assert!(store
            .list_cluster_nodes(&first.cluster.cluster_id)
            .unwrap()
            .is_empty());
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn frontgate_is_inserted_once_per_vpc() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let first = create_test_bundle(&owner, "fg-1", ClusterType::Frontgate);
        let second = create_test_bundle(&owner, "fg-2", ClusterType::Frontgate);

        assert_eq!(store.find_or_insert_frontgate(&first).unwrap(), None);
        let existing = store.find_or_insert_frontgate(&second).unwrap().unwrap();
        assert_eq!(existing.cluster_id, first.cluster.cluster_id);
        assert!(store.get_cluster(&second.cluster.cluster_id).unwrap().is_none());
        assert!(store.get_job(&second.job.job_id).unwrap().is_none());

        let mut other_vpc = create_test_bundle(&owner, "fg-3", ClusterType::Frontgate);
        other_vpc.cluster.vpc_id = "vpc-2".to_string();
        assert_eq!(store.find_or_insert_frontgate(&other_vpc).unwrap(), None);
    }

    #[test]
    fn concurrent_frontgate_requests_agree() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let bundles: Vec<_> = (0..8)
            .map(|i| create_test_bundle(&owner, &format!("fg-{i}"), ClusterType::Frontgate))
            .collect();

        let inserted = std::thread::scope(|scope| {
            let handles: Vec<_> = bundles
                .iter()
                .map(|bundle| scope.spawn(|| store.find_or_insert_frontgate(bundle).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(Option::is_none)
                .count()
        });

        assert_eq!(inserted, 1);
        let frontgates = store
            .list_clusters_by_owner(&owner)
            .unwrap()
            .into_iter()
            .filter(|c| c.cluster_type == ClusterType::Frontgate)
            .count();
        assert_eq!(frontgates, 1);
    }

    #[test]
    fn node_transition_counts_repeated_ids_once() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");
        store.insert_cluster(&cluster).unwrap();
        let node = create_test_node(&cluster, "n1");
        store.insert_cluster_nodes(std::slice::from_ref(&node)).unwrap();

        let condition = TransitionCondition::new(&owner, &[ClusterStatus::Active]);
        let ids = vec![node.node_id.clone(), node.node_id.clone()];
        assert_eq!(
            store
                .begin_nodes_transition(&ids, TransitionStatus::DeletingNodes, &condition)
                .unwrap(),
            1
        );
    }

    #[test]
    fn finished_job_cannot_advance() {
        let (store, recorder, _dir) = recorded_store();
        let cluster = create_test_cluster(&user("usr-1"), "c1");
        let job = Job::new(&cluster, JobAction::StopClusters);
        store.insert_job(&job).unwrap();
        recorder.take();

        assert_eq!(store.advance_job(&job.job_id, JobStatus::Successful).unwrap(), 1);
        assert_eq!(store.advance_job(&job.job_id, JobStatus::Failed).unwrap(), 0);
        assert_eq!(store.advance_job(&JobId::generate(), JobStatus::Failed).unwrap(), 0);
        assert_eq!(
            store.get_job(&job.job_id).unwrap().unwrap().status,
            JobStatus::Successful
        );
        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn owner_lookup() {
        let (store, _dir) = create_test_store();
        let owner = user("usr-1");
        let cluster = create_test_cluster(&owner, "c1");
        store.insert_cluster(&cluster).unwrap();

        let lookup = store.owner_lookup();
        assert_eq!(
            lookup
                .resolve_owner(Table::Cluster, cluster.cluster_id.as_str())
                .unwrap(),
            Some(owner)
        );
        assert_eq!(
            lookup.resolve_owner(Table::ClusterNode, "cln-missing").unwrap(),
            None
        );
        assert!(matches!(
            lookup.resolve_owner(Table::ClusterRole, "x"),
            Err(StoreError::NoOwnerColumn(Table::ClusterRole))
        ));
    }
}

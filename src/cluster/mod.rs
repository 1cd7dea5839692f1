//! Cluster — an in-memory cache of observed cluster `Node`s and `NodeClaim`s,
//! indexed by provider-id and name, plus a synced signal the counter gates
//! its work on.
//!
//! Grounded in the health ring's per-key `DashMap` sharding idiom: each
//! index is its own map so a write to one node never contends with a read of
//! another.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::crd::Taint;
use crate::resource::ResourceList;

/// A cluster `Node` object as observed by the watch cache — just the fields
/// the counter and lifecycle controller need, not a full API-server mirror.
///
/// `allocatable` already carries extended-resource keys (e.g.
/// `nvidia.com/gpu`) alongside the baseline cpu/memory/ephemeral-storage/pods
/// entries, since the sync loop copies every key the API server reports.
#[derive(Debug, Clone)]
pub struct ObservedNode {
    pub name: String,
    pub provider_id: Option<String>,
    pub pool_name: Option<String>,
    pub allocatable: ResourceList,
    pub ready: bool,
    pub taints: Vec<Taint>,
}

/// Cache of cluster state the counter and lifecycle controllers read from
/// rather than issuing a live list call on every reconcile.
#[derive(Debug, Default)]
pub struct Cluster {
    nodes_by_name: DashMap<String, ObservedNode>,
    nodes_by_provider_id: DashMap<String, String>,
    synced: AtomicBool,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(&self, node: ObservedNode) {
        if let Some(provider_id) = &node.provider_id {
            self.nodes_by_provider_id.insert(provider_id.clone(), node.name.clone());
        }
        self.nodes_by_name.insert(node.name.clone(), node);
    }

    pub fn remove_node(&self, name: &str) {
        if let Some((_, node)) = self.nodes_by_name.remove(name) {
            if let Some(provider_id) = &node.provider_id {
                self.nodes_by_provider_id.remove(provider_id);
            }
        }
    }

    pub fn node_by_name(&self, name: &str) -> Option<ObservedNode> {
        self.nodes_by_name.get(name).map(|n| n.clone())
    }

    pub fn node_by_provider_id(&self, provider_id: &str) -> Option<ObservedNode> {
        let name = self.nodes_by_provider_id.get(provider_id)?;
        self.node_by_name(&name)
    }

    /// `BaseResources` merged with every tracked node's allocatable capacity
    /// for `pool_name`, plus a `nodes` count — the counter's raw input.
    pub fn node_pool_resources_for(&self, pool_name: &str) -> ResourceList {
        let mut total = ResourceList::base();
        let mut node_count = 0i64;
        for entry in self.nodes_by_name.iter() {
            let node = entry.value();
            if node.pool_name.as_deref() != Some(pool_name) {
                continue;
            }
            total = &total + &node.allocatable;
            node_count += 1;
        }
        total.set(crate::resource::resource_list::NODES, node_count);
        total
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

//! NodePool resource counter: rolls the cluster-state cache into each pool's
//! `Resources`/`Nodes` status fields.

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::controllers::{action_for_error, Context};
use crate::crd::NodePool;
use crate::error::{Error, Result};
use crate::resource::resource_list::NODES;
use crate::resource::ResourceList;

/// `BaseResources` merged with the cluster cache's per-pool aggregate — pure
/// function so it's testable without a live cluster.
pub fn compute_resources(cluster_resources: ResourceList) -> (ResourceList, i64) {
    let nodes = cluster_resources.get(NODES);
    (cluster_resources, nodes)
}

pub async fn reconcile(pool: Arc<NodePool>, ctx: Arc<Context>) -> Result<Action> {
    if !ctx.cluster.is_synced() {
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let cluster_resources = ctx.cluster.node_pool_resources_for(pool.name());
    let (resources, nodes) = compute_resources(cluster_resources);

    let mut status = pool.status.clone().unwrap_or_default();
    let changed = status.resources.len() != resources.keys().count()
        || resources.keys().any(|k| status.resources.get(k).copied() != Some(resources.get(k)))
        || status.nodes != nodes;

    if changed {
        status.resources = resources.keys().map(|k| (k.to_string(), resources.get(k))).collect();
        status.nodes = nodes;

        let api: Api<NodePool> = Api::all(ctx.client.clone());
        let patch = json!({ "status": status });
        api.patch_status(pool.name(), &PatchParams::apply("karpenter-core"), &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 409 => {
                    Error::Conflict { kind: "NodePool".into(), name: pool.name().to_string() }
                }
                other => Error::Kube(other),
            })?;
    }

    Ok(Action::requeue(ctx.config.counter_resync))
}

pub fn error_policy(_pool: Arc<NodePool>, error: &Error, _ctx: Arc<Context>) -> Action {
    action_for_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::resource_list::CPU;

    #[test]
    fn compute_resources_extracts_node_count() {
        let mut list = ResourceList::base();
        list.set(CPU, 4000);
        list.set(NODES, 3);
        let (resources, nodes) = compute_resources(list);
        assert_eq!(nodes, 3);
        assert_eq!(resources.get(CPU), 4000);
    }
}

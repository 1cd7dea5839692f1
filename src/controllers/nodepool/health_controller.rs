//! NodePool registration-health controller: projects the in-memory health
//! ring into the `NodeRegistrationHealthy` status condition, resetting the
//! ring whenever the pool or its node class changes shape.

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::controllers::{action_for_error, Context};
use crate::crd::{NodePool, NodePoolStatus, CONDITION_NODE_REGISTRATION_HEALTHY};
use crate::error::{Error, Result};
use crate::health::Status;

/// Fetch the node class's `.metadata.generation` via a dynamic lookup — the
/// node class itself is an external (provider-owned) CRD this crate never
/// defines a concrete type for.
async fn class_generation(ctx: &Context, pool: &NodePool) -> Result<i64> {
    let class_ref = &pool.spec.template.node_class_ref;
    let gvk = GroupVersionKind::gvk(&class_ref.group, &class_ref.version, &class_ref.kind);
    let api_resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::all_with(ctx.client.clone(), &api_resource);
    let class = api.get(&class_ref.name).await?;
    Ok(class.meta().generation.unwrap_or(0))
}

fn ring_status_to_condition_value(status: Status) -> Option<&'static str> {
    match status {
        Status::Healthy => Some("True"),
        Status::Unhealthy => Some("False"),
        Status::Unknown => None,
    }
}

/// Inverse of [`ring_status_to_condition_value`], used to rehydrate the ring
/// from a persisted condition on restart. `None` for any value that isn't a
/// definite seed (no condition yet, or an unrecognized status string).
fn condition_value_to_status(value: &str) -> Option<Status> {
    match value {
        "True" => Some(Status::Healthy),
        "False" => Some(Status::Unhealthy),
        _ => None,
    }
}

pub async fn reconcile(pool: Arc<NodePool>, ctx: Arc<Context>) -> Result<Action> {
    let Some(uid) = pool.uid() else {
        return Ok(Action::requeue(Duration::from_secs(30)));
    };

    let current_generation = pool.meta().generation.unwrap_or(0);
    let condition = pool.status.as_ref().and_then(|s| s.condition(CONDITION_NODE_REGISTRATION_HEALTHY));

    // Rehydrate the in-memory ring from the pool's persisted condition if
    // this process has never observed a registration outcome for it (e.g.
    // right after a restart).
    if ctx.health.status(uid) == Status::Unknown {
        if let Some(seed) = condition.and_then(|c| condition_value_to_status(&c.status)) {
            ctx.health.set_status(uid, seed);
        }
    }

    let observed_class_generation = pool.status.as_ref().and_then(|s| s.node_class_observed_generation);
    let class_generation_now = match class_generation(&ctx, &pool).await {
        Ok(g) => Some(g),
        Err(_) => {
            warn!(pool = pool.name(), "node class not resolvable, deferring health reconcile");
            return Ok(Action::requeue(Duration::from_secs(30)));
        }
    };

    let needs_reset = condition.is_none()
        || observed_class_generation != class_generation_now
        || condition.and_then(|c| c.observed_generation) != Some(current_generation);

    let mut status = pool.status.clone().unwrap_or_default();
    status.node_class_observed_generation = class_generation_now;

    if needs_reset {
        ctx.health.forget(uid);
        status.clear_condition(CONDITION_NODE_REGISTRATION_HEALTHY);
    } else if let Some(value) = ring_status_to_condition_value(ctx.health.status(uid)) {
        status.set_condition(crate::crd::Condition {
            r#type: CONDITION_NODE_REGISTRATION_HEALTHY.into(),
            status: value.into(),
            last_transition_time: Some(Utc::now()),
            reason: Some(if value == "True" { "RegistrationSucceeding" } else { "RegistrationFailing" }.into()),
            message: None,
            observed_generation: Some(current_generation),
        });
    }

    if status_differs(pool.status.as_ref(), &status) {
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

    Ok(Action::requeue(Duration::from_secs(30)))
}

fn status_differs(old: Option<&NodePoolStatus>, new: &NodePoolStatus) -> bool {
    match old {
        None => true,
        Some(old) => {
            old.node_class_observed_generation != new.node_class_observed_generation
                || old.condition(CONDITION_NODE_REGISTRATION_HEALTHY).map(|c| &c.status)
                    != new.condition(CONDITION_NODE_REGISTRATION_HEALTHY).map(|c| &c.status)
        }
    }
}

pub fn error_policy(_pool: Arc<NodePool>, error: &Error, _ctx: Arc<Context>) -> Action {
    action_for_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, NodePoolStatus};

    #[test]
    fn ring_unknown_yields_no_condition_value() {
        assert_eq!(ring_status_to_condition_value(Status::Unknown), None);
    }

    #[test]
    fn ring_healthy_maps_to_true() {
        assert_eq!(ring_status_to_condition_value(Status::Healthy), Some("True"));
    }

    #[test]
    fn condition_value_round_trips_through_ring_status() {
        assert_eq!(condition_value_to_status("True"), Some(Status::Healthy));
        assert_eq!(condition_value_to_status("False"), Some(Status::Unhealthy));
        assert_eq!(condition_value_to_status("Unknown"), None);
    }

    #[test]
    fn status_differs_detects_generation_change() {
        let mut old = NodePoolStatus::default();
        old.node_class_observed_generation = Some(1);
        let mut new = NodePoolStatus::default();
        new.node_class_observed_generation = Some(2);
        assert!(status_differs(Some(&old), &new));
    }

    #[test]
    fn status_differs_false_when_identical() {
        let mut status = NodePoolStatus::default();
        status.set_condition(Condition {
            r#type: CONDITION_NODE_REGISTRATION_HEALTHY.into(),
            status: "True".into(),
            last_transition_time: None,
            reason: None,
            message: None,
            observed_generation: Some(1),
        });
        assert!(!status_differs(Some(&status), &status.clone()));
    }
}

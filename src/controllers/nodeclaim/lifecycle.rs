//! The NodeClaim lifecycle state machine: launch, registration, initialization,
//! drift/expiry observation, termination and orphan-instance garbage collection.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{self, Event as FinalizerEvent};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::conditions::transition;
use crate::cloudprovider::DynCloudProvider;
use crate::cluster::ObservedNode;
use crate::controllers::{action_for_error, Context};
use crate::crd::{
    NodeClaim, NodeClaimStatus, NodePool, CONDITION_DRIFTED, CONDITION_EXPIRED,
    CONDITION_INITIALIZED, CONDITION_LAUNCHED, CONDITION_REGISTERED,
};
use crate::error::{Error, Result};
use crate::resource::resource_list::is_base_resource;
use crate::resource::{InstanceType, InstanceTypes, Offering, Requirements};

const FINALIZER: &str = "karpenter.sh/nodeclaim-termination";

/// Has the launch condition been pending longer than `timeout`, measured
/// from the claim's creation time (no `Launched` condition exists yet)?
pub fn is_launch_timed_out(claim: &NodeClaim, now: DateTime<Utc>, timeout: Duration) -> bool {
    if claim.status.as_ref().map(|s| s.is_true(CONDITION_LAUNCHED)).unwrap_or(false) {
        return false;
    }
    match claim.creation_timestamp() {
        Some(created) => now - created > ChronoDuration::from_std(timeout).unwrap(),
        None => false,
    }
}

/// Has registration been pending longer than `timeout`, measured from the
/// `Launched` condition's transition time?
pub fn is_registration_timed_out(claim: &NodeClaim, now: DateTime<Utc>, timeout: Duration) -> bool {
    let Some(status) = &claim.status else { return false };
    if status.is_true(CONDITION_REGISTERED) {
        return false;
    }
    let Some(launched) = status.condition(CONDITION_LAUNCHED) else { return false };
    if launched.status != "True" {
        return false;
    }
    match launched.last_transition_time {
        Some(t) => now - t > ChronoDuration::from_std(timeout).unwrap(),
        None => false,
    }
}

/// Has initialization been pending longer than `timeout`, measured from the
/// `Registered` condition's transition time? Does not itself trigger
/// deletion — callers use this only to withhold a claim from "healthy"
/// aggregates.
pub fn is_initialization_timed_out(claim: &NodeClaim, now: DateTime<Utc>, timeout: Duration) -> bool {
    let Some(status) = &claim.status else { return false };
    if status.is_true(CONDITION_INITIALIZED) {
        return false;
    }
    let Some(registered) = status.condition(CONDITION_REGISTERED) else { return false };
    if registered.status != "True" {
        return false;
    }
    match registered.last_transition_time {
        Some(t) => now - t > ChronoDuration::from_std(timeout).unwrap(),
        None => false,
    }
}

/// Is `claim` older than `expire_after` (parsed from the owning pool's
/// template)?
pub fn is_expired(claim: &NodeClaim, expire_after: Option<Duration>, now: DateTime<Utc>) -> bool {
    let Some(expire_after) = expire_after else { return false };
    match claim.creation_timestamp() {
        Some(created) => now - created > ChronoDuration::from_std(expire_after).unwrap(),
        None => false,
    }
}

/// Parse a Kubernetes-style duration string (`"720h"`, `"30m"`, `"45s"`,
/// `"7d"`) into a `std::time::Duration`. A single integer magnitude followed
/// by exactly one of `s`/`m`/`h`/`d`.
fn parse_expire_after(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split_at = raw.len().saturating_sub(1);
    let (magnitude, unit) = raw.split_at(split_at);
    let magnitude: u64 = magnitude
        .parse()
        .map_err(|_| Error::DurationParse(format!("{raw:?} is not a valid duration")))?;
    let secs = match unit {
        "s" => magnitude,
        "m" => magnitude * 60,
        "h" => magnitude * 3600,
        "d" => magnitude * 86400,
        other => {
            return Err(Error::DurationParse(format!(
                "{raw:?} has unrecognized unit {other:?}, expected one of s/m/h/d"
            )))
        }
    };
    Ok(Duration::from_secs(secs))
}

/// Startup taints are meant to be removed by some external agent once the
/// node has finished booting; initialization must not complete while any of
/// them are still present.
fn startup_taints_removed(claim: &NodeClaim, node: &ObservedNode) -> bool {
    claim
        .spec
        .startup_taints
        .iter()
        .all(|startup| !node.taints.iter().any(|t| t.key == startup.key && t.effect == startup.effect))
}

/// Every extended-resource key the provider recorded in this claim's
/// `status.capacity` (e.g. device-plugin resources) must show up with a
/// positive allocatable quantity on the registered node before the claim can
/// be considered initialized.
fn extended_resources_present(claim: &NodeClaim, node: &ObservedNode) -> bool {
    let Some(status) = &claim.status else { return true };
    status
        .capacity
        .keys()
        .filter(|k| !is_base_resource(k))
        .all(|k| node.allocatable.get(k) > 0)
}

/// Map a create-failure to a short, condition-`reason`-sized label.
fn launch_failure_reason(error: &Error) -> &'static str {
    match error {
        Error::InsufficientCapacity { .. } => "InsufficientCapacity",
        Error::NodeClassNotReady { .. } => "NodeClassNotReady",
        Error::CreateError { .. } => "CreateError",
        _ => "LaunchFailed",
    }
}

/// Choose the cheapest compatible instance type and, within it, a reserved
/// offering if one remains available, else the cheapest available offering.
///
/// Mirrors the selection rule: gather candidates compatible with
/// `requirements`, sort ascending by cheapest compatible offering, then
/// within the chosen type prefer reserved capacity.
pub fn select_instance_type_and_offering(
    instance_types: &InstanceTypes,
    requirements: &Requirements,
) -> Option<(InstanceType, Offering)> {
    let compatible = instance_types.compatible(requirements);
    let ordered = compatible.order_by_price(requirements);

    for instance_type in ordered.0.into_iter() {
        let candidates: Vec<&Offering> = instance_type
            .offerings
            .iter()
            .filter(|o| o.available && o.compatible(requirements))
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let chosen = candidates
            .iter()
            .find(|o| o.capacity_type() == Some(crate::resource::CapacityType::Reserved))
            .or_else(|| candidates.iter().min_by(|a, b| a.price.total_cmp(&b.price)))
            .copied()
            .cloned();
        if let Some(offering) = chosen {
            return Some((instance_type, offering));
        }
    }
    None
}

async fn patch_status(api: &Api<NodeClaim>, name: &str, status: NodeClaimStatus) -> Result<()> {
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::apply("karpenter-core"), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Main reconcile entrypoint wired into `Controller::run`.
pub async fn reconcile(claim: Arc<NodeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<NodeClaim> = Api::all(ctx.client.clone());

    let claim_for_finalizer = claim.clone();
    let outcome = finalizer::finalizer(&api, FINALIZER, claim_for_finalizer, |event| async {
        match event {
            FinalizerEvent::Apply(claim) => apply(claim, ctx.clone()).await,
            FinalizerEvent::Cleanup(claim) => cleanup(claim, ctx.clone()).await,
        }
    })
    .await;

    match outcome {
        Ok(action) => Ok(action),
        Err(finalizer::Error::ApplyFailed(e)) | Err(finalizer::Error::CleanupFailed(e)) => Err(e),
        Err(e) => Err(Error::Internal(format!("finalizer error: {e}"))),
    }
}

async fn apply(claim: Arc<NodeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<NodeClaim> = Api::all(ctx.client.clone());
    let now = Utc::now();

    // Checked unconditionally, before the provider_id branch below: a claim
    // whose `create()` keeps erroring never gets provider_id set, so this is
    // the only thing standing between it and being retried forever.
    if is_launch_timed_out(&claim, now, ctx.config.launch_timeout) {
        warn!(name = claim.name(), "launch timed out, deleting claim");
        api.delete(claim.name(), &Default::default()).await?;
        return Ok(Action::await_change());
    }

    if claim.status.as_ref().and_then(|s| s.provider_id.as_ref()).is_none() {
        return launch(&claim, &api, &ctx).await;
    }

    if is_registration_timed_out(&claim, now, ctx.config.registration_timeout) {
        warn!(name = claim.name(), "registration timed out, deleting claim");
        if let Some(pool_uid) = pool_uid(&claim, &ctx).await {
            ctx.health.update(pool_uid, false);
        }
        let _ = ctx.cloud_provider.delete(&claim).await;
        api.delete(claim.name(), &Default::default()).await?;
        return Ok(Action::await_change());
    }

    let status = claim.status.clone().unwrap_or_default();
    if !status.is_true(CONDITION_REGISTERED) {
        return check_registration(&claim, &api, &ctx).await;
    }

    if !status.is_true(CONDITION_INITIALIZED) {
        return check_initialization(&claim, &api, &ctx).await;
    }

    check_expiry_and_drift(&claim, &api, &ctx, now).await
}

async fn launch(claim: &NodeClaim, api: &Api<NodeClaim>, ctx: &Arc<Context>) -> Result<Action> {
    match ctx.cloud_provider.create(claim).await {
        Ok(launched) => {
            let mut status = launched.status.clone().unwrap_or_default();
            status.set_condition(transition(None, CONDITION_LAUNCHED, true, "Launched", "instance launched", Utc::now()));
            patch_status(api, claim.name(), status).await?;
            info!(name = claim.name(), "nodeclaim launched");
            Ok(Action::requeue(Duration::from_secs(10)))
        }
        Err(e) => {
            let mut status = claim.status.clone().unwrap_or_default();
            status.set_condition(transition(
                status.condition(CONDITION_LAUNCHED),
                CONDITION_LAUNCHED,
                false,
                launch_failure_reason(&e),
                e.to_string(),
                Utc::now(),
            ));
            patch_status(api, claim.name(), status).await?;
            Err(e)
        }
    }
}

async fn check_registration(claim: &NodeClaim, api: &Api<NodeClaim>, ctx: &Arc<Context>) -> Result<Action> {
    let Some(provider_id) = claim.status.as_ref().and_then(|s| s.provider_id.clone()) else {
        return Ok(Action::requeue(Duration::from_secs(10)));
    };
    match ctx.cluster.node_by_provider_id(&provider_id) {
        Some(node) => {
            let mut status = claim.status.clone().unwrap_or_default();
            status.set_condition(transition(
                status.condition(CONDITION_REGISTERED),
                CONDITION_REGISTERED,
                true,
                "Registered",
                "matching node observed",
                Utc::now(),
            ));
            status.node_name = Some(node.name.clone());
            patch_status(api, claim.name(), status).await?;
            if let Some(pool_uid) = pool_uid(claim, ctx).await {
                ctx.health.update(pool_uid, true);
            }
            Ok(Action::requeue(Duration::from_secs(10)))
        }
        None => Ok(Action::requeue(Duration::from_secs(5))),
    }
}

async fn check_initialization(claim: &NodeClaim, api: &Api<NodeClaim>, ctx: &Arc<Context>) -> Result<Action> {
    let Some(node_name) = claim.status.as_ref().and_then(|s| s.node_name.clone()) else {
        return Ok(Action::requeue(Duration::from_secs(10)));
    };
    match ctx.cluster.node_by_name(&node_name) {
        Some(node)
            if node.ready && startup_taints_removed(claim, &node) && extended_resources_present(claim, &node) =>
        {
            let mut status = claim.status.clone().unwrap_or_default();
            status.set_condition(transition(
                status.condition(CONDITION_INITIALIZED),
                CONDITION_INITIALIZED,
                true,
                "Initialized",
                "node ready, startup taints removed, extended resources present",
                Utc::now(),
            ));
            patch_status(api, claim.name(), status).await?;
            Ok(Action::requeue(Duration::from_secs(60)))
        }
        _ => Ok(Action::requeue(Duration::from_secs(10))),
    }
}

/// Runs once a claim is Initialized: checks expiry (deletes immediately,
/// since an expired claim has nothing left to wait on) and drift (only
/// records the condition — acting on it is the disruption planner's job,
/// out of scope here).
async fn check_expiry_and_drift(
    claim: &NodeClaim,
    api: &Api<NodeClaim>,
    ctx: &Arc<Context>,
    now: DateTime<Utc>,
) -> Result<Action> {
    let expire_after = match &claim.spec.expire_after {
        Some(raw) => Some(parse_expire_after(raw)?),
        None => None,
    };

    if is_expired(claim, expire_after, now) {
        warn!(name = claim.name(), "nodeclaim expired, deleting");
        api.delete(claim.name(), &Default::default()).await?;
        return Ok(Action::await_change());
    }

    let drifted = ctx.cloud_provider.is_drifted(claim).await?;
    let status = claim.status.clone().unwrap_or_default();
    let was_drifted = status.is_true(CONDITION_DRIFTED);

    match drifted {
        Some(reason) if !was_drifted => {
            let mut status = status;
            status.set_condition(transition(
                status.condition(CONDITION_DRIFTED),
                CONDITION_DRIFTED,
                true,
                "Drifted",
                reason.0,
                now,
            ));
            patch_status(api, claim.name(), status).await?;
            info!(name = claim.name(), "nodeclaim drifted");
        }
        None if was_drifted => {
            let mut status = status;
            status.set_condition(transition(
                status.condition(CONDITION_DRIFTED),
                CONDITION_DRIFTED,
                false,
                "NotDrifted",
                "instance matches intended configuration",
                now,
            ));
            patch_status(api, claim.name(), status).await?;
        }
        _ => {}
    }

    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn cleanup(claim: Arc<NodeClaim>, ctx: Arc<Context>) -> Result<Action> {
    match ctx.cloud_provider.delete(&claim).await {
        Ok(()) => Ok(Action::await_change()),
        Err(Error::NodeClaimNotFound { .. }) => Ok(Action::await_change()),
        Err(e) => Err(e),
    }
}

/// Periodically lists every provider-side instance and deletes any with no
/// backing live `NodeClaim` — e.g. one whose claim was force-deleted before
/// its finalizer ran `cleanup`, or one the provider created outside this
/// reconciler entirely.
pub async fn run_orphan_gc(client: Client, cloud_provider: DynCloudProvider, interval: Duration) {
    let api: Api<NodeClaim> = Api::all(client);
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let live = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "orphan gc: failed to list live nodeclaims");
                continue;
            }
        };
        let provider_instances = match cloud_provider.list().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "orphan gc: failed to list provider instances");
                continue;
            }
        };

        for instance in provider_instances {
            let Some(provider_id) = instance.status.as_ref().and_then(|s| s.provider_id.clone()) else {
                continue;
            };
            let still_claimed = live
                .iter()
                .any(|c| c.status.as_ref().and_then(|s| s.provider_id.as_deref()) == Some(provider_id.as_str()));
            if still_claimed {
                continue;
            }
            warn!(provider_id, "orphan gc: deleting provider instance with no backing nodeclaim");
            if let Err(e) = cloud_provider.delete(&instance).await {
                warn!(error = %e, provider_id, "orphan gc: delete failed");
            }
        }
    }
}

async fn pool_uid(claim: &NodeClaim, ctx: &Arc<Context>) -> Option<uuid::Uuid> {
    let pool_name = claim.pool_name()?;
    let api: Api<NodePool> = Api::all(ctx.client.clone());
    let pool = api.get(pool_name).await.ok()?;
    pool.uid()
}

/// Error-policy companion to [`reconcile`].
pub fn error_policy(_claim: Arc<NodeClaim>, error: &Error, _ctx: Arc<Context>) -> Action {
    action_for_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::Condition;

    fn claim_with_condition(type_: &str, status: &str, transition_time: Option<DateTime<Utc>>) -> NodeClaim {
        use kube::core::ObjectMeta;
        let mut s = NodeClaimStatus::default();
        s.set_condition(Condition {
            r#type: type_.into(),
            status: status.into(),
            last_transition_time: transition_time,
            reason: None,
            message: None,
            observed_generation: None,
        });
        NodeClaim {
            metadata: ObjectMeta { name: Some("claim-1".into()), ..Default::default() },
            spec: crate::crd::NodeClaimSpec {
                requirements: vec![],
                resources: Default::default(),
                node_class_ref: crate::crd::NodeClassReference { name: "default".into(), ..Default::default() },
                taints: vec![],
                startup_taints: vec![],
                termination_grace_period: None,
                expire_after: None,
            },
            status: Some(s),
        }
    }

    #[test]
    fn registration_timeout_measured_from_launched_transition() {
        let now = Utc::now();
        let launched_at = now - ChronoDuration::minutes(20);
        let claim = claim_with_condition(CONDITION_LAUNCHED, "True", Some(launched_at));
        assert!(is_registration_timed_out(&claim, now, Duration::from_secs(900)));
    }

    #[test]
    fn registration_not_timed_out_within_window() {
        let now = Utc::now();
        let launched_at = now - ChronoDuration::minutes(5);
        let claim = claim_with_condition(CONDITION_LAUNCHED, "True", Some(launched_at));
        assert!(!is_registration_timed_out(&claim, now, Duration::from_secs(900)));
    }

    #[test]
    fn already_registered_is_never_timed_out() {
        let now = Utc::now();
        let claim = claim_with_condition(CONDITION_REGISTERED, "True", Some(now - ChronoDuration::hours(2)));
        assert!(!is_registration_timed_out(&claim, now, Duration::from_secs(900)));
    }

    #[test]
    fn launch_timeout_measured_from_creation() {
        use kube::core::{ObjectMeta, Time};
        let now = Utc::now();
        let mut claim = claim_with_condition("Unrelated", "True", None);
        claim.metadata = ObjectMeta {
            name: Some("claim-1".into()),
            creation_timestamp: Some(Time(now - ChronoDuration::minutes(10))),
            ..Default::default()
        };
        assert!(is_launch_timed_out(&claim, now, Duration::from_secs(300)));
    }

    #[test]
    fn expiry_measured_from_creation() {
        use kube::core::{ObjectMeta, Time};
        let now = Utc::now();
        let mut claim = claim_with_condition("Unrelated", "True", None);
        claim.metadata = ObjectMeta {
            name: Some("claim-1".into()),
            creation_timestamp: Some(Time(now - ChronoDuration::days(10))),
            ..Default::default()
        };
        assert!(is_expired(&claim, Some(Duration::from_secs(86400 * 7)), now));
        assert!(!is_expired(&claim, Some(Duration::from_secs(86400 * 30)), now));
        assert!(!is_expired(&claim, None, now));
    }

    #[test]
    fn selects_reserved_offering_over_cheaper_on_demand() {
        use crate::resource::{CapacityType, Offering, Requirements, ResourceList, Overhead};
        let reserved = Offering::reserved("us-east-1a", 5.0, "res-1", 2);
        let on_demand = Offering::new("us-east-1a", CapacityType::OnDemand, 1.0);
        let it = InstanceType::new(
            "m5.large",
            Requirements::new(),
            vec![on_demand, reserved],
            ResourceList::new(),
            Overhead::default(),
        );
        let types = InstanceTypes::new(vec![it]);
        let req = Requirements::new();
        let (chosen_type, chosen_offering) = select_instance_type_and_offering(&types, &req).unwrap();
        assert_eq!(chosen_type.name, "m5.large");
        assert_eq!(chosen_offering.capacity_type(), Some(CapacityType::Reserved));
    }

    #[test]
    fn parse_expire_after_accepts_hours_and_days() {
        assert_eq!(parse_expire_after("720h").unwrap(), Duration::from_secs(720 * 3600));
        assert_eq!(parse_expire_after("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_expire_after("30m").unwrap(), Duration::from_secs(30 * 60));
        assert_eq!(parse_expire_after("45s").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parse_expire_after_rejects_unknown_unit() {
        assert!(parse_expire_after("720x").is_err());
        assert!(parse_expire_after("bogus").is_err());
    }

    #[test]
    fn launch_failure_reason_maps_known_variants() {
        assert_eq!(
            launch_failure_reason(&Error::InsufficientCapacity { name: "c".into(), reason: "r".into() }),
            "InsufficientCapacity"
        );
        assert_eq!(
            launch_failure_reason(&Error::NodeClassNotReady { class: "c".into(), reason: "r".into() }),
            "NodeClassNotReady"
        );
        assert_eq!(launch_failure_reason(&Error::Internal("boom".into())), "LaunchFailed");
    }

    fn claim_with_startup_taint(key: &str, effect: &str) -> NodeClaim {
        let mut claim = claim_with_condition("Unrelated", "True", None);
        claim.spec.startup_taints = vec![crate::crd::Taint {
            key: key.into(),
            value: None,
            effect: effect.into(),
        }];
        claim
    }

    fn observed_node(taints: Vec<crate::crd::Taint>) -> ObservedNode {
        ObservedNode {
            name: "node-1".into(),
            provider_id: Some("provider://node-1".into()),
            pool_name: Some("default".into()),
            allocatable: crate::resource::ResourceList::new(),
            ready: true,
            taints,
        }
    }

    #[test]
    fn startup_taints_removed_false_while_still_present() {
        let claim = claim_with_startup_taint("node.k8s.io/not-ready", "NoSchedule");
        let node = observed_node(vec![crate::crd::Taint {
            key: "node.k8s.io/not-ready".into(),
            value: None,
            effect: "NoSchedule".into(),
        }]);
        assert!(!startup_taints_removed(&claim, &node));
    }

    #[test]
    fn startup_taints_removed_true_once_cleared() {
        let claim = claim_with_startup_taint("node.k8s.io/not-ready", "NoSchedule");
        let node = observed_node(vec![]);
        assert!(startup_taints_removed(&claim, &node));
    }

    #[test]
    fn extended_resources_present_requires_positive_allocatable() {
        let mut claim = claim_with_condition("Unrelated", "True", None);
        let mut status = claim.status.clone().unwrap();
        status.capacity.insert("nvidia.com/gpu".into(), 2);
        claim.status = Some(status);

        let mut node = observed_node(vec![]);
        assert!(!extended_resources_present(&claim, &node));

        node.allocatable.set("nvidia.com/gpu", 2);
        assert!(extended_resources_present(&claim, &node));
    }
}

//! Hydration controller: back-fills the node-class label onto pre-existing
//! NodeClaims so older claims created before a label was introduced stay
//! queryable the same way as new ones.

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::cloudprovider::SupportedNodeClass;
use crate::controllers::{action_for_error, Context};
use crate::crd::NodeClaim;
use crate::error::{Error, Result};

/// The label key a node class group/kind is hydrated onto, e.g.
/// `karpenter.k8s.aws/ec2nodeclass`.
pub fn class_label_key(group: &str, kind: &str) -> String {
    format!("{}/{}", group, kind.to_lowercase())
}

/// Is `claim`'s class in the set this provider understands? Unsupported
/// classes are left alone (forward-compat with foreign controllers).
pub fn is_managed(claim: &NodeClaim, supported: &[SupportedNodeClass]) -> bool {
    let class_ref = &claim.spec.node_class_ref;
    supported.iter().any(|s| s.group == class_ref.group && s.kind == class_ref.kind)
}

pub async fn reconcile(claim: Arc<NodeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let supported = ctx.cloud_provider.get_supported_node_classes();
    if !is_managed(&claim, &supported) {
        return Ok(Action::await_change());
    }

    let class_ref = &claim.spec.node_class_ref;
    let key = class_label_key(&class_ref.group, &class_ref.kind);
    let already_present = claim.labels().get(key.as_str()).map(String::as_str) == Some(class_ref.name.as_str());

    if !already_present {
        let api: Api<NodeClaim> = Api::all(ctx.client.clone());
        let patch = json!({ "metadata": { "labels": { key: class_ref.name } } });
        api.patch(claim.name(), &PatchParams::apply("karpenter-core"), &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 409 => {
                    Error::Conflict { kind: "NodeClaim".into(), name: claim.name().to_string() }
                }
                other => Error::Kube(other),
            })?;
    }

    Ok(Action::requeue(Duration::from_secs(300)))
}

pub fn error_policy(_claim: Arc<NodeClaim>, error: &Error, _ctx: Arc<Context>) -> Action {
    action_for_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn claim(group: &str, kind: &str) -> NodeClaim {
        NodeClaim {
            metadata: ObjectMeta { name: Some("claim-1".into()), ..Default::default() },
            spec: crate::crd::NodeClaimSpec {
                requirements: vec![],
                resources: Default::default(),
                node_class_ref: crate::crd::NodeClassReference {
                    group: group.into(),
                    kind: kind.into(),
                    name: "default".into(),
                    ..Default::default()
                },
                taints: vec![],
                startup_taints: vec![],
                termination_grace_period: None,
                expire_after: None,
            },
            status: None,
        }
    }

    #[test]
    fn class_label_key_lowercases_kind() {
        assert_eq!(class_label_key("karpenter.k8s.aws", "EC2NodeClass"), "karpenter.k8s.aws/ec2nodeclass");
    }

    #[test]
    fn unsupported_class_is_not_managed() {
        let c = claim("other.io", "OtherNodeClass");
        let supported = vec![SupportedNodeClass { group: "karpenter.k8s.aws".into(), kind: "EC2NodeClass".into() }];
        assert!(!is_managed(&c, &supported));
    }

    #[test]
    fn supported_class_is_managed() {
        let c = claim("karpenter.k8s.aws", "EC2NodeClass");
        let supported = vec![SupportedNodeClass { group: "karpenter.k8s.aws".into(), kind: "EC2NodeClass".into() }];
        assert!(is_managed(&c, &supported));
    }
}

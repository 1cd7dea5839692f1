//! NodeClaim CRD
//!
//! A single request for (and later, record of) a launched node. The
//! lifecycle controller drives a NodeClaim from `Launched` through
//! `Registered`/`Initialized` to eventual `Terminating`/deletion.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::node_pool::{Condition, NodeClassReference, Taint, TemplateRequirement};
use crate::resource::requirements::Requirements;

pub const LABEL_NODEPOOL: &str = "karpenter.sh/nodepool";
pub const LABEL_CAPACITY_TYPE: &str = "karpenter.sh/capacity-type";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.sh",
    version = "v1",
    kind = "NodeClaim",
    plural = "nodeclaims",
    shortname = "nc",
    status = "NodeClaimStatus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".status.capacity.node\\.kubernetes\\.io/instance-type"}"#,
    printcolumn = r#"{"name": "Zone", "type": "string", "jsonPath": ".metadata.labels.topology\\.kubernetes\\.io/zone"}"#,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".status.nodeName"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimSpec {
    #[serde(default)]
    pub requirements: Vec<TemplateRequirement>,

    /// Minimum resource requests this claim must be able to satisfy.
    #[serde(default)]
    pub resources: NodeClaimResources,

    pub node_class_ref: NodeClassReference,

    #[serde(default)]
    pub taints: Vec<Taint>,

    #[serde(default)]
    pub startup_taints: Vec<Taint>,

    #[serde(default)]
    pub termination_grace_period: Option<String>,

    #[serde(default)]
    pub expire_after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimResources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimStatus {
    /// Cloud-provider instance identifier. Immutable once set — the
    /// lifecycle controller must never overwrite a non-empty value.
    #[serde(default)]
    pub provider_id: Option<String>,

    #[serde(default)]
    pub node_name: Option<String>,

    #[serde(default)]
    pub image_id: Option<String>,

    #[serde(default)]
    pub capacity: BTreeMap<String, i64>,

    #[serde(default)]
    pub allocatable: BTreeMap<String, i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

pub const CONDITION_LAUNCHED: &str = "Launched";
pub const CONDITION_REGISTERED: &str = "Registered";
pub const CONDITION_INITIALIZED: &str = "Initialized";
pub const CONDITION_DRIFTED: &str = "Drifted";
pub const CONDITION_EXPIRED: &str = "Expired";
pub const CONDITION_CONSOLIDATABLE: &str = "Consolidatable";
pub const CONDITION_READY: &str = "Ready";

impl NodeClaimStatus {
    pub fn set_condition(&mut self, condition: Condition) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == type_)
    }

    pub fn is_true(&self, type_: &str) -> bool {
        self.condition(type_).map(|c| c.status == "True").unwrap_or(false)
    }
}

/// Terminal phase classification, derived from the status conditions rather
/// than stored directly — mirrors the teacher's pattern of deriving a summary
/// enum from condition state instead of duplicating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Launched,
    Registered,
    Initialized,
    Terminating,
}

impl NodeClaim {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    pub fn pool_name(&self) -> Option<&str> {
        self.metadata.labels.as_ref()?.get(LABEL_NODEPOOL).map(|s| s.as_str())
    }

    pub fn capacity_type(&self) -> Option<&str> {
        self.metadata.labels.as_ref()?.get(LABEL_CAPACITY_TYPE).map(|s| s.as_str())
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn phase(&self) -> Phase {
        if self.is_terminating() {
            return Phase::Terminating;
        }
        let Some(status) = &self.status else {
            return Phase::Pending;
        };
        if status.is_true(CONDITION_INITIALIZED) {
            Phase::Initialized
        } else if status.is_true(CONDITION_REGISTERED) {
            Phase::Registered
        } else if status.is_true(CONDITION_LAUNCHED) {
            Phase::Launched
        } else {
            Phase::Pending
        }
    }

    /// Build the `Requirements` this claim demands, combining its own spec
    /// requirements with the `minValues` hints carried alongside them.
    pub fn requirements(&self) -> Requirements {
        Requirements::from_iter(self.spec.requirements.iter().map(Into::into))
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn claim_with_labels(labels: BTreeMap<String, String>) -> NodeClaim {
        NodeClaim {
            metadata: ObjectMeta {
                name: Some("claim-1".into()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: NodeClaimSpec {
                requirements: vec![],
                resources: NodeClaimResources::default(),
                node_class_ref: NodeClassReference { name: "default".into(), ..Default::default() },
                taints: vec![],
                startup_taints: vec![],
                termination_grace_period: None,
                expire_after: None,
            },
            status: None,
        }
    }

    #[test]
    fn pool_name_reads_label() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_NODEPOOL.to_string(), "default".to_string());
        let claim = claim_with_labels(labels);
        assert_eq!(claim.pool_name(), Some("default"));
    }

    #[test]
    fn phase_pending_without_status() {
        let claim = claim_with_labels(BTreeMap::new());
        assert_eq!(claim.phase(), Phase::Pending);
    }

    #[test]
    fn phase_progresses_with_conditions() {
        let mut claim = claim_with_labels(BTreeMap::new());
        let mut status = NodeClaimStatus::default();
        status.set_condition(Condition {
            r#type: CONDITION_LAUNCHED.into(),
            status: "True".into(),
            last_transition_time: None,
            reason: None,
            message: None,
            observed_generation: None,
        });
        claim.status = Some(status.clone());
        assert_eq!(claim.phase(), Phase::Launched);

        status.set_condition(Condition {
            r#type: CONDITION_REGISTERED.into(),
            status: "True".into(),
            last_transition_time: None,
            reason: None,
            message: None,
            observed_generation: None,
        });
        claim.status = Some(status);
        assert_eq!(claim.phase(), Phase::Registered);
    }

    #[test]
    fn terminating_overrides_condition_phase() {
        let mut claim = claim_with_labels(BTreeMap::new());
        claim.metadata.deletion_timestamp = Some(kube::core::Time(Utc::now()));
        assert_eq!(claim.phase(), Phase::Terminating);
    }
}

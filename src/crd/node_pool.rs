//! NodePool CRD
//!
//! A template describing a class of nodes the cluster autoscaler is allowed
//! to launch, plus the aggregated resource/health status observed across the
//! NodeClaims it owns.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::requirements::{Operator, Requirement};

// =============================================================================
// NodePool CRD
// =============================================================================

/// NodePool describes a class of nodes the autoscaler may launch: the
/// requirements/taints/labels new NodeClaims should carry, how heavily this
/// pool should be weighted relative to others, and the limits the counter
/// enforces against it.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.sh",
    version = "v1",
    kind = "NodePool",
    plural = "nodepools",
    shortname = "np",
    status = "NodePoolStatus",
    printcolumn = r#"{"name": "Weight", "type": "integer", "jsonPath": ".spec.weight"}"#,
    printcolumn = r#"{"name": "Nodes", "type": "integer", "jsonPath": ".status.nodes"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Template applied to every NodeClaim this pool launches.
    pub template: NodeClaimTemplate,

    /// Relative weight among pools, in [1, 10000]. Absent is treated as 0.
    #[serde(default)]
    pub weight: Option<u32>,

    /// When set, this is a *static* pool: the counter/lifecycle controllers
    /// maintain exactly this many NodeClaims rather than scaling on demand.
    #[serde(default)]
    pub replicas: Option<u32>,

    /// Disruption (consolidation/drift/expiry) policy — consumed by the
    /// out-of-scope disruption planner, carried here only as data.
    #[serde(default)]
    pub disruption: DisruptionSpec,

    /// Resource limits this pool's aggregated NodeClaims may not exceed.
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Template fields copied onto every NodeClaim launched for this pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimTemplate {
    #[serde(default)]
    pub requirements: Vec<TemplateRequirement>,

    #[serde(default)]
    pub taints: Vec<Taint>,

    #[serde(default)]
    pub startup_taints: Vec<Taint>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    pub node_class_ref: NodeClassReference,

    /// Grace period before a Terminating claim is force-deleted.
    #[serde(default)]
    pub termination_grace_period: Option<String>,

    /// Wall-clock age past which a NodeClaim is considered Expired.
    #[serde(default)]
    pub expire_after: Option<String>,
}

/// A requirement as authored in a NodePool template — serialized shape mirrors
/// a Kubernetes node-selector requirement.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequirement {
    pub key: String,
    pub operator: TemplateOperator,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub min_values: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TemplateOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl From<TemplateOperator> for Operator {
    fn from(op: TemplateOperator) -> Operator {
        match op {
            TemplateOperator::In => Operator::In,
            TemplateOperator::NotIn => Operator::NotIn,
            TemplateOperator::Exists => Operator::Exists,
            TemplateOperator::DoesNotExist => Operator::DoesNotExist,
            TemplateOperator::Gt => Operator::Gt,
            TemplateOperator::Lt => Operator::Lt,
        }
    }
}

impl From<&TemplateRequirement> for Requirement {
    fn from(t: &TemplateRequirement) -> Requirement {
        let mut r = Requirement::new(t.key.clone(), t.operator.into(), t.values.clone());
        r.min_values = t.min_values;
        r
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub effect: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassReference {
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_node_class_version")]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

fn default_node_class_version() -> String {
    "v1".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionSpec {
    #[serde(default)]
    pub consolidate_after: Option<String>,
    #[serde(default)]
    pub consolidation_policy: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolStatus {
    /// Aggregated allocatable resources across this pool's nodes.
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,

    /// Convenience projection of `resources["nodes"]`.
    #[serde(default)]
    pub nodes: i64,

    /// The node class's `.metadata.generation` as of the last successful
    /// reconcile, used to detect class spec changes that should reset health.
    #[serde(default)]
    pub node_class_observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// The `.metadata.generation` observed when this condition was last set,
    /// used by the registration-health controller to detect spec drift.
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

pub const CONDITION_NODE_REGISTRATION_HEALTHY: &str = "NodeRegistrationHealthy";
pub const CONDITION_VALIDATION_SUCCEEDED: &str = "ValidationSucceeded";
pub const CONDITION_READY: &str = "Ready";

impl NodePoolStatus {
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

    pub fn clear_condition(&mut self, type_: &str) {
        self.conditions.retain(|c| c.r#type != type_);
    }
}

impl NodePool {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    pub fn uid(&self) -> Option<uuid::Uuid> {
        self.metadata
            .uid
            .as_deref()
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
    }

    /// Effective weight: absent spec weight is treated as zero.
    pub fn effective_weight(&self) -> u32 {
        self.spec.weight.unwrap_or(0)
    }

    pub fn is_static(&self) -> bool {
        self.spec.replicas.is_some()
    }
}

/// Sort pools in place by descending weight, ties broken by *reverse*
/// alphabetical name (the larger-valued name sorts first). This tie-break
/// direction is deliberate and must not be "corrected" to ascending.
pub fn order_by_weight(pools: &mut [NodePool]) {
    pools.sort_by(|a, b| {
        b.effective_weight()
            .cmp(&a.effective_weight())
            .then_with(|| b.name().cmp(a.name()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn pool(name: &str, weight: Option<u32>) -> NodePool {
        NodePool {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: NodePoolSpec {
                template: NodeClaimTemplate::default(),
                weight,
                replicas: None,
                disruption: DisruptionSpec::default(),
                limits: BTreeMap::new(),
            },
            status: None,
        }
    }

    #[test]
    fn order_by_weight_descending() {
        let mut pools = vec![pool("a", Some(1)), pool("b", Some(10)), pool("c", Some(5))];
        order_by_weight(&mut pools);
        let names: Vec<_> = pools.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn order_by_weight_ties_break_reverse_alphabetical() {
        let mut pools = vec![pool("alpha", Some(5)), pool("zeta", Some(5)), pool("mid", Some(5))];
        order_by_weight(&mut pools);
        let names: Vec<_> = pools.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["zeta", "mid", "alpha"]);
    }

    #[test]
    fn absent_weight_is_zero() {
        let p = pool("a", None);
        assert_eq!(p.effective_weight(), 0);
    }

    #[test]
    fn set_condition_replaces_existing_by_type() {
        let mut status = NodePoolStatus::default();
        status.set_condition(Condition {
            r#type: CONDITION_READY.into(),
            status: "False".into(),
            last_transition_time: None,
            reason: None,
            message: None,
            observed_generation: None,
        });
        status.set_condition(Condition {
            r#type: CONDITION_READY.into(),
            status: "True".into(),
            last_transition_time: None,
            reason: None,
            message: None,
            observed_generation: None,
        });
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.condition(CONDITION_READY).unwrap().status, "True");
    }
}

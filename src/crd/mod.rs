//! Custom resource definitions: NodePool and NodeClaim.

pub mod node_claim;
pub mod node_pool;

pub use node_claim::{
    NodeClaim, NodeClaimResources, NodeClaimSpec, NodeClaimStatus, Phase, CONDITION_CONSOLIDATABLE,
    CONDITION_DRIFTED, CONDITION_EXPIRED, CONDITION_INITIALIZED, CONDITION_LAUNCHED,
    CONDITION_REGISTERED, LABEL_CAPACITY_TYPE, LABEL_NODEPOOL,
};
pub use node_pool::{
    order_by_weight, Condition, DisruptionSpec, NodeClassReference, NodeClaimTemplate, NodePool,
    NodePoolSpec, NodePoolStatus, Taint, TemplateOperator, TemplateRequirement,
    CONDITION_NODE_REGISTRATION_HEALTHY, CONDITION_READY, CONDITION_VALIDATION_SUCCEEDED,
};

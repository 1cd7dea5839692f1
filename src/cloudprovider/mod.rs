//! CloudProvider — the narrow capability boundary between the core engine
//! and a concrete provider driver (EC2, etc). Nothing in this crate talks to
//! a provider API directly; everything goes through this trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::crd::{NodeClaim, NodePool};
use crate::error::Result;
use crate::resource::InstanceTypes;

/// A class of node the provider can launch against (the `classRef.kind` a
/// NodePool/NodeClaim may point at).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedNodeClass {
    pub group: String,
    pub kind: String,
}

/// Reason and machine-readable drift category for `is_drifted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReason(pub String);

/// Repair action a provider recommends for an unhealthy node, keyed by the
/// condition type it targets (out of scope to execute here; only carried).
#[derive(Debug, Clone)]
pub struct RepairPolicy {
    pub condition_type: String,
    pub tolerance_duration: std::time::Duration,
}

/// The capability set the core consumes from a concrete provider driver.
///
/// Implementations are expected to return the error taxonomy defined in
/// [`crate::error::Error`] — in particular `NodeClaimNotFound`,
/// `InsufficientCapacity`, `NodeClassNotReady`, and `CreateError` — rather
/// than wrapping arbitrary provider SDK errors.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Launch a new instance satisfying `claim`'s requirements and resource
    /// requests, returning the claim with provider-assigned status fields
    /// (`providerId`, `capacity`, `allocatable`, `imageId`) and any
    /// offering-pinned labels populated.
    async fn create(&self, claim: &NodeClaim) -> Result<NodeClaim>;

    /// Terminate the instance backing `claim`. Must return
    /// `Error::NodeClaimNotFound` (not an error the caller should retry) once
    /// the provider confirms the instance no longer exists.
    async fn delete(&self, claim: &NodeClaim) -> Result<()>;

    /// Fetch the current provider-side view of `claim`'s backing instance.
    async fn get(&self, provider_id: &str) -> Result<NodeClaim>;

    /// List every provider instance tagged as belonging to this cluster,
    /// used by the lifecycle controller's orphan-instance GC pass.
    async fn list(&self) -> Result<Vec<NodeClaim>>;

    /// Instance types (with offerings) available to launch against `pool`.
    async fn get_instance_types(&self, pool: &NodePool) -> Result<InstanceTypes>;

    /// Non-empty drift reason if `claim`'s backing instance no longer
    /// matches its intended configuration; `None` if not drifted.
    async fn is_drifted(&self, claim: &NodeClaim) -> Result<Option<DriftReason>>;

    /// Node conditions this provider recommends repairing automatically,
    /// and how long to tolerate each before acting.
    fn repair_policies(&self) -> Vec<RepairPolicy>;

    /// Node-class group/kinds this provider understands as a `classRef`.
    fn get_supported_node_classes(&self) -> Vec<SupportedNodeClass>;

    /// Short identifying name, used in logs and metrics labels.
    fn name(&self) -> &str;
}

pub type DynCloudProvider = Arc<dyn CloudProvider>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InstanceTypes;
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl CloudProvider for StubProvider {
        async fn create(&self, claim: &NodeClaim) -> Result<NodeClaim> {
            Ok(claim.clone())
        }
        async fn delete(&self, _claim: &NodeClaim) -> Result<()> {
            Ok(())
        }
        async fn get(&self, provider_id: &str) -> Result<NodeClaim> {
            Err(crate::error::Error::NodeClaimNotFound { name: provider_id.into() })
        }
        async fn list(&self) -> Result<Vec<NodeClaim>> {
            Ok(vec![])
        }
        async fn get_instance_types(&self, _pool: &NodePool) -> Result<InstanceTypes> {
            Ok(InstanceTypes::new(vec![]))
        }
        async fn is_drifted(&self, _claim: &NodeClaim) -> Result<Option<DriftReason>> {
            Ok(None)
        }
        fn repair_policies(&self) -> Vec<RepairPolicy> {
            vec![]
        }
        fn get_supported_node_classes(&self) -> Vec<SupportedNodeClass> {
            vec![SupportedNodeClass { group: "karpenter.sh".into(), kind: "NodeClass".into() }]
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn stub_provider_satisfies_trait_object() {
        let provider: DynCloudProvider = Arc::new(StubProvider);
        assert_eq!(provider.name(), "stub");
        assert!(provider.list().await.unwrap().is_empty());
        assert!(matches!(
            provider.get("i-123").await.unwrap_err(),
            crate::error::Error::NodeClaimNotFound { .. }
        ));
    }
}

//! Error types for the core autoscaling engine
//!
//! Provides the structured error taxonomy surfaced by the cloud-provider port,
//! the instance-type/offering engine, and the reconcilers built on top of them.

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Optimistic concurrency conflict updating {kind}/{name}")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Cloud-provider port errors (the taxonomy a CloudProvider implementation
    // is expected to return from Create/Delete/Get)
    // =========================================================================
    /// The provider has no record of the instance backing a NodeClaim. Returned
    /// from `Get`/`Delete` once the underlying instance is gone.
    #[error("NodeClaim {name} has no backing provider instance")]
    NodeClaimNotFound { name: String },

    /// The provider could not satisfy the requested instance types/zones at
    /// this time (spot interruption, capacity exhaustion, quota).
    #[error("Insufficient capacity for NodeClaim {name}: {reason}")]
    InsufficientCapacity { name: String, reason: String },

    /// The node class a NodeClaim/NodePool refers to isn't ready yet (e.g. its
    /// controller hasn't resolved an AMI/image or IAM role).
    #[error("Node class {class} is not ready: {reason}")]
    NodeClassNotReady { class: String, reason: String },

    /// Catch-all for a provider `Create` failure with a typed reason, mirrored
    /// onto the NodeClaim's status condition verbatim.
    #[error("Create failed ({reason}): {message}")]
    CreateError { reason: String, message: String },

    // =========================================================================
    // Requirements / selection errors
    // =========================================================================
    #[error("Requirement parse error: {0}")]
    RequirementParse(String),

    #[error(
        "Min-values not satisfied for keys: {}",
        violators.iter().map(|(k, n)| format!("{k}={n}")).collect::<Vec<_>>().join(", ")
    )]
    MinValuesViolated { violators: BTreeMap<String, usize> },

    #[error("No instance type satisfies requirements for NodeClaim {name}")]
    NoCompatibleInstanceType { name: String },

    #[error("Price overlay parse error: {0}")]
    PriceOverlayParse(String),

    // =========================================================================
    // Health ring errors
    // =========================================================================
    #[error("Unknown pool UID in health tracker: {uid}")]
    UnknownPoolUid { uid: String },

    // =========================================================================
    // Parse errors
    // =========================================================================
    #[error("Duration parse error: {0}")]
    DurationParse(String),

    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after a specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient - retry with backoff
            Error::Kube(_) | Error::Conflict { .. } => ErrorAction::RequeueWithBackoff,

            // Capacity/class issues - don't retry-storm, give the provider time
            Error::InsufficientCapacity { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),
            Error::NodeClassNotReady { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Terminal for the current object - surfaced, no automatic retry
            Error::CreateError { .. }
            | Error::MinValuesViolated { .. }
            | Error::NoCompatibleInstanceType { .. }
            | Error::Configuration(_)
            | Error::RequirementParse(_)
            | Error::PriceOverlayParse(_)
            | Error::DurationParse(_)
            | Error::QuantityParse(_) => ErrorAction::NoRequeue,

            // Already handled terminally by the caller (e.g. GC path)
            Error::NodeClaimNotFound { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_) | Error::Conflict { .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

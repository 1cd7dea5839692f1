//! karpenter-core — the cluster autoscaler's core engine.
//!
//! Observes pending workload demand (via collaborators outside this crate),
//! decides what compute capacity to request from a [`cloudprovider::CloudProvider`],
//! tracks the lifecycle of that capacity through the [`crd::NodeClaim`] state
//! machine, and rolls observed cluster state back into [`crd::NodePool`]
//! status.
//!
//! # Modules
//!
//! - [`resource`]: value types for instance types, offerings, requirements and
//!   resource lists — pure data, no I/O.
//! - [`health`]: the bounded-window NodePool registration-health ring.
//! - [`crd`]: the `NodePool` and `NodeClaim` custom resources.
//! - [`cloudprovider`]: the narrow capability boundary to a concrete provider
//!   driver (EC2, etc — never implemented here).
//! - [`cluster`]: in-memory cache of observed cluster nodes, indexed by
//!   provider-id and name.
//! - [`controllers`]: the reconcile loops wiring the above together.
//! - [`config`]: CLI/environment configuration.
//! - [`error`]: the error taxonomy and its requeue-policy mapping.

pub mod cloudprovider;
pub mod cluster;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod health;
pub mod resource;

pub use cloudprovider::{CloudProvider, DynCloudProvider, SupportedNodeClass};
pub use cluster::Cluster;
pub use config::{Args, Config};
pub use controllers::Context;
pub use crd::{NodeClaim, NodePool};
pub use error::{Error, ErrorAction, Result};
pub use health::NodePoolHealth;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

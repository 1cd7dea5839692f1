//! NodeClaim lifecycle controller.

pub mod conditions;
pub mod lifecycle;

pub use lifecycle::{error_policy, reconcile, run_orphan_gc, select_instance_type_and_offering};

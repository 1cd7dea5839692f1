//! NodePool-facing controllers: registration health, the resource counter,
//! and claim-label hydration.

pub mod counter;
pub mod health_controller;
pub mod hydration;

pub use counter::{error_policy as counter_error_policy, reconcile as counter_reconcile};
pub use health_controller::{error_policy as health_error_policy, reconcile as health_reconcile};
pub use hydration::{error_policy as hydration_error_policy, reconcile as hydration_reconcile};

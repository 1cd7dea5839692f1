//! Shared reconciler context and the `Action`-from-`Error` mapping every
//! controller in this crate uses.

pub mod nodeclaim;
pub mod nodepool;

use kube::runtime::controller::Action;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::cloudprovider::DynCloudProvider;
use crate::cluster::Cluster;
use crate::config::Config;
use crate::error::{Error, ErrorAction};
use crate::health::NodePoolHealth;

/// Shared state every controller's `reconcile`/`error_policy` pair closes
/// over, passed to `Controller::run` as an `Arc`.
pub struct Context {
    pub client: Client,
    pub cloud_provider: DynCloudProvider,
    pub health: Arc<NodePoolHealth>,
    pub cluster: Arc<Cluster>,
    pub config: Arc<Config>,
}

/// Translate an [`Error`]'s requeue policy into a `kube` controller [`Action`].
pub fn action_for_error(error: &Error) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(Duration::from_secs(5)),
        ErrorAction::RequeueAfter(duration) => Action::requeue(duration),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_error_action_variant_without_panicking() {
        let _ = action_for_error(&Error::Configuration("bad".into()));
        let _ = action_for_error(&Error::NodeClassNotReady {
            class: "default".into(),
            reason: "not ready".into(),
        });
        let _ = action_for_error(&Error::Internal("boom".into()));
    }
}

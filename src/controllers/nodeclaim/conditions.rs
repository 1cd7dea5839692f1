//! Condition helpers for the NodeClaim lifecycle state machine.

use chrono::{DateTime, Utc};

use crate::crd::Condition;

/// Build a condition, stamping `last_transition_time` with `now` only when
/// the status actually flips relative to `previous` — holding the original
/// transition time otherwise, matching standard Kubernetes condition
/// semantics.
pub fn transition(
    previous: Option<&Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> Condition {
    let status_str = if status { "True" } else { "False" };
    let last_transition_time = match previous {
        Some(p) if p.status == status_str => p.last_transition_time.or(Some(now)),
        _ => Some(now),
    };
    Condition {
        r#type: type_.to_string(),
        status: status_str.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.into()),
        observed_generation: None,
    }
}

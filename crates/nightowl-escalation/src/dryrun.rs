//! `POST /escalation-policies/:id/dry-run`: the deterministic sequence of
//! notifications the engine would emit, computed without any write or
//! provider call. Target selectors are resolved against current on-call
//! state where a roster links to the policy; otherwise left unresolved.

use chrono::{DateTime, Utc};
use nightowl_core::model::{EscalationPolicy, PlannedNotification, UserRef};
use nightowl_core::Result;
use nightowl_oncall::OnCallService;
use serde::Serialize;

use crate::planner;
use crate::targets::resolve_targets;

#[derive(Debug, Clone, Serialize)]
pub struct DryRunStep {
    #[serde(flatten)]
    pub planned: PlannedNotification,
    pub resolved_targets: Vec<(String, Option<UserRef>)>,
}

pub async fn dry_run(
    oncall: &OnCallService,
    schema: &str,
    policy: &EscalationPolicy,
    elapsed_minutes: f64,
    at: DateTime<Utc>,
) -> Result<Vec<DryRunStep>> {
    let planned = planner::plan(policy, elapsed_minutes);
    let mut steps = Vec::with_capacity(planned.len());
    for notification in planned {
        let resolved = resolve_targets(oncall, schema, policy.id, &notification.targets, at).await?;
        steps.push(DryRunStep {
            planned: notification,
            resolved_targets: resolved.into_iter().map(|(sel, user)| (sel.as_token(), user)).collect(),
        });
    }
    Ok(steps)
}

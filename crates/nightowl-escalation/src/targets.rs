//! Resolves a tier's `TargetSelector` list into concrete user references at
//! dispatch time, for both the live engine and the dry-run endpoint.

use chrono::{DateTime, Utc};
use nightowl_core::model::{TargetSelector, UserRef};
use nightowl_core::Result;
use nightowl_oncall::OnCallService;
use uuid::Uuid;

/// Resolves every selector in `selectors` against the roster tied to
/// `policy_id` (if any). `team_lead` has no backing table in this
/// repository's scope and always resolves to `None`.
pub async fn resolve_targets(
    oncall: &OnCallService,
    schema: &str,
    policy_id: Uuid,
    selectors: &[TargetSelector],
    at: DateTime<Utc>,
) -> Result<Vec<(TargetSelector, Option<UserRef>)>> {
    let roster = oncall.roster_for_policy(schema, policy_id).await?;
    let resolution = match &roster {
        Some(roster) => Some(oncall.resolve_at(schema, roster.id, at).await?),
        None => None,
    };

    let mut resolved = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let user = match selector {
            TargetSelector::OncallPrimary => resolution.as_ref().and_then(|r| r.primary.clone()),
            TargetSelector::OncallSecondary => resolution.as_ref().and_then(|r| r.secondary.clone()),
            TargetSelector::TeamLead => None,
            TargetSelector::User(user_id) => Some(UserRef {
                user_id: *user_id,
                display_name: user_id.to_string(),
                email: String::new(),
            }),
        };
        resolved.push((selector.clone(), user));
    }
    Ok(resolved)
}

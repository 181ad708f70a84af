//! The handoff cron: on a fixed interval, walks every tenant's active
//! rosters and DMs the incoming primary when the computed current shift has
//! rolled over since the last tick. Tracking "did the shift change" is kept
//! in an in-memory map keyed by roster id rather than a new table — a
//! worker restart double-notifies the current occupant at most once, which
//! is an acceptable cost for not growing the schema for a single cron.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nightowl_core::model::{NotifyMethod, Tenant};
use nightowl_db::Database;
use nightowl_notify::{DirectMessage, EscalationMessage, NotifierDispatcher};
use nightowl_oncall::history::upcoming_shifts;
use nightowl_oncall::OnCallService;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How often the cron re-checks every roster for a handoff.
pub const HANDOFF_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct HandoffNotifier {
    db: Arc<Database>,
    oncall: OnCallService,
    notifier: NotifierDispatcher,
    last_notified: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl HandoffNotifier {
    pub fn new(db: Arc<Database>, oncall: OnCallService, notifier: NotifierDispatcher) -> Self {
        Self {
            db,
            oncall,
            notifier,
            last_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Checks every tenant's rosters once. Failures are per-tenant/per-roster
    /// and logged, matching the escalation tick's "never abort the whole
    /// sweep for one bad roster" posture.
    pub async fn check_all_tenants(&self) {
        let tenants = match self.db.list_tenants().await {
            Ok(t) => t,
            Err(err) => {
                tracing::error!(error = %err, "failed to list tenants for handoff cron");
                return;
            }
        };
        for tenant in tenants {
            let schema = tenant.schema_name();
            if let Err(err) = self.check_tenant(&tenant, &schema).await {
                tracing::error!(tenant = %tenant.slug, error = %err, "handoff cron failed for tenant");
            }
        }
    }

    async fn check_tenant(&self, tenant: &Tenant, schema: &str) -> anyhow::Result<()> {
        let rosters = self.oncall.list_active_rosters(schema).await.map_err(|err| anyhow::anyhow!(err))?;
        for roster in rosters {
            let roster_id = roster.id;
            if let Err(err) = self.check_roster(tenant, schema, roster).await {
                tracing::warn!(tenant = %tenant.slug, roster = %roster_id, error = %err, "handoff check failed for roster");
            }
        }
        Ok(())
    }

    async fn check_roster(&self, tenant: &Tenant, schema: &str, roster: nightowl_core::model::Roster) -> anyhow::Result<()> {
        // Each roster (including either half of a follow-the-sun pair) owns
        // its own rotation-position arithmetic independently of its
        // partner's window, so this notifies the member whose position just
        // became current within `roster`'s own schedule.
        let members = self.oncall.members(schema, roster.id).await.map_err(|err| anyhow::anyhow!(err))?;
        let now = Utc::now();
        let Some(current_shift) = upcoming_shifts(&roster, &members, now).into_iter().next() else {
            return Ok(());
        };
        let Some(primary) = &current_shift.primary else {
            return Ok(());
        };

        let mut seen = self.last_notified.lock().await;
        if !shift_changed(seen.get(&roster.id).copied(), current_shift.start_at) {
            return Ok(());
        }
        seen.insert(roster.id, current_shift.start_at);
        drop(seen);

        let escalation_message = EscalationMessage {
            alert_id: Uuid::nil(),
            tier: 0,
            title: format!("On-call handoff: {}", roster.name),
            targets: vec![primary.display_name.clone()],
        };
        let direct_message = DirectMessage {
            alert_id: Uuid::nil(),
            tier: 0,
            text: format!("You are now on-call for \"{}\".", roster.name),
        };
        self.notifier
            .notify(tenant, primary, NotifyMethod::MessagingDm, &escalation_message, &direct_message)
            .await;
        Ok(())
    }
}

/// True when the roster's current shift start differs from the last one
/// this process notified for (or no prior notification is recorded).
fn shift_changed(last: Option<DateTime<Utc>>, current_start: DateTime<Utc>) -> bool {
    last != Some(current_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_always_notifies() {
        assert!(shift_changed(None, Utc::now()));
    }

    #[test]
    fn same_shift_start_does_not_renotify() {
        let start = Utc::now();
        assert!(!shift_changed(Some(start), start));
    }

    #[test]
    fn rollover_to_a_new_shift_notifies() {
        let first = Utc::now();
        let second = first + chrono::Duration::days(7);
        assert!(shift_changed(Some(first), second));
    }
}

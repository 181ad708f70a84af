//! The 30s tick engine: per tenant, per firing unacknowledged alert, advance
//! the escalation tier state machine. A row-level advisory lock on the
//! alert's id serializes a tick against the ack/resolve subscriber in
//! [`crate::subscriber`] so a concurrent ack always wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nightowl_core::model::{EscalationPolicy, NotifyMethod, NotifyResult, Tenant};
use nightowl_core::{NightOwlError, Result};
use nightowl_db::{AlertRow, Database};
use nightowl_notify::NotifierDispatcher;
use nightowl_oncall::OnCallService;
use sqlx::types::Json;
use sqlx::{Connection, Row};
use uuid::Uuid;

use crate::planner;
use crate::targets::resolve_targets;

/// Ticks are issued every 30s.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: Uuid,
    name: String,
    tiers: Json<Vec<nightowl_core::model::EscalationTier>>,
    repeat_count: i32,
}

impl From<PolicyRow> for EscalationPolicy {
    fn from(row: PolicyRow) -> Self {
        EscalationPolicy {
            id: row.id,
            name: row.name,
            tiers: row.tiers.0,
            repeat_count: row.repeat_count,
        }
    }
}

pub struct EscalationEngine {
    db: Arc<Database>,
    oncall: OnCallService,
    notifier: NotifierDispatcher,
}

impl EscalationEngine {
    pub fn new(db: Arc<Database>, oncall: OnCallService, notifier: NotifierDispatcher) -> Self {
        Self { db, oncall, notifier }
    }

    /// Runs one tick across every tenant, in slug order. A failure
    /// processing one tenant or one alert is logged and does not stop the
    /// others — the next tick naturally retries from `current_escalation_tier`.
    pub async fn tick_all_tenants(&self) {
        let tenants = match self.db.list_tenants().await {
            Ok(t) => t,
            Err(err) => {
                tracing::error!(error = %err, "failed to list tenants for escalation tick");
                return;
            }
        };
        for tenant in tenants {
            let schema = tenant.schema_name();
            if let Err(err) = self.tick_tenant(&tenant, &schema).await {
                tracing::error!(tenant = %tenant.slug, error = %err, "escalation tick failed for tenant");
            }
        }
    }

    async fn tick_tenant(&self, tenant: &Tenant, schema: &str) -> Result<()> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let candidates = sqlx::query_as::<_, AlertRow>(
            "SELECT id, fingerprint, status, severity, source, title, description, labels, annotations, \
             service_id, matched_incident_id, suggested_solution, first_fired_at, last_fired_at, \
             occurrence_count, acknowledged_by, acknowledged_at, resolved_by, resolved_at, \
             resolved_by_agent, agent_resolution_notes, escalation_policy_id, current_escalation_tier \
             FROM alerts \
             WHERE status = 'firing' AND acknowledged_at IS NULL AND escalation_policy_id IS NOT NULL",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        for row in candidates {
            if let Err(err) = self.tick_alert(tenant, schema, row).await {
                tracing::error!(tenant = %tenant.slug, error = %err, "escalation tick failed for alert");
            }
        }
        Ok(())
    }

    async fn tick_alert(&self, tenant: &Tenant, schema: &str, row: AlertRow) -> Result<()> {
        let alert_id = row.id;
        let policy_id = row.escalation_policy_id.expect("filtered by query");

        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let mut tx = conn.begin().await.map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        // Serializes against the ack/resolve subscriber for the lifetime of
        // this transaction; released automatically on commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(alert_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        // Re-read under the lock: the subscriber may have acked/resolved
        // this alert between the candidate SELECT and here.
        let current = sqlx::query("SELECT acknowledged_at, current_escalation_tier FROM alerts WHERE id = $1 FOR UPDATE")
            .bind(alert_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        let Some(current) = current else {
            return Ok(());
        };
        let acknowledged_at: Option<chrono::DateTime<Utc>> = current.try_get("acknowledged_at").ok();
        let current_tier: i32 = current.try_get("current_escalation_tier").unwrap_or(0);
        if acknowledged_at.is_some() || current_tier < 0 {
            return Ok(());
        }

        let policy_row = sqlx::query_as::<_, PolicyRow>("SELECT id, name, tiers, repeat_count FROM escalation_policies WHERE id = $1")
            .bind(policy_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        let Some(policy_row) = policy_row else {
            tx.commit().await.map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
            return Ok(());
        };
        let policy: EscalationPolicy = policy_row.into();

        let cycle_base = repeat_cycle_base(&mut tx, alert_id).await?;
        let elapsed_minutes = (Utc::now() - cycle_base).num_seconds() as f64 / 60.0;
        let due_tiers = planner::newly_due_tiers(&policy, current_tier, elapsed_minutes);
        if due_tiers.is_empty() {
            tx.commit().await.map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
            return Ok(());
        }

        for tier_number in &due_tiers {
            let tier = policy.tier(*tier_number).expect("due tier exists in policy");
            let resolved_targets = resolve_targets(&self.oncall, schema, policy.id, &tier.targets, Utc::now()).await?;

            for method in &tier.notify_via {
                self.notify_tier(&mut tx, tenant, alert_id, &policy, *tier_number, *method, &resolved_targets).await?;
            }

            sqlx::query("UPDATE alerts SET current_escalation_tier = $1 WHERE id = $2")
                .bind(*tier_number)
                .bind(alert_id)
                .execute(&mut *tx)
                .await
                .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        }

        if let Some(&last_tier) = due_tiers.last() {
            if planner::is_final_tier(&policy, last_tier) {
                let repeats_used = count_repeat_cycles(&mut tx, alert_id).await?;
                if repeats_used < policy.repeat_count {
                    mark_repeat_cycle(&mut tx, alert_id, policy_id, last_tier).await?;
                }
            }
        }

        tx.commit().await.map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        Ok(())
    }

    async fn notify_tier(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tenant: &Tenant,
        alert_id: Uuid,
        policy: &EscalationPolicy,
        tier_number: i32,
        method: NotifyMethod,
        resolved_targets: &[(nightowl_core::model::TargetSelector, Option<nightowl_core::model::UserRef>)],
    ) -> Result<()> {
        use nightowl_notify::{DirectMessage, EscalationMessage};

        let target_names: Vec<String> = resolved_targets
            .iter()
            .map(|(sel, user)| user.as_ref().map(|u| u.display_name.clone()).unwrap_or_else(|| sel.as_token()))
            .collect();
        let escalation_message = EscalationMessage {
            alert_id,
            tier: tier_number,
            title: format!("tier {tier_number} escalation"),
            targets: target_names,
        };

        let method_requires_user = matches!(method, NotifyMethod::MessagingDm | NotifyMethod::Phone | NotifyMethod::Sms);
        if method_requires_user {
            for (selector, user) in resolved_targets {
                let Some(user) = user else { continue };
                let direct_message = DirectMessage {
                    alert_id,
                    tier: tier_number,
                    text: format!("[tier {tier_number}] {}", escalation_message.title),
                };
                let result = self.notifier.notify(tenant, user, method, &escalation_message, &direct_message).await;
                self.record_event(tx, alert_id, policy.id, tier_number, Some(user.user_id), method, result, selector).await?;
            }
        } else {
            let direct_message = DirectMessage {
                alert_id,
                tier: tier_number,
                text: escalation_message.title.clone(),
            };
            // messaging_channel has no single target user; dispatch once per tier.
            let placeholder = nightowl_core::model::UserRef {
                user_id: Uuid::nil(),
                display_name: String::new(),
                email: String::new(),
            };
            let result = self.notifier.notify(tenant, &placeholder, method, &escalation_message, &direct_message).await;
            self.record_event(tx, alert_id, policy.id, tier_number, None, method, result, &nightowl_core::model::TargetSelector::TeamLead)
                .await?;
        }
        Ok(())
    }

    async fn record_event(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        alert_id: Uuid,
        policy_id: Uuid,
        tier: i32,
        target_user_id: Option<Uuid>,
        method: NotifyMethod,
        result: NotifyResult,
        selector: &nightowl_core::model::TargetSelector,
    ) -> Result<()> {
        let detail = serde_json::json!({ "target_selector": selector.as_token() });
        sqlx::query(
            "INSERT INTO escalation_events (alert_id, policy_id, tier, action, target_user_id, notify_method, notify_result, detail) \
             VALUES ($1, $2, $3, 'notified', $4, $5, $6, $7)",
        )
        .bind(alert_id)
        .bind(policy_id)
        .bind(tier)
        .bind(target_user_id)
        .bind(method_token(method))
        .bind(result)
        .bind(detail)
        .execute(&mut **tx)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        Ok(())
    }
}

fn method_token(method: NotifyMethod) -> &'static str {
    match method {
        NotifyMethod::MessagingDm => "messaging_dm",
        NotifyMethod::MessagingChannel => "messaging_channel",
        NotifyMethod::Phone => "phone",
        NotifyMethod::Sms => "sms",
    }
}

/// The repeat-cycle base time: `first_fired_at` unless the last
/// `escalation_events` row carries a `repeat_reset_at` marker, in which
/// case elapsed time is measured from there instead.
async fn repeat_cycle_base(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, alert_id: Uuid) -> Result<chrono::DateTime<Utc>> {
    let marker = sqlx::query(
        "SELECT detail->>'repeat_reset_at' AS reset_at FROM escalation_events \
         WHERE alert_id = $1 AND detail ? 'repeat_reset_at' \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(alert_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

    if let Some(row) = marker {
        if let Ok(Some(reset_at)) = row.try_get::<Option<String>, _>("reset_at") {
            if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(&reset_at) {
                return Ok(parsed.with_timezone(&Utc));
            }
        }
    }

    let first_fired: chrono::DateTime<Utc> = sqlx::query("SELECT first_fired_at FROM alerts WHERE id = $1")
        .bind(alert_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .try_get("first_fired_at")
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(first_fired)
}

/// How many repeat cycles this alert has already consumed, i.e. how many
/// `repeat_reset_at` markers its `escalation_events` already carry. Bounds
/// `mark_repeat_cycle` to exactly `policy.repeat_count` re-executions of the
/// ladder, matching the state machine's "if repeat_count > 0: decrement …
/// else terminal" (the decrement is realized here as a count against the
/// policy's constant `repeat_count`, rather than mutating it).
async fn count_repeat_cycles(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, alert_id: Uuid) -> Result<i32> {
    let count: i64 = sqlx::query(
        "SELECT count(*) AS n FROM escalation_events WHERE alert_id = $1 AND detail ? 'repeat_reset_at'",
    )
    .bind(alert_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
    .try_get("n")
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(count as i32)
}

async fn mark_repeat_cycle(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, alert_id: Uuid, policy_id: Uuid, last_tier: i32) -> Result<()> {
    let detail = serde_json::json!({ "repeat_reset_at": Utc::now().to_rfc3339() });
    sqlx::query(
        "INSERT INTO escalation_events (alert_id, policy_id, tier, action, detail) \
         VALUES ($1, $2, $3, 'notified', $4)",
    )
    .bind(alert_id)
    .bind(policy_id)
    .bind(last_tier)
    .bind(detail)
    .execute(&mut **tx)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

    sqlx::query("UPDATE alerts SET current_escalation_tier = 0 WHERE id = $1")
        .bind(alert_id)
        .execute(&mut **tx)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(())
}

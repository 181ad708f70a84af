//! Acknowledge and resolve transitions: the two alert state changes that
//! originate outside the ingestion pipeline (an operator or the API) but
//! still need to publish on the lifecycle channels so escalation can react.

use std::sync::Arc;

use chrono::Utc;
use nightowl_audit::AuditWriter;
use nightowl_bus::{EventBus, LifecycleAction, LifecycleEvent};
use nightowl_core::model::{Actor, Alert};
use nightowl_core::{NightOwlError, Result};
use nightowl_db::{AlertRow, Database};
use serde_json::json;
use uuid::Uuid;

pub struct AlertLifecycle {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    audit: AuditWriter,
}

impl AlertLifecycle {
    pub fn new(db: Arc<Database>, bus: Arc<EventBus>, audit: AuditWriter) -> Self {
        Self { db, bus, audit }
    }

    /// Acknowledges an alert. Idempotent in the sense that re-acknowledging
    /// an already-acknowledged alert is a conflict, not a silent no-op — the
    /// caller needs to know whether their click was the one that mattered.
    pub async fn acknowledge(&self, tenant_slug: &str, schema: &str, alert_id: Uuid, actor: Actor) -> Result<Alert> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let row = sqlx::query_as::<_, AlertRow>(
            "UPDATE alerts SET status = 'acknowledged', acknowledged_by = $2, acknowledged_at = $3 \
             WHERE id = $1 AND status = 'firing' \
             RETURNING *",
        )
        .bind(alert_id)
        .bind(actor_user_id(&actor))
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        let Some(row) = row else {
            return Err(NightOwlError::Conflict(format!("alert {alert_id} is not in a state that can be acknowledged")));
        };
        let alert: Alert = row.into();

        self.publish(tenant_slug, alert_id, LifecycleAction::Ack).await;
        self.audit.record_system(
            schema.to_string(),
            "alert.acknowledged",
            "alert",
            alert_id.to_string(),
            json!({}),
        );
        Ok(alert)
    }

    /// Resolves an alert from any non-resolved status.
    pub async fn resolve(&self, tenant_slug: &str, schema: &str, alert_id: Uuid, actor: Actor) -> Result<Alert> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let row = sqlx::query_as::<_, AlertRow>(
            "UPDATE alerts SET status = 'resolved', resolved_by = $2, resolved_at = $3 \
             WHERE id = $1 AND status != 'resolved' \
             RETURNING *",
        )
        .bind(alert_id)
        .bind(actor_user_id(&actor))
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        let Some(row) = row else {
            return Err(NightOwlError::Conflict(format!("alert {alert_id} is already resolved")));
        };
        let alert: Alert = row.into();

        self.publish(tenant_slug, alert_id, LifecycleAction::Resolved).await;
        self.audit.record_system(
            schema.to_string(),
            "alert.resolved",
            "alert",
            alert_id.to_string(),
            json!({}),
        );
        Ok(alert)
    }

    async fn publish(&self, tenant_slug: &str, alert_id: Uuid, action: LifecycleAction) {
        let event = LifecycleEvent {
            tenant: tenant_slug.to_string(),
            alert_id,
            action,
            at: Utc::now(),
        };
        if let Err(err) = self.bus.publish_lifecycle(&event).await {
            tracing::warn!(alert_id = %alert_id, ?action, error = %err, "failed to publish lifecycle event");
        }
    }
}

fn actor_user_id(actor: &Actor) -> Option<Uuid> {
    match actor {
        Actor::User(id) => Some(*id),
        Actor::ApiKey(_) | Actor::System => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_api_key_actors_have_no_user_id() {
        assert_eq!(actor_user_id(&Actor::System), None);
        assert_eq!(actor_user_id(&Actor::ApiKey(Uuid::nil())), None);
    }

    #[test]
    fn user_actor_carries_its_id() {
        let id = Uuid::new_v4();
        assert_eq!(actor_user_id(&Actor::User(id)), Some(id));
    }
}

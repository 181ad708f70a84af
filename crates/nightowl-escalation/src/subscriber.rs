//! Subscribes to `nightowl:alert:ack` and `nightowl:alert:resolved`,
//! cancelling escalation for the affected alert as each message arrives.
//!
//! Runs as two long-lived tasks (one per channel) alongside the tick loop,
//! communicating with it only through the `alerts` table and a row-level
//! advisory lock — never through an in-memory channel — so either side can
//! restart independently and recovery is just "re-read the row".

use std::sync::Arc;

use futures::StreamExt;
use nightowl_bus::{EventBus, LifecycleAction, LifecycleEvent, CHANNEL_ACK, CHANNEL_RESOLVED};
use nightowl_core::model::EscalationAction;
use nightowl_db::Database;
use sqlx::{Connection, Row};

pub struct AckResolveSubscriber {
    bus: Arc<EventBus>,
    db: Arc<Database>,
}

impl AckResolveSubscriber {
    pub fn new(bus: Arc<EventBus>, db: Arc<Database>) -> Self {
        Self { bus, db }
    }

    /// Spawns the ack and resolved listener tasks. Each reconnects and
    /// resumes silently on a transient subscribe failure; a message that
    /// fails to process is logged and dropped — the next tick will have
    /// already observed `acknowledged_at` directly if the failure was
    /// ours, and a missed cancellation is merely a delayed one since the
    /// alert's own state is authoritative, not this subscription.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().run(CHANNEL_ACK, EscalationAction::Acknowledged)),
            tokio::spawn(self.run(CHANNEL_RESOLVED, EscalationAction::Resolved)),
        ]
    }

    async fn run(self: Arc<Self>, channel: &'static str, action: EscalationAction) {
        loop {
            match self.bus.subscribe(channel).await {
                Ok(mut pubsub) => {
                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(err) => {
                                tracing::warn!(channel, error = %err, "failed to read pubsub payload");
                                continue;
                            }
                        };
                        if let Err(err) = self.handle(&payload, action).await {
                            tracing::error!(channel, error = %err, "failed to process ack/resolve event");
                        }
                    }
                    tracing::warn!(channel, "pubsub stream ended, resubscribing");
                }
                Err(err) => {
                    tracing::error!(channel, error = %err, "failed to subscribe, retrying in 1s");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle(&self, payload: &str, action: EscalationAction) -> anyhow::Result<()> {
        let event: LifecycleEvent = serde_json::from_str(payload)?;
        debug_assert!(matches!(event.action, LifecycleAction::Ack | LifecycleAction::Resolved));
        let schema = format!("tenant_{}", event.tenant);

        let mut conn = self.db.acquire_for_tenant(&schema).await.map_err(|err| anyhow::anyhow!(err))?;
        let mut tx = conn.begin().await?;

        // Same advisory lock key the tick loop takes, so a tick that is
        // mid-advance for this alert finishes (and is immediately
        // superseded below) rather than racing this update.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(event.alert_id.to_string())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT escalation_policy_id, current_escalation_tier FROM alerts WHERE id = $1 FOR UPDATE")
            .bind(event.alert_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(());
        };
        let policy_id: Option<uuid::Uuid> = row.try_get("escalation_policy_id")?;
        let current_tier: i32 = row.try_get("current_escalation_tier")?;
        if current_tier < 0 {
            // Already cancelled by an earlier delivery of this at-least-once
            // event; idempotent by (alert_id, action).
            tx.commit().await?;
            return Ok(());
        }

        sqlx::query("UPDATE alerts SET current_escalation_tier = -1 WHERE id = $1")
            .bind(event.alert_id)
            .execute(&mut *tx)
            .await?;

        if let Some(policy_id) = policy_id {
            sqlx::query(
                "INSERT INTO escalation_events (alert_id, policy_id, tier, action) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(event.alert_id)
            .bind(policy_id)
            .bind(current_tier)
            .bind(action)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

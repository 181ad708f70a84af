//! Redis pub/sub wrapper for the three alert lifecycle channels.
//!
//! Publication uses the shared multiplexed connection manager; subscription
//! opens its own dedicated connection per channel, matching the resource
//! model's "Redis client: shared, multiplexed. Subscriptions use dedicated
//! connections" rule.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CHANNEL_FIRE: &str = "nightowl:alert:fire";
pub const CHANNEL_ACK: &str = "nightowl:alert:ack";
pub const CHANNEL_RESOLVED: &str = "nightowl:alert:resolved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Fire,
    Ack,
    Resolved,
}

impl LifecycleAction {
    pub fn channel(&self) -> &'static str {
        match self {
            LifecycleAction::Fire => CHANNEL_FIRE,
            LifecycleAction::Ack => CHANNEL_ACK,
            LifecycleAction::Resolved => CHANNEL_RESOLVED,
        }
    }
}

/// The compact payload published on every channel. Subscribers key
/// idempotency off `(alert_id, action)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub tenant: String,
    pub alert_id: Uuid,
    pub action: LifecycleAction,
    pub at: DateTime<Utc>,
}

/// A fire event additionally carries severity/fingerprint so subscribers
/// driving the escalation engine don't need a round-trip to Postgres just
/// to learn what fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireEvent {
    pub event: &'static str,
    pub tenant: String,
    pub alert_id: Uuid,
    pub severity: String,
    pub fingerprint: String,
}

#[derive(Clone)]
pub struct EventBus {
    client: Client,
    manager: ConnectionManager,
}

impl EventBus {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }

    /// Publishes the generic lifecycle envelope on the channel matching
    /// `event.action`. Called after the triggering transaction commits:
    /// delivery is at-least-once, never exactly-once.
    pub async fn publish_lifecycle(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(event.action.channel(), payload).await?;
        Ok(())
    }

    /// Publishes the richer `alert.fired` payload on the fire channel.
    pub async fn publish_fire(&self, event: &FireEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(CHANNEL_FIRE, payload).await?;
        Ok(())
    }

    /// Opens a dedicated connection subscribed to `channel`. Each call
    /// opens a fresh connection: callers should hold one subscription task
    /// per channel for the process lifetime.
    pub async fn subscribe(&self, channel: &str) -> anyhow::Result<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    /// Liveness probe for `/readyz`: round-trips `PING` on the shared
    /// connection manager.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_maps_to_documented_channel_names() {
        assert_eq!(LifecycleAction::Fire.channel(), "nightowl:alert:fire");
        assert_eq!(LifecycleAction::Ack.channel(), "nightowl:alert:ack");
        assert_eq!(LifecycleAction::Resolved.channel(), "nightowl:alert:resolved");
    }

    #[test]
    fn lifecycle_event_serializes_to_compact_json() {
        let event = LifecycleEvent {
            tenant: "acme".into(),
            alert_id: Uuid::nil(),
            action: LifecycleAction::Ack,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tenant"], "acme");
        assert_eq!(json["action"], "ack");
    }
}

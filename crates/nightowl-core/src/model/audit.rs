use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Actor {
    User(Uuid),
    ApiKey(Uuid),
    System,
}

/// One append-only audit row. Produced by any state-changing action and
/// delivered to `nightowl-audit`'s bounded queue rather than written
/// synchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: Actor,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub detail: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: Actor,
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            actor,
            action: action.into(),
            resource: resource.into(),
            resource_id: resource_id.into(),
            detail,
            ip: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }
}

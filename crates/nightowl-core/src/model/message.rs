use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "chat_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatProviderKind {
    Slack,
    Mattermost,
    None,
}

/// Binds an alert (or incident) to an externally-posted chat message,
/// enabling status-update edits instead of repeat posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMapping {
    pub alert_id: Uuid,
    pub provider: ChatProviderKind,
    pub channel_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
}

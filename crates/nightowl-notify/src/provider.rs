//! The provider capability set from the notifier dispatcher responsibility:
//! a fixed set of operations every chat provider exposes, and a much
//! smaller set for telephony. Represented as trait objects (dynamic
//! dispatch over a fixed capability set), not an enum, because a tenant can
//! plug in either of two concrete chat implementations and the dispatcher
//! should not need to match on which.

use async_trait::async_trait;
use nightowl_core::model::UserRef;
use serde::{Deserialize, Serialize};

/// Provider-specific reference to a previously-posted message, recorded in
/// `message_mappings` so later status transitions can edit it in place
/// instead of posting a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMessage {
    pub alert_id: uuid::Uuid,
    pub title: String,
    pub severity: String,
    pub status: String,
    pub description: String,
    pub suggested_solution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationMessage {
    pub alert_id: uuid::Uuid,
    pub tier: i32,
    pub title: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub alert_id: uuid::Uuid,
    pub tier: i32,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned an error: {0}")]
    Upstream(String),
    #[error("target user has no address on this provider")]
    NoAddress,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// `PostAlert`/`UpdateAlert`/`PostEscalation`/`SendDM`/`LookupUser` from the
/// notifier dispatcher's provider capability set.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn post_alert(&self, message: &AlertMessage) -> ProviderResult<MessageRef>;
    async fn update_alert(&self, message_ref: &MessageRef, message: &AlertMessage) -> ProviderResult<()>;
    async fn post_escalation(&self, message: &EscalationMessage) -> ProviderResult<MessageRef>;
    async fn send_dm(&self, user: &UserRef, message: &DirectMessage) -> ProviderResult<MessageRef>;
    async fn lookup_user(&self, email: &str) -> ProviderResult<Option<UserRef>>;
}

#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn call(&self, user: &UserRef, message: &str) -> ProviderResult<()>;
    async fn sms(&self, user: &UserRef, message: &str) -> ProviderResult<()>;
}

/// The `none` chat provider: a no-op stub used when a tenant has not
/// configured a messaging integration.
pub struct NoopChatProvider;

#[async_trait]
impl ChatProvider for NoopChatProvider {
    async fn post_alert(&self, message: &AlertMessage) -> ProviderResult<MessageRef> {
        Ok(MessageRef {
            channel_id: "noop".into(),
            message_id: message.alert_id.to_string(),
            thread_id: None,
        })
    }

    async fn update_alert(&self, _message_ref: &MessageRef, _message: &AlertMessage) -> ProviderResult<()> {
        Ok(())
    }

    async fn post_escalation(&self, message: &EscalationMessage) -> ProviderResult<MessageRef> {
        Ok(MessageRef {
            channel_id: "noop".into(),
            message_id: format!("{}-tier{}", message.alert_id, message.tier),
            thread_id: None,
        })
    }

    async fn send_dm(&self, user: &UserRef, message: &DirectMessage) -> ProviderResult<MessageRef> {
        Ok(MessageRef {
            channel_id: user.user_id.to_string(),
            message_id: format!("{}-tier{}", message.alert_id, message.tier),
            thread_id: None,
        })
    }

    async fn lookup_user(&self, _email: &str) -> ProviderResult<Option<UserRef>> {
        Ok(None)
    }
}

/// Telephony falls back to this no-op when a tenant has not configured a
/// telephony integration.
pub struct NoopTelephonyProvider;

#[async_trait]
impl TelephonyProvider for NoopTelephonyProvider {
    async fn call(&self, _user: &UserRef, _message: &str) -> ProviderResult<()> {
        Ok(())
    }

    async fn sms(&self, _user: &UserRef, _message: &str) -> ProviderResult<()> {
        Ok(())
    }
}

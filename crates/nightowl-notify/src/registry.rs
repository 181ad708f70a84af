//! Tenant-scoped provider registry: returns the one configured messaging
//! provider (`slack`, `mattermost`, or `none`) plus an optional telephony
//! provider, re-reading `tenants.config` on every call rather than caching
//! it in a mutable global — the hot-reload mechanism named in the design
//! notes.

use std::sync::Arc;

use nightowl_core::crypto::SecretKey;
use nightowl_core::model::{ChatProviderKind, Tenant};

use crate::provider::{ChatProvider, NoopChatProvider, NoopTelephonyProvider, TelephonyProvider};
use crate::slack::SlackProvider;

#[derive(Clone)]
pub struct ProviderRegistry {
    secret_key: SecretKey,
}

impl ProviderRegistry {
    pub fn new(secret_key: SecretKey) -> Self {
        Self { secret_key }
    }

    /// Builds the chat provider configured for `tenant`. Falls back to the
    /// no-op provider on missing/unparseable configuration rather than
    /// failing the caller — a misconfigured chat integration must not block
    /// ingestion or escalation.
    pub fn chat_provider(&self, tenant: &Tenant) -> Arc<dyn ChatProvider> {
        let Some(chat_config) = tenant.config.get("chat") else {
            return Arc::new(NoopChatProvider);
        };
        let kind = chat_config
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or("none");
        match kind {
            "slack" => self.build_slack(chat_config).unwrap_or_else(|err| {
                tracing::warn!(tenant = %tenant.slug, error = %err, "falling back to no-op chat provider");
                Arc::new(NoopChatProvider)
            }),
            "mattermost" => {
                tracing::warn!(tenant = %tenant.slug, "mattermost provider not implemented, falling back to no-op");
                Arc::new(NoopChatProvider)
            }
            _ => Arc::new(NoopChatProvider),
        }
    }

    fn build_slack(&self, chat_config: &serde_json::Value) -> anyhow::Result<Arc<dyn ChatProvider>> {
        let encrypted_token = chat_config
            .get("bot_token_encrypted")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing bot_token_encrypted"))?;
        let channel = chat_config
            .get("default_channel")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing default_channel"))?;
        let token_bytes = self.secret_key.decrypt(encrypted_token)?;
        let token = String::from_utf8(token_bytes)?;
        Ok(Arc::new(SlackProvider::new(token, channel)))
    }

    /// Telephony falls back to a no-op whenever not configured; this
    /// repository ships no concrete telephony vendor.
    pub fn telephony_provider(&self, _tenant: &Tenant) -> Arc<dyn TelephonyProvider> {
        Arc::new(NoopTelephonyProvider)
    }

    pub fn kind_for(&self, tenant: &Tenant) -> ChatProviderKind {
        match tenant.config.get("chat").and_then(|c| c.get("kind")).and_then(|v| v.as_str()) {
            Some("slack") => ChatProviderKind::Slack,
            Some("mattermost") => ChatProviderKind::Mattermost,
            _ => ChatProviderKind::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn secret_key() -> SecretKey {
        SecretKey::from_hex(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn defaults_to_noop_when_unconfigured() {
        let registry = ProviderRegistry::new(secret_key());
        let tenant = Tenant {
            id: Uuid::new_v4(),
            slug: "acme".into(),
            name: "Acme".into(),
            config: serde_json::json!({}),
        };
        assert_eq!(registry.kind_for(&tenant), ChatProviderKind::None);
        let _ = registry.chat_provider(&tenant);
    }

    #[test]
    fn falls_back_to_noop_on_decryption_failure() {
        let registry = ProviderRegistry::new(secret_key());
        let tenant = Tenant {
            id: Uuid::new_v4(),
            slug: "acme".into(),
            name: "Acme".into(),
            config: serde_json::json!({
                "chat": { "kind": "slack", "bot_token_encrypted": "not-valid-hex", "default_channel": "C1" }
            }),
        };
        // Should not panic; falls back to no-op internally.
        let _ = registry.chat_provider(&tenant);
    }

    #[test]
    fn recognises_configured_slack_kind() {
        let registry = ProviderRegistry::new(secret_key());
        let encrypted = secret_key().encrypt(b"xoxb-token").unwrap();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            slug: "acme".into(),
            name: "Acme".into(),
            config: serde_json::json!({
                "chat": { "kind": "slack", "bot_token_encrypted": encrypted, "default_channel": "C1" }
            }),
        };
        assert_eq!(registry.kind_for(&tenant), ChatProviderKind::Slack);
    }
}

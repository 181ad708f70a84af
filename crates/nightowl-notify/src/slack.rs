//! An illustrative chat-ops integration shaped after Slack's `chat.postMessage`
//! API, complete enough to compile and to be exercised against a mock HTTP
//! server in tests. Not a production Slack SDK —
//! `base_url` is overridable specifically so tests never reach the real API.

use async_trait::async_trait;
use nightowl_core::model::UserRef;
use serde::Deserialize;
use std::time::Duration;

use crate::provider::{AlertMessage, ChatProvider, DirectMessage, EscalationMessage, MessageRef, ProviderError, ProviderResult};

const DEFAULT_BASE_URL: &str = "https://slack.com/api";
/// Per-provider call timeout from the concurrency model: chat 3s.
const CHAT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SlackProvider {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    default_channel: String,
}

impl SlackProvider {
    pub fn new(bot_token: impl Into<String>, default_channel: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(CHAT_TIMEOUT).build().unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            bot_token: bot_token.into(),
            default_channel: default_channel.into(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(bot_token: impl Into<String>, default_channel: impl Into<String>, base_url: impl Into<String>) -> Self {
        let mut provider = Self::new(bot_token, default_channel);
        provider.base_url = base_url.into();
        provider
    }

    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> ProviderResult<MessageRef> {
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| if err.is_timeout() { ProviderError::Timeout } else { ProviderError::Upstream(err.to_string()) })?;

        let parsed: SlackPostResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Upstream(format!("invalid slack response: {err}")))?;

        if !parsed.ok {
            return Err(ProviderError::Upstream(parsed.error.unwrap_or_else(|| "unknown slack error".into())));
        }
        Ok(MessageRef {
            channel_id: parsed.channel.unwrap_or_else(|| channel.to_string()),
            message_id: parsed.ts.unwrap_or_default(),
            thread_id: thread_ts.map(str::to_string),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SlackPostResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
}

#[async_trait]
impl ChatProvider for SlackProvider {
    async fn post_alert(&self, message: &AlertMessage) -> ProviderResult<MessageRef> {
        let text = format!("[{}] {}: {}", message.severity, message.title, message.description);
        self.post_message(&self.default_channel, &text, None).await
    }

    async fn update_alert(&self, message_ref: &MessageRef, message: &AlertMessage) -> ProviderResult<()> {
        let text = format!("[{}] {}: {}", message.status, message.title, message.description);
        self.post_message(&message_ref.channel_id, &text, message_ref.thread_id.as_deref())
            .await
            .map(|_| ())
    }

    async fn post_escalation(&self, message: &EscalationMessage) -> ProviderResult<MessageRef> {
        let text = format!("Escalation tier {}: {} (targets: {})", message.tier, message.title, message.targets.join(", "));
        self.post_message(&self.default_channel, &text, None).await
    }

    async fn send_dm(&self, user: &UserRef, message: &DirectMessage) -> ProviderResult<MessageRef> {
        self.post_message(&user.user_id.to_string(), &message.text, None).await
    }

    async fn lookup_user(&self, email: &str) -> ProviderResult<Option<UserRef>> {
        let response = self
            .client
            .get(format!("{}/users.lookupByEmail", self.base_url))
            .bearer_auth(&self.bot_token)
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|err| if err.is_timeout() { ProviderError::Timeout } else { ProviderError::Upstream(err.to_string()) })?;
        let parsed: SlackUserLookupResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Upstream(format!("invalid slack response: {err}")))?;
        if !parsed.ok {
            return Ok(None);
        }
        Ok(parsed.user.map(|u| UserRef {
            user_id: uuid::Uuid::new_v4(),
            display_name: u.real_name.unwrap_or(u.id),
            email: email.to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct SlackUserLookupResponse {
    ok: bool,
    user: Option<SlackUser>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    real_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn post_alert_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "channel": "C123",
                "ts": "1700000000.000100"
            })))
            .mount(&server)
            .await;

        let provider = SlackProvider::with_base_url("xoxb-test", "C123", server.uri());
        let message_ref = provider
            .post_alert(&AlertMessage {
                alert_id: uuid::Uuid::new_v4(),
                title: "Pod crash loop".into(),
                severity: "critical".into(),
                status: "firing".into(),
                description: "restarting repeatedly".into(),
                suggested_solution: None,
            })
            .await
            .unwrap();
        assert_eq!(message_ref.channel_id, "C123");
        assert_eq!(message_ref.message_id, "1700000000.000100");
    }

    #[tokio::test]
    async fn slack_error_surfaces_as_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "channel_not_found"
            })))
            .mount(&server)
            .await;

        let provider = SlackProvider::with_base_url("xoxb-test", "C123", server.uri());
        let err = provider
            .post_alert(&AlertMessage {
                alert_id: uuid::Uuid::new_v4(),
                title: "t".into(),
                severity: "warning".into(),
                status: "firing".into(),
                description: "d".into(),
                suggested_solution: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Upstream(_)));
    }
}

//! Routes a tier action `(alert, tier, method, target)` to a provider call
//! and persists the resulting message reference. The one retry-on-timeout
//! policy here is the only internal retry anywhere in the system —
//! ingestion and the escalation engine both retry nothing.

use std::sync::Arc;
use std::time::Duration;

use nightowl_core::model::{ChatProviderKind, NotifyMethod, NotifyResult, Tenant, UserRef};
use nightowl_db::Database;
use tracing::warn;

use crate::mappings::MessageMappingRepo;
use crate::provider::{AlertMessage, DirectMessage, EscalationMessage, ProviderError, ProviderResult};
use crate::registry::ProviderRegistry;

/// Backoff between the first attempt and the single retry on a transient
/// network error.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct NotifierDispatcher {
    registry: ProviderRegistry,
    db: Arc<Database>,
}

impl NotifierDispatcher {
    pub fn new(registry: ProviderRegistry, db: Arc<Database>) -> Self {
        Self { registry, db }
    }

    /// Posts the first chat message for an alert, or edits the existing one
    /// in place if `message_mappings` already has a reference for it.
    pub async fn post_or_update_alert(&self, tenant: &Tenant, schema: &str, message: &AlertMessage) -> ProviderResult<()> {
        let provider = self.registry.chat_provider(tenant);
        let kind = self.registry.kind_for(tenant);
        let repo = MessageMappingRepo::new(&self.db);
        let existing = repo
            .find(schema, message.alert_id, kind)
            .await
            .map_err(|err| ProviderError::Upstream(err.to_string()))?;

        match existing {
            Some(message_ref) => with_retry(|| provider.update_alert(&message_ref, message)).await,
            None => {
                let message_ref = with_retry(|| provider.post_alert(message)).await?;
                repo.record(schema, message.alert_id, kind, &message_ref)
                    .await
                    .map_err(|err| ProviderError::Upstream(err.to_string()))?;
                Ok(())
            }
        }
    }

    /// Dispatches one tier notification. Returns the outcome rather than an
    /// `Err` for provider failures — the escalation engine records
    /// `notify_result = failed` and still advances the tier.
    pub async fn notify(
        &self,
        tenant: &Tenant,
        target: &UserRef,
        method: NotifyMethod,
        escalation_message: &EscalationMessage,
        direct_message: &DirectMessage,
    ) -> NotifyResult {
        let chat = self.registry.chat_provider(tenant);
        let telephony = self.registry.telephony_provider(tenant);

        let outcome = match method {
            NotifyMethod::MessagingDm => with_retry(|| chat.send_dm(target, direct_message)).await.map(|_| ()),
            NotifyMethod::MessagingChannel => with_retry(|| chat.post_escalation(escalation_message)).await.map(|_| ()),
            NotifyMethod::Phone => with_retry(|| telephony.call(target, &direct_message.text)).await,
            NotifyMethod::Sms => with_retry(|| telephony.sms(target, &direct_message.text)).await,
        };

        match outcome {
            Ok(()) => NotifyResult::Sent,
            Err(err) => {
                warn!(alert_id = %escalation_message.alert_id, tier = escalation_message.tier, method = ?method, error = %err, "notifier dispatch failed");
                NotifyResult::Failed
            }
        }
    }

    pub fn chat_provider_kind(&self, tenant: &Tenant) -> ChatProviderKind {
        self.registry.kind_for(tenant)
    }
}

/// Runs `call` once, and if it fails with [`ProviderError::Timeout`] (the
/// only failure mode treated as transient), waits [`RETRY_BACKOFF`] and
/// tries exactly once more.
async fn with_retry<T, F, Fut>(mut call: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ProviderResult<T>>,
{
    match call().await {
        Err(ProviderError::Timeout) => {
            tokio::time::sleep(RETRY_BACKOFF).await;
            call().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_exactly_once_on_timeout() {
        let attempts = AtomicUsize::new(0);
        let result: ProviderResult<()> = with_retry(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::Timeout)
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_upstream_errors() {
        let attempts = AtomicUsize::new(0);
        let result: ProviderResult<()> = with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(ProviderError::Upstream("bad request".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_retry_also_times_out() {
        let attempts = AtomicUsize::new(0);
        let result: ProviderResult<()> = with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(ProviderError::Timeout) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

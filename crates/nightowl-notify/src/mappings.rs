//! Repository for `message_mappings`: the `(alert_id, provider)` row that
//! lets the dispatcher issue `UpdateAlert` against a previously-posted
//! message instead of posting a duplicate.

use nightowl_core::model::ChatProviderKind;
use nightowl_core::{NightOwlError, Result};
use nightowl_db::Database;
use uuid::Uuid;

use crate::provider::MessageRef;

pub struct MessageMappingRepo<'a> {
    db: &'a Database,
}

impl<'a> MessageMappingRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn find(&self, schema: &str, alert_id: Uuid, provider: ChatProviderKind) -> Result<Option<MessageRef>> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let row: Option<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT channel_id, message_id, thread_id FROM message_mappings WHERE alert_id = $1 AND provider = $2",
        )
        .bind(alert_id)
        .bind(provider)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        Ok(row.map(|(channel_id, message_id, thread_id)| MessageRef {
            channel_id,
            message_id,
            thread_id,
        }))
    }

    /// Records the first `PostAlert` reference for an alert. Subsequent
    /// calls are a no-op on conflict: the mapping identifies the original
    /// post, not the latest edit.
    pub async fn record(
        &self,
        schema: &str,
        alert_id: Uuid,
        provider: ChatProviderKind,
        message_ref: &MessageRef,
    ) -> Result<()> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query(
            "INSERT INTO message_mappings (alert_id, provider, channel_id, message_id, thread_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (alert_id, provider) DO NOTHING",
        )
        .bind(alert_id)
        .bind(provider)
        .bind(&message_ref.channel_id)
        .bind(&message_ref.message_id)
        .bind(&message_ref.thread_id)
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        Ok(())
    }
}

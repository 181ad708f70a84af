//! Asynchronous, non-blocking append of audit entries.
//!
//! Producers (request handlers, the escalation engine, the ingestion
//! pipeline) hand entries to a bounded in-memory queue and move on; a single
//! background task drains the queue into batch inserts so audit writes
//! never add latency to the operation that produced them.

use std::sync::Arc;
use std::time::Duration;

use nightowl_core::model::{Actor, AuditEntry};
use nightowl_db::Database;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const QUEUE_CAPACITY: usize = 256;
const DRAIN_BATCH: usize = 32;
const DRAIN_INTERVAL: Duration = Duration::from_secs(2);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry plus the tenant schema it belongs to: `AuditEntry` itself is
/// tenant-agnostic so it can be constructed in code that has no database
/// handle.
#[derive(Debug, Clone)]
struct QueuedEntry {
    schema: String,
    entry: AuditEntry,
}

/// Handle producers clone to submit entries. Cheap: it's an `mpsc::Sender`
/// plus a rate-limited drop counter.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<QueuedEntry>,
}

impl AuditWriter {
    /// Spawns the background flusher and returns a handle plus a join handle
    /// the caller can await during graceful shutdown (after calling
    /// [`AuditWriter::shutdown`]).
    pub fn spawn(db: Arc<Database>) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run_flusher(db, rx));
        (Self { tx }, handle)
    }

    /// Enqueues an entry without blocking. On overflow the entry is dropped
    /// and a sampled warning logged; `audit_entries_dropped_total` always
    /// increments so the drop rate is visible even when the log sample
    /// misses it.
    pub fn record(&self, schema: impl Into<String>, entry: AuditEntry) {
        let queued = QueuedEntry {
            schema: schema.into(),
            entry,
        };
        match self.tx.try_send(queued) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(queued)) => {
                metrics::counter!("audit_entries_dropped_total").increment(1);
                if should_log_drop() {
                    tracing::warn!(
                        resource = %queued.entry.resource,
                        action = %queued.entry.action,
                        "audit queue full, dropping entry"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("audit flusher task is gone, entry dropped");
            }
        }
    }

    pub fn record_system(
        &self,
        schema: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
        detail: serde_json::Value,
    ) {
        self.record(
            schema,
            AuditEntry::new(Actor::System, action, resource, resource_id, detail),
        );
    }

    /// Closes the channel so the flusher drains its remaining backlog and
    /// exits instead of waiting on new entries.
    pub fn shutdown(self) {
        drop(self.tx);
    }
}

/// Every 256th drop gets logged; the metric counts all of them.
fn should_log_drop() -> bool {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed) % 256 == 0
}

async fn run_flusher(db: Arc<Database>, mut rx: mpsc::Receiver<QueuedEntry>) {
    let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(DRAIN_BATCH);

    loop {
        batch.clear();
        tokio::select! {
            n = rx.recv_many(&mut batch, DRAIN_BATCH) => {
                if n == 0 {
                    // Channel closed: drain whatever is left, bounded by the
                    // shutdown timeout, then exit.
                    drain_remaining(&db, &mut rx).await;
                    return;
                }
                flush(&db, &batch).await;
            }
            _ = ticker.tick() => {
                let n = rx.recv_many(&mut batch, DRAIN_BATCH).await;
                if n > 0 {
                    flush(&db, &batch).await;
                }
            }
        }
    }
}

async fn drain_remaining(db: &Database, rx: &mut mpsc::Receiver<QueuedEntry>) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
    let mut batch = Vec::with_capacity(DRAIN_BATCH);
    loop {
        batch.clear();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            tracing::warn!("audit shutdown drain timed out with entries still queued");
            return;
        }
        let drained = tokio::time::timeout(remaining, rx.recv_many(&mut batch, DRAIN_BATCH)).await;
        match drained {
            Ok(0) => return,
            Ok(_) => flush(db, &batch).await,
            Err(_) => {
                tracing::warn!("audit shutdown drain timed out with entries still queued");
                return;
            }
        }
    }
}

async fn flush(db: &Database, batch: &[QueuedEntry]) {
    // Entries for different tenants may share a batch; group by schema so
    // each insert runs under the right search_path.
    use std::collections::HashMap;
    let mut by_schema: HashMap<&str, Vec<&AuditEntry>> = HashMap::new();
    for queued in batch {
        by_schema.entry(queued.schema.as_str()).or_default().push(&queued.entry);
    }

    for (schema, entries) in by_schema {
        if let Err(err) = insert_batch(db, schema, &entries).await {
            tracing::error!(schema, error = %err, "failed to flush audit batch");
        }
    }
}

async fn insert_batch(db: &Database, schema: &str, entries: &[&AuditEntry]) -> anyhow::Result<()> {
    let mut conn = db.acquire_for_tenant(schema).await.map_err(|err| anyhow::anyhow!(err))?;
    for entry in entries {
        let (actor_user_id, actor_api_key_id) = match &entry.actor {
            Actor::User(id) => (Some(*id), None),
            Actor::ApiKey(id) => (None, Some(*id)),
            Actor::System => (None, None),
        };
        sqlx::query(
            "INSERT INTO audit_entries \
             (actor_user_id, actor_api_key_id, action, resource, resource_id, detail, ip, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(actor_user_id)
        .bind(actor_api_key_id)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(&entry.resource_id)
        .bind(&entry.detail)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_sampling_fires_once_per_256() {
        let mut fires = 0;
        for _ in 0..512 {
            if should_log_drop() {
                fires += 1;
            }
        }
        assert_eq!(fires, 2);
    }
}

//! Deduplication within a 300s window: a cache check first, falling back to
//! a bounded database query when the cache errors or simply misses. Cache
//! errors are logged and counted, never fatal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nightowl_db::Database;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

/// Alerts arriving within this window for the same `(tenant, fingerprint)`
/// are the same alert.
pub const DEDUP_WINDOW_SECS: i64 = 300;
const CACHE_TTL_SECS: u64 = 300;
const DB_FALLBACK_WINDOW_MINS: i64 = 5;

pub struct DedupCache {
    redis: ConnectionManager,
}

/// The outcome of a dedup check: either a pre-existing alert (a duplicate
/// arrival) or confirmation that persistence should proceed as a new alert.
#[derive(Debug, Clone, Copy)]
pub enum DedupOutcome {
    Duplicate { alert_id: Uuid },
    New,
}

impl DedupCache {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    fn key(schema: &str, fingerprint: &str) -> String {
        format!("alert:dedup:{schema}:{fingerprint}")
    }

    /// Cache-first, DB-fallback dedup check. Cache errors are swallowed and
    /// counted; they never fail the caller.
    pub async fn check(&self, db: &Database, schema: &str, fingerprint: &str) -> DedupOutcome {
        match self.check_cache(schema, fingerprint).await {
            Ok(Some(alert_id)) => return DedupOutcome::Duplicate { alert_id },
            Ok(None) => {}
            Err(err) => {
                metrics::counter!("dedup_cache_errors_total").increment(1);
                tracing::warn!(schema, fingerprint, error = %err, "dedup cache unavailable, falling back to database");
            }
        }

        match self.check_database(db, schema, fingerprint).await {
            Ok(Some(alert_id)) => DedupOutcome::Duplicate { alert_id },
            Ok(None) => DedupOutcome::New,
            Err(err) => {
                // A DB fallback failure is not distinguishable from "truly
                // new" at this layer; the subsequent INSERT's partial
                // unique index is the final backstop against a duplicate
                // row under concurrent arrivals.
                tracing::warn!(schema, fingerprint, error = %err, "dedup database fallback failed, proceeding as new");
                DedupOutcome::New
            }
        }
    }

    async fn check_cache(&self, schema: &str, fingerprint: &str) -> anyhow::Result<Option<Uuid>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(Self::key(schema, fingerprint)).await?;
        Ok(value.and_then(|v| Uuid::parse_str(&v).ok()))
    }

    async fn check_database(&self, db: &Database, schema: &str, fingerprint: &str) -> anyhow::Result<Option<Uuid>> {
        let mut conn = db.acquire_for_tenant(schema).await.map_err(|err| anyhow::anyhow!(err))?;
        let cutoff = Utc::now() - chrono::Duration::minutes(DB_FALLBACK_WINDOW_MINS);
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM alerts WHERE fingerprint = $1 AND status != 'resolved' AND last_fired_at > $2 \
             ORDER BY last_fired_at DESC LIMIT 1",
        )
        .bind(fingerprint)
        .bind(cutoff)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Unconditionally written after a successful persist, never before —
    /// a failed insert must never leave a ghost key pointing at a
    /// non-existent alert.
    pub async fn record(&self, schema: &str, fingerprint: &str, alert_id: Uuid) {
        let mut conn = self.redis.clone();
        let key = Self::key(schema, fingerprint);
        if let Err(err) = conn
            .set_ex::<_, _, ()>(&key, alert_id.to_string(), CACHE_TTL_SECS)
            .await
        {
            metrics::counter!("dedup_cache_errors_total").increment(1);
            tracing::warn!(schema, fingerprint, error = %err, "failed to write dedup cache key");
        }
    }
}

/// Convenience wrapper pairing the cache with the shared pool acquire
/// timeout used elsewhere, kept separate from [`DedupCache`] so the cache
/// can be unit-tested without a live database.
pub struct Dedup {
    pub cache: Arc<DedupCache>,
    pub db: Arc<Database>,
}

impl Dedup {
    pub fn new(cache: Arc<DedupCache>, db: Arc<Database>) -> Self {
        Self { cache, db }
    }

    pub async fn check(&self, schema: &str, fingerprint: &str) -> DedupOutcome {
        self.cache.check(&self.db, schema, fingerprint).await
    }
}

#[allow(dead_code)]
fn _assert_window_is_seconds() {
    let _: Duration = Duration::from_secs(DEDUP_WINDOW_SECS as u64);
}

//! Ties normalization, dedup, enrichment, persistence and publication
//! together into the single ingestion pipeline.
//!
//! Enrichment and publication failures are logged and metric'd but never
//! fail the caller — only a persistence failure does, so the webhook
//! sender's own retry (there is no internal retry here) is the recovery
//! path.

use std::sync::Arc;

use chrono::Utc;
use nightowl_audit::AuditWriter;
use nightowl_bus::{EventBus, FireEvent};
use nightowl_core::model::{AlertStatus, NormalizedAlert, Severity, Tenant};
use nightowl_core::{NightOwlError, Result};
use nightowl_db::Database;
use nightowl_search::IncidentSearch;
use serde_json::json;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::dedup::{Dedup, DedupOutcome};

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub alert_id: Uuid,
    pub deduplicated: bool,
}

pub struct IngestionPipeline {
    db: Arc<Database>,
    dedup: Dedup,
    search: IncidentSearch,
    bus: Arc<EventBus>,
    audit: AuditWriter,
}

impl IngestionPipeline {
    pub fn new(db: Arc<Database>, dedup: Dedup, search: IncidentSearch, bus: Arc<EventBus>, audit: AuditWriter) -> Self {
        Self { db, dedup, search, bus, audit }
    }

    pub async fn ingest(&self, tenant: &Tenant, schema: &str, normalized: NormalizedAlert) -> Result<IngestResult> {
        match self.dedup.check(schema, &normalized.fingerprint).await {
            DedupOutcome::Duplicate { alert_id } => {
                self.apply_duplicate(schema, alert_id, &normalized).await?;
                metrics::counter!("alerts_deduplicated_total").increment(1);
                self.audit.record_system(
                    schema.to_string(),
                    "alert.ingested",
                    "alert",
                    alert_id.to_string(),
                    json!({"deduplicated": true, "fingerprint": normalized.fingerprint}),
                );
                Ok(IngestResult { alert_id, deduplicated: true })
            }
            DedupOutcome::New => {
                let alert_id = if normalized.agent_auto_resolved {
                    self.persist_agent_resolved(schema, &normalized).await?
                } else {
                    self.persist_new(schema, &normalized).await?
                };

                self.dedup.cache.record(schema, &normalized.fingerprint, alert_id).await;

                if !normalized.agent_auto_resolved {
                    self.publish_fire(tenant, alert_id, &normalized).await;
                }

                self.audit.record_system(
                    schema.to_string(),
                    "alert.ingested",
                    "alert",
                    alert_id.to_string(),
                    json!({"deduplicated": false, "fingerprint": normalized.fingerprint, "agent_resolved": normalized.agent_auto_resolved}),
                );

                Ok(IngestResult { alert_id, deduplicated: false })
            }
        }
    }

    /// Increments `occurrence_count`, bumps `last_fired_at`, and merges any
    /// newly-seen label keys onto the existing row. The
    /// jsonb `||` operator lets the new labels win on key collision, which
    /// is an acceptable reading of "merges any new label keys" since the
    /// source re-sent them.
    async fn apply_duplicate(&self, schema: &str, alert_id: Uuid, normalized: &NormalizedAlert) -> Result<()> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        sqlx::query(
            "UPDATE alerts SET occurrence_count = occurrence_count + 1, last_fired_at = $2, \
             labels = labels || $3::jsonb WHERE id = $1",
        )
        .bind(alert_id)
        .bind(Utc::now())
        .bind(Json(&normalized.labels))
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        Ok(())
    }

    /// The non-agent path: two-stage enrichment, then insert with
    /// `occurrence_count = 1`. Enrichment failure is swallowed — it must
    /// never prevent persistence.
    async fn persist_new(&self, schema: &str, normalized: &NormalizedAlert) -> Result<Uuid> {
        let enrichment = match self.search.enrich(schema, &normalized.fingerprint, &normalized.title).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(schema, fingerprint = %normalized.fingerprint, error = %err, "enrichment failed, continuing without match");
                None
            }
        };
        if enrichment.is_some() {
            metrics::counter!("kb_hits_total").increment(1);
        }
        let matched_incident_id = enrichment.as_ref().map(|i| i.id);
        let suggested_solution = enrichment.map(|i| i.solution);

        let now = Utc::now();
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let row = sqlx::query(
            "INSERT INTO alerts \
                (fingerprint, status, severity, source, title, description, labels, annotations, \
                 matched_incident_id, suggested_solution, first_fired_at, last_fired_at, occurrence_count, \
                 resolved_at, escalation_policy_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, 1, $12, $13) \
             RETURNING id",
        )
        .bind(&normalized.fingerprint)
        .bind(normalized.status)
        .bind(normalized.severity)
        .bind(&normalized.source)
        .bind(&normalized.title)
        .bind(&normalized.description)
        .bind(Json(&normalized.labels))
        .bind(Json(&normalized.annotations))
        .bind(matched_incident_id)
        .bind(&suggested_solution)
        .bind(now)
        .bind(if normalized.status == AlertStatus::Resolved { Some(now) } else { None })
        .bind(normalized.escalation_policy_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        row.try_get("id").map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    /// The agent auto-resolution path: persisted directly
    /// as `resolved`, and — only when no existing incident already covers
    /// this fingerprint — a new knowledge-base incident is created from the
    /// agent's own remediation notes.
    async fn persist_agent_resolved(&self, schema: &str, normalized: &NormalizedAlert) -> Result<Uuid> {
        let existing = self.search.find_by_fingerprint(schema, &normalized.fingerprint).await.unwrap_or(None);
        let action_taken = normalized.agent_action_taken.clone().unwrap_or_default();

        if existing.is_none() {
            self.create_agent_incident(schema, normalized, &action_taken).await?;
        }

        let now = Utc::now();
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let row = sqlx::query(
            "INSERT INTO alerts \
                (fingerprint, status, severity, source, title, description, labels, annotations, \
                 first_fired_at, last_fired_at, occurrence_count, resolved_at, resolved_by_agent, \
                 agent_resolution_notes, escalation_policy_id) \
             VALUES ($1, 'resolved', $2, $3, $4, $5, $6, $7, $8, $8, 1, $8, TRUE, $9, $10) \
             RETURNING id",
        )
        .bind(&normalized.fingerprint)
        .bind(normalized.severity)
        .bind(&normalized.source)
        .bind(&normalized.title)
        .bind(&normalized.description)
        .bind(Json(&normalized.labels))
        .bind(Json(&normalized.annotations))
        .bind(now)
        .bind(&action_taken)
        .bind(normalized.escalation_policy_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        metrics::counter!("alerts_agent_resolved_total").increment(1);
        row.try_get("id").map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    async fn create_agent_incident(&self, schema: &str, normalized: &NormalizedAlert, solution: &str) -> Result<Uuid> {
        let mut conn = self.db.acquire_for_tenant(schema).await?;
        let row = sqlx::query(
            "INSERT INTO incidents (title, fingerprints, severity, solution, category, tags) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&normalized.title)
        .bind(vec![normalized.fingerprint.clone()])
        .bind(normalized.severity)
        .bind(solution)
        .bind("agent-resolved")
        .bind(vec![normalized.source.clone()])
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        row.try_get("id").map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    /// Publishes `alert.fired` after a successful insert. A publish
    /// failure is logged, never surfaced to the caller.
    async fn publish_fire(&self, tenant: &Tenant, alert_id: Uuid, normalized: &NormalizedAlert) {
        let event = FireEvent {
            event: "alert.fired",
            tenant: tenant.slug.clone(),
            alert_id,
            severity: severity_token(normalized.severity).to_string(),
            fingerprint: normalized.fingerprint.clone(),
        };
        if let Err(err) = self.bus.publish_fire(&event).await {
            tracing::warn!(alert_id = %alert_id, error = %err, "failed to publish alert.fired");
        }
    }
}

fn severity_token(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Major => "major",
        Severity::Critical => "critical",
    }
}

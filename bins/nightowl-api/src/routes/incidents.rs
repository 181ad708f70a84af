//! Knowledge base CRUD, search, merge and change history. List/create/
//! update/delete/history have no dedicated service (unlike search/merge,
//! which live in `nightowl_search`) since they are one query each with no
//! shared logic worth factoring out.

use chrono::Utc;
use axum::extract::{Path, Query, State};
use axum::Json;
use nightowl_core::model::{Incident, IncidentHistoryEntry, IncidentSearchHit, Pagination, Severity};
use nightowl_core::{NightOwlError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, Row};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;

const INCIDENT_COLUMNS: &str = "id, title, fingerprints, severity, category, tags, services, clusters, \
     namespaces, symptoms, error_patterns, root_cause, solution, runbook_id, \
     resolution_count, avg_resolution_mins, merged_into_id, created_at, updated_at";

fn incident_from_row(row: sqlx::postgres::PgRow) -> Incident {
    Incident {
        id: row.try_get("id").unwrap_or_default(),
        title: row.try_get("title").unwrap_or_default(),
        fingerprints: row.try_get("fingerprints").unwrap_or_default(),
        severity: row.try_get("severity").unwrap_or(Severity::Warning),
        category: row.try_get("category").unwrap_or_default(),
        tags: row.try_get("tags").unwrap_or_default(),
        services: row.try_get("services").unwrap_or_default(),
        clusters: row.try_get("clusters").unwrap_or_default(),
        namespaces: row.try_get("namespaces").unwrap_or_default(),
        symptoms: row.try_get("symptoms").unwrap_or_default(),
        error_patterns: row.try_get("error_patterns").unwrap_or_default(),
        root_cause: row.try_get("root_cause").unwrap_or_default(),
        solution: row.try_get("solution").unwrap_or_default(),
        runbook_id: row.try_get("runbook_id").ok().flatten(),
        resolution_count: row.try_get("resolution_count").unwrap_or_default(),
        avg_resolution_mins: row.try_get("avg_resolution_mins").unwrap_or_default(),
        merged_into_id: row.try_get("merged_into_id").ok().flatten(),
        created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
        updated_at: row.try_get("updated_at").unwrap_or_else(|_| Utc::now()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    page_size: u32,
}

pub async fn list(State(state): State<AppState>, auth: AuthContext, Query(q): Query<ListQuery>) -> Result<Json<Vec<Incident>>> {
    let schema = auth.tenant.schema_name();
    let page = Pagination { page: q.page, page_size: q.page_size }.normalized();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let rows = sqlx::query(&format!(
        "SELECT {INCIDENT_COLUMNS} FROM incidents \
         WHERE merged_into_id IS NULL \
         AND ($1::alert_severity IS NULL OR severity = $1) \
         AND ($2::text IS NULL OR category = $2) \
         AND ($3::text IS NULL OR $3 = ANY(services)) \
         AND ($4::text IS NULL OR $4 = ANY(tags)) \
         ORDER BY updated_at DESC OFFSET $5 LIMIT $6"
    ))
    .bind(q.severity)
    .bind(q.category)
    .bind(q.service)
    .bind(q.tag)
    .bind(page.offset())
    .bind(page.limit())
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(rows.into_iter().map(incident_from_row).collect()))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    page_size: u32,
}

pub async fn search(State(state): State<AppState>, auth: AuthContext, Query(q): Query<SearchQuery>) -> Result<Json<Vec<IncidentSearchHit>>> {
    let schema = auth.tenant.schema_name();
    let page = Pagination { page: q.page, page_size: q.page_size };
    let hits = state.search.search(&schema, &q.q, page).await?;
    Ok(Json(hits))
}

pub async fn by_fingerprint(State(state): State<AppState>, auth: AuthContext, Path(fingerprint): Path<String>) -> Result<Json<Incident>> {
    let schema = auth.tenant.schema_name();
    let incident = state
        .search
        .find_by_fingerprint(&schema, &fingerprint)
        .await?
        .ok_or_else(|| NightOwlError::NotFound(format!("incident with fingerprint {fingerprint}")))?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IncidentBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fingerprints: Vec<String>,
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub symptoms: String,
    #[serde(default)]
    pub error_patterns: Vec<String>,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub runbook_id: Option<Uuid>,
}

pub async fn create(State(state): State<AppState>, auth: AuthContext, Json(body): Json<IncidentBody>) -> Result<(axum::http::StatusCode, Json<Incident>)> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let row = sqlx::query(&format!(
        "INSERT INTO incidents (title, fingerprints, severity, category, tags, services, clusters, \
         namespaces, symptoms, error_patterns, root_cause, solution, runbook_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING {INCIDENT_COLUMNS}"
    ))
    .bind(&body.title)
    .bind(&body.fingerprints)
    .bind(body.severity)
    .bind(&body.category)
    .bind(&body.tags)
    .bind(&body.services)
    .bind(&body.clusters)
    .bind(&body.namespaces)
    .bind(&body.symptoms)
    .bind(&body.error_patterns)
    .bind(&body.root_cause)
    .bind(&body.solution)
    .bind(body.runbook_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    let incident = incident_from_row(row);
    state.audit.record_system(schema, "incident.created", "incident", incident.id.to_string(), serde_json::json!({}));
    Ok((axum::http::StatusCode::CREATED, Json(incident)))
}

pub async fn get_one(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<Incident>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let row = sqlx::query(&format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .ok_or_else(|| NightOwlError::NotFound(format!("incident {id}")))?;
    Ok(Json(incident_from_row(row)))
}

pub async fn update(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Json(body): Json<IncidentBody>) -> Result<Json<Incident>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let mut tx = conn.begin().await.map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

    let before = sqlx::query(&format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .map(incident_from_row)
        .ok_or_else(|| NightOwlError::NotFound(format!("incident {id}")))?;

    let after_row = sqlx::query(&format!(
        "UPDATE incidents SET title = $2, fingerprints = $3, severity = $4, category = $5, tags = $6, \
         services = $7, clusters = $8, namespaces = $9, symptoms = $10, error_patterns = $11, \
         root_cause = $12, solution = $13, runbook_id = $14, updated_at = now() \
         WHERE id = $1 RETURNING {INCIDENT_COLUMNS}"
    ))
    .bind(id)
    .bind(&body.title)
    .bind(&body.fingerprints)
    .bind(body.severity)
    .bind(&body.category)
    .bind(&body.tags)
    .bind(&body.services)
    .bind(&body.clusters)
    .bind(&body.namespaces)
    .bind(&body.symptoms)
    .bind(&body.error_patterns)
    .bind(&body.root_cause)
    .bind(&body.solution)
    .bind(body.runbook_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    let after = incident_from_row(after_row);

    for field in changed_fields(&before, &after) {
        sqlx::query("INSERT INTO incident_history (incident_id, changed_by, field, old_value, new_value) VALUES ($1, $2, $3, $4, $5)")
            .bind(id)
            .bind(None::<Uuid>)
            .bind(field.0)
            .bind(field.1)
            .bind(field.2)
            .execute(&mut *tx)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    }

    tx.commit().await.map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    state.audit.record_system(schema, "incident.updated", "incident", id.to_string(), serde_json::json!({}));
    Ok(Json(after))
}

fn changed_fields(before: &Incident, after: &Incident) -> Vec<(&'static str, String, String)> {
    let pairs: [(&'static str, &str, &str); 5] = [
        ("title", &before.title, &after.title),
        ("category", &before.category, &after.category),
        ("symptoms", &before.symptoms, &after.symptoms),
        ("root_cause", &before.root_cause, &after.root_cause),
        ("solution", &before.solution, &after.solution),
    ];
    pairs
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, old, new)| (field, old.to_string(), new.to_string()))
        .collect()
}

pub async fn delete(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<axum::http::StatusCode> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let result = sqlx::query("DELETE FROM incidents WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    if result.rows_affected() == 0 {
        return Err(NightOwlError::NotFound(format!("incident {id}")));
    }
    state.audit.record_system(schema, "incident.deleted", "incident", id.to_string(), serde_json::json!({}));
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MergeBody {
    target_id: Uuid,
}

pub async fn merge(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Json(body): Json<MergeBody>) -> Result<axum::http::StatusCode> {
    let schema = auth.tenant.schema_name();
    state.search.merge(&schema, id, body.target_id).await?;
    state.audit.record_system(
        schema,
        "incident.merged",
        "incident",
        id.to_string(),
        serde_json::json!({ "target_id": body.target_id }),
    );
    Ok(axum::http::StatusCode::OK)
}

pub async fn history(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<Vec<IncidentHistoryEntry>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let rows = sqlx::query_as::<_, IncidentHistoryRow>(
        "SELECT id, incident_id, changed_by, field, old_value, new_value, changed_at \
         FROM incident_history WHERE incident_id = $1 ORDER BY changed_at DESC",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[derive(sqlx::FromRow)]
struct IncidentHistoryRow {
    id: Uuid,
    incident_id: Uuid,
    changed_by: Option<Uuid>,
    field: String,
    old_value: Option<String>,
    new_value: Option<String>,
    changed_at: chrono::DateTime<Utc>,
}

impl From<IncidentHistoryRow> for IncidentHistoryEntry {
    fn from(row: IncidentHistoryRow) -> Self {
        Self {
            id: row.id,
            incident_id: row.incident_id,
            changed_by: row.changed_by,
            field: row.field,
            old_value: row.old_value,
            new_value: row.new_value,
            changed_at: row.changed_at,
        }
    }
}

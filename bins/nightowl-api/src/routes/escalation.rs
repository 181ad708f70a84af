//! Escalation policy CRUD, the dry-run planner endpoint, and the read-only
//! event trail. CRUD is hand-rolled raw SQL (no backing service — the
//! policy's `tiers` column is the only piece with shared logic, and that
//! logic already lives in [`nightowl_escalation`]).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use nightowl_core::model::{EscalationEvent, EscalationPolicy, EscalationTier, NotifyMethod, NotifyResult};
use nightowl_core::{NightOwlError, Result};
use nightowl_escalation::dry_run as plan_dry_run;
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlxJson;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: Uuid,
    name: String,
    tiers: SqlxJson<Vec<EscalationTier>>,
    repeat_count: i32,
}

impl From<PolicyRow> for EscalationPolicy {
    fn from(row: PolicyRow) -> Self {
        EscalationPolicy { id: row.id, name: row.name, tiers: row.tiers.0, repeat_count: row.repeat_count }
    }
}

pub async fn list(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Vec<EscalationPolicy>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let rows = sqlx::query_as::<_, PolicyRow>("SELECT id, name, tiers, repeat_count FROM escalation_policies ORDER BY name")
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(rows.into_iter().map(EscalationPolicy::from).collect()))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PolicyBody {
    pub name: String,
    pub tiers: Vec<EscalationTier>,
    #[serde(default)]
    pub repeat_count: i32,
}

pub async fn create(State(state): State<AppState>, auth: AuthContext, Json(body): Json<PolicyBody>) -> Result<(StatusCode, Json<EscalationPolicy>)> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let row = sqlx::query_as::<_, PolicyRow>(
        "INSERT INTO escalation_policies (name, tiers, repeat_count) VALUES ($1, $2, $3) \
         RETURNING id, name, tiers, repeat_count",
    )
    .bind(&body.name)
    .bind(SqlxJson(&body.tiers))
    .bind(body.repeat_count)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    let policy = EscalationPolicy::from(row);
    state.audit.record_system(schema, "escalation_policy.created", "escalation_policy", policy.id.to_string(), serde_json::json!({}));
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn get_one(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<EscalationPolicy>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let row = sqlx::query_as::<_, PolicyRow>("SELECT id, name, tiers, repeat_count FROM escalation_policies WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .ok_or_else(|| NightOwlError::NotFound(format!("escalation policy {id}")))?;
    Ok(Json(row.into()))
}

pub async fn update(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Json(body): Json<PolicyBody>) -> Result<Json<EscalationPolicy>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let row = sqlx::query_as::<_, PolicyRow>(
        "UPDATE escalation_policies SET name = $2, tiers = $3, repeat_count = $4 WHERE id = $1 \
         RETURNING id, name, tiers, repeat_count",
    )
    .bind(id)
    .bind(&body.name)
    .bind(SqlxJson(&body.tiers))
    .bind(body.repeat_count)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
    .ok_or_else(|| NightOwlError::NotFound(format!("escalation policy {id}")))?;
    let policy = EscalationPolicy::from(row);
    state.audit.record_system(schema, "escalation_policy.updated", "escalation_policy", id.to_string(), serde_json::json!({}));
    Ok(Json(policy))
}

pub async fn delete(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let result = sqlx::query("DELETE FROM escalation_policies WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    if result.rows_affected() == 0 {
        return Err(NightOwlError::NotFound(format!("escalation policy {id}")));
    }
    state.audit.record_system(schema, "escalation_policy.deleted", "escalation_policy", id.to_string(), serde_json::json!({}));
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DryRunQuery {
    elapsed_minutes: f64,
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

pub async fn dry_run(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Query(q): Query<DryRunQuery>,
) -> Result<Json<Vec<nightowl_escalation::DryRunStep>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let row = sqlx::query_as::<_, PolicyRow>("SELECT id, name, tiers, repeat_count FROM escalation_policies WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .ok_or_else(|| NightOwlError::NotFound(format!("escalation policy {id}")))?;
    drop(conn);
    let policy: EscalationPolicy = row.into();
    let at = q.at.unwrap_or_else(Utc::now);
    let steps = plan_dry_run(&state.oncall, &schema, &policy, q.elapsed_minutes, at).await?;
    Ok(Json(steps))
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    alert_id: Uuid,
    policy_id: Uuid,
    tier: i32,
    action: nightowl_core::model::EscalationAction,
    target_user_id: Option<Uuid>,
    notify_method: Option<String>,
    notify_result: Option<NotifyResult>,
    detail: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for EscalationEvent {
    fn from(row: EventRow) -> Self {
        EscalationEvent {
            id: row.id,
            alert_id: row.alert_id,
            policy_id: row.policy_id,
            tier: row.tier,
            action: row.action,
            target_user_id: row.target_user_id,
            notify_method: row.notify_method.and_then(|m| match m.as_str() {
                "messaging_dm" => Some(NotifyMethod::MessagingDm),
                "messaging_channel" => Some(NotifyMethod::MessagingChannel),
                "phone" => Some(NotifyMethod::Phone),
                "sms" => Some(NotifyMethod::Sms),
                _ => None,
            }),
            notify_result: row.notify_result,
            detail: row.detail,
            created_at: row.created_at,
        }
    }
}

pub async fn events(State(state): State<AppState>, auth: AuthContext, Path((id, alert_id)): Path<(Uuid, Uuid)>) -> Result<Json<Vec<EscalationEvent>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, alert_id, policy_id, tier, action, target_user_id, notify_method, notify_result, detail, created_at \
         FROM escalation_events WHERE policy_id = $1 AND alert_id = $2 ORDER BY created_at DESC",
    )
    .bind(id)
    .bind(alert_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(rows.into_iter().map(EscalationEvent::from).collect()))
}

//! Roster CRUD plus the nested members/overrides collections and the
//! on-call read endpoints backed by [`nightowl_oncall::OnCallService`].

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use nightowl_core::model::{OnCallResolution, Roster, RosterMember, RosterOverride, RotationType, Shift};
use nightowl_core::{NightOwlError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;

const ROSTER_COLUMNS: &str = "id, name, timezone, rotation_type, rotation_length, handoff_time, \
     start_date, end_date, is_follow_the_sun, linked_roster_id, escalation_policy_id";

pub async fn list(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Vec<Roster>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let rosters = sqlx::query_as::<_, Roster>(&format!("SELECT {ROSTER_COLUMNS} FROM rosters ORDER BY name"))
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(rosters))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RosterBody {
    pub name: String,
    pub timezone: String,
    pub rotation_type: RotationType,
    pub rotation_length: i32,
    pub handoff_time: NaiveTime,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_follow_the_sun: bool,
    #[serde(default)]
    pub linked_roster_id: Option<Uuid>,
    #[serde(default)]
    pub escalation_policy_id: Option<Uuid>,
}

pub async fn create(State(state): State<AppState>, auth: AuthContext, Json(body): Json<RosterBody>) -> Result<(StatusCode, Json<Roster>)> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let roster = sqlx::query_as::<_, Roster>(&format!(
        "INSERT INTO rosters (name, timezone, rotation_type, rotation_length, handoff_time, start_date, \
         end_date, is_follow_the_sun, linked_roster_id, escalation_policy_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {ROSTER_COLUMNS}"
    ))
    .bind(&body.name)
    .bind(&body.timezone)
    .bind(body.rotation_type)
    .bind(body.rotation_length)
    .bind(body.handoff_time)
    .bind(body.start_date)
    .bind(body.end_date)
    .bind(body.is_follow_the_sun)
    .bind(body.linked_roster_id)
    .bind(body.escalation_policy_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    state.audit.record_system(schema, "roster.created", "roster", roster.id.to_string(), serde_json::json!({}));
    Ok((StatusCode::CREATED, Json(roster)))
}

pub async fn get_one(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<Roster>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let roster = sqlx::query_as::<_, Roster>(&format!("SELECT {ROSTER_COLUMNS} FROM rosters WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
        .ok_or_else(|| NightOwlError::NotFound(format!("roster {id}")))?;
    Ok(Json(roster))
}

pub async fn update(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Json(body): Json<RosterBody>) -> Result<Json<Roster>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let roster = sqlx::query_as::<_, Roster>(&format!(
        "UPDATE rosters SET name = $2, timezone = $3, rotation_type = $4, rotation_length = $5, \
         handoff_time = $6, start_date = $7, end_date = $8, is_follow_the_sun = $9, \
         linked_roster_id = $10, escalation_policy_id = $11 WHERE id = $1 RETURNING {ROSTER_COLUMNS}"
    ))
    .bind(id)
    .bind(&body.name)
    .bind(&body.timezone)
    .bind(body.rotation_type)
    .bind(body.rotation_length)
    .bind(body.handoff_time)
    .bind(body.start_date)
    .bind(body.end_date)
    .bind(body.is_follow_the_sun)
    .bind(body.linked_roster_id)
    .bind(body.escalation_policy_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
    .ok_or_else(|| NightOwlError::NotFound(format!("roster {id}")))?;
    state.audit.record_system(schema, "roster.updated", "roster", id.to_string(), serde_json::json!({}));
    Ok(Json(roster))
}

pub async fn delete(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let result = sqlx::query("DELETE FROM rosters WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    if result.rows_affected() == 0 {
        return Err(NightOwlError::NotFound(format!("roster {id}")));
    }
    state.audit.record_system(schema, "roster.deleted", "roster", id.to_string(), serde_json::json!({}));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<Vec<RosterMember>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let members = sqlx::query_as::<_, RosterMember>(
        "SELECT roster_id, user_id, \"position\", display_name, email FROM roster_members WHERE roster_id = $1 ORDER BY \"position\"",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
pub struct MemberBody {
    pub user_id: Uuid,
    pub position: i32,
    pub display_name: String,
    pub email: String,
}

pub async fn add_member(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Json(body): Json<MemberBody>) -> Result<(StatusCode, Json<RosterMember>)> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let member = sqlx::query_as::<_, RosterMember>(
        "INSERT INTO roster_members (roster_id, user_id, \"position\", display_name, email) \
         VALUES ($1, $2, $3, $4, $5) RETURNING roster_id, user_id, \"position\", display_name, email",
    )
    .bind(id)
    .bind(body.user_id)
    .bind(body.position)
    .bind(&body.display_name)
    .bind(&body.email)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberBody {
    pub position: i32,
    pub display_name: String,
    pub email: String,
}

pub async fn update_member(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMemberBody>,
) -> Result<Json<RosterMember>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let member = sqlx::query_as::<_, RosterMember>(
        "UPDATE roster_members SET \"position\" = $3, display_name = $4, email = $5 \
         WHERE roster_id = $1 AND user_id = $2 \
         RETURNING roster_id, user_id, \"position\", display_name, email",
    )
    .bind(id)
    .bind(user_id)
    .bind(body.position)
    .bind(&body.display_name)
    .bind(&body.email)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
    .ok_or_else(|| NightOwlError::NotFound(format!("member {user_id} of roster {id}")))?;
    Ok(Json(member))
}

pub async fn remove_member(State(state): State<AppState>, auth: AuthContext, Path((id, user_id)): Path<(Uuid, Uuid)>) -> Result<StatusCode> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let result = sqlx::query("DELETE FROM roster_members WHERE roster_id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    if result.rows_affected() == 0 {
        return Err(NightOwlError::NotFound(format!("member {user_id} of roster {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_overrides(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<Vec<RosterOverride>>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let overrides = sqlx::query_as::<_, RosterOverride>(
        "SELECT id, roster_id, user_id, display_name, email, start_at, end_at, reason \
         FROM roster_overrides WHERE roster_id = $1 ORDER BY start_at",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(overrides))
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

pub async fn add_override(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Json(body): Json<OverrideBody>) -> Result<(StatusCode, Json<RosterOverride>)> {
    if body.end_at <= body.start_at {
        return Err(NightOwlError::bad_request("end_at must be after start_at"));
    }
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let over = sqlx::query_as::<_, RosterOverride>(
        "INSERT INTO roster_overrides (roster_id, user_id, display_name, email, start_at, end_at, reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING id, roster_id, user_id, display_name, email, start_at, end_at, reason",
    )
    .bind(id)
    .bind(body.user_id)
    .bind(&body.display_name)
    .bind(&body.email)
    .bind(body.start_at)
    .bind(body.end_at)
    .bind(&body.reason)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok((StatusCode::CREATED, Json(over)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOverrideBody {
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn update_override(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, override_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateOverrideBody>,
) -> Result<Json<RosterOverride>> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let existing = sqlx::query_as::<_, RosterOverride>(
        "SELECT id, roster_id, user_id, display_name, email, start_at, end_at, reason \
         FROM roster_overrides WHERE id = $1 AND roster_id = $2",
    )
    .bind(override_id)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?
    .ok_or_else(|| NightOwlError::NotFound(format!("override {override_id} of roster {id}")))?;

    let start_at = body.start_at.unwrap_or(existing.start_at);
    let end_at = body.end_at.unwrap_or(existing.end_at);
    if end_at <= start_at {
        return Err(NightOwlError::bad_request("end_at must be after start_at"));
    }
    let reason = body.reason.unwrap_or(existing.reason);

    let updated = sqlx::query_as::<_, RosterOverride>(
        "UPDATE roster_overrides SET start_at = $3, end_at = $4, reason = $5 WHERE id = $1 AND roster_id = $2 \
         RETURNING id, roster_id, user_id, display_name, email, start_at, end_at, reason",
    )
    .bind(override_id)
    .bind(id)
    .bind(start_at)
    .bind(end_at)
    .bind(&reason)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    Ok(Json(updated))
}

pub async fn remove_override(State(state): State<AppState>, auth: AuthContext, Path((id, override_id)): Path<(Uuid, Uuid)>) -> Result<StatusCode> {
    let schema = auth.tenant.schema_name();
    let mut conn = state.db.acquire_for_tenant(&schema).await?;
    let result = sqlx::query("DELETE FROM roster_overrides WHERE id = $1 AND roster_id = $2")
        .bind(override_id)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
    if result.rows_affected() == 0 {
        return Err(NightOwlError::NotFound(format!("override {override_id} of roster {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct OnCallQuery {
    at: Option<DateTime<Utc>>,
}

pub async fn oncall(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>, Query(q): Query<OnCallQuery>) -> Result<Json<OnCallResolution>> {
    let schema = auth.tenant.schema_name();
    let at = q.at.unwrap_or_else(Utc::now);
    let resolution = state.oncall.resolve_at(&schema, id, at).await?;
    Ok(Json(resolution))
}

pub async fn oncall_history(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<Json<Vec<Shift>>> {
    let schema = auth.tenant.schema_name();
    let shifts = state.oncall.history(&schema, id).await?;
    Ok(Json(shifts))
}

pub async fn export_ical(State(state): State<AppState>, auth: AuthContext, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    let schema = auth.tenant.schema_name();
    let ics = state.oncall.export_ical(&schema, id).await?;
    let headers = [(header::CONTENT_TYPE, HeaderValue::from_static("text/calendar; charset=utf-8"))];
    Ok((StatusCode::OK, headers, ics))
}

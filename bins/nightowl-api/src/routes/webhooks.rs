//! The three accepted webhook shapes. Each handler normalizes the body,
//! then hands the result(s) to the shared ingestion pipeline; normalization
//! and ingestion are otherwise identical across sources.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use nightowl_core::model::NormalizedAlert;
use nightowl_core::Result;
use nightowl_ingest::{normalize_alertmanager, normalize_generic, normalize_keep, IngestResult};
use serde::Serialize;

use crate::auth::AuthContext;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    alert_id: uuid::Uuid,
    deduplicated: bool,
}

impl From<IngestResult> for IngestResponse {
    fn from(r: IngestResult) -> Self {
        Self { alert_id: r.alert_id, deduplicated: r.deduplicated }
    }
}

async fn ingest_all(state: &AppState, auth: &AuthContext, alerts: Vec<NormalizedAlert>) -> Result<Vec<IngestResponse>> {
    let schema = auth.tenant.schema_name();
    let mut out = Vec::with_capacity(alerts.len());
    for normalized in alerts {
        let result = state.ingest.ingest(&auth.tenant, &schema, normalized).await?;
        out.push(result.into());
    }
    Ok(out)
}

/// Alertmanager v4 carries a batch of records per POST; each is ingested
/// independently and the response is the array of per-alert outcomes.
pub async fn alertmanager(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Vec<IngestResponse>>)> {
    let normalized = normalize_alertmanager(&body)?;
    let results = ingest_all(&state, &auth, normalized).await?;
    Ok((StatusCode::ACCEPTED, Json(results)))
}

pub async fn keep(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let normalized = normalize_keep(&body)?;
    let schema = auth.tenant.schema_name();
    let result = state.ingest.ingest(&auth.tenant, &schema, normalized).await?;
    Ok((StatusCode::ACCEPTED, Json(result.into())))
}

pub async fn generic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let normalized = normalize_generic(&body)?;
    let schema = auth.tenant.schema_name();
    let result = state.ingest.ingest(&auth.tenant, &schema, normalized).await?;
    Ok((StatusCode::ACCEPTED, Json(result.into())))
}

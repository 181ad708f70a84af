//! Acknowledge and resolve: the two alert transitions reachable directly
//! from the API rather than a webhook.

use axum::extract::{Path, State};
use axum::Json;
use nightowl_core::model::{Actor, Alert};
use nightowl_core::Result;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct AcknowledgeBody {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResolveBody {
    #[serde(default)]
    notes: Option<String>,
    /// Client-side hint that the operator wants to be prompted to turn
    /// this resolution into a knowledge-base entry; the server records it
    /// on the audit trail but takes no further action.
    #[serde(default)]
    create_kb_prompt: bool,
}

fn actor_for(auth: &AuthContext) -> Actor {
    // The only identity this repository's auth boundary carries through to
    // here is the tenant/role/scopes triple; a dedicated user id claim
    // would let this resolve to `Actor::User`, but nothing upstream of
    // `AuthContext` currently carries one.
    let _ = auth;
    Actor::System
}

pub async fn acknowledge(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    body: Option<Json<AcknowledgeBody>>,
) -> Result<Json<Alert>> {
    let schema = auth.tenant.schema_name();
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let alert = state.lifecycle.acknowledge(&auth.tenant.slug, &schema, id, actor_for(&auth)).await?;
    if let Some(notes) = body.notes {
        state.audit.record_system(schema, "alert.acknowledged.notes", "alert", id.to_string(), json!({ "notes": notes }));
    }
    Ok(Json(alert))
}

pub async fn resolve(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<Alert>> {
    let schema = auth.tenant.schema_name();
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let alert = state.lifecycle.resolve(&auth.tenant.slug, &schema, id, actor_for(&auth)).await?;
    if body.notes.is_some() || body.create_kb_prompt {
        state.audit.record_system(
            schema,
            "alert.resolved.notes",
            "alert",
            id.to_string(),
            json!({ "notes": body.notes, "create_kb_prompt": body.create_kb_prompt }),
        );
    }
    Ok(Json(alert))
}

//! HTTP surface: one module per resource family, assembled into a single
//! router here. Every handler receives [`AppState`] through axum's `State`
//! extractor and [`AuthContext`](crate::auth::AuthContext) through its own
//! `FromRequestParts` impl, which resolves tenant scope before the handler
//! body runs.

mod alerts;
mod escalation;
mod health;
mod incidents;
mod rosters;
mod webhooks;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Webhook bodies are capped well below the rest of the API's bodies.
const WEBHOOK_BODY_LIMIT_BYTES: usize = 1024 * 1024;

pub fn build_http_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route("/webhooks/alertmanager", post(webhooks::alertmanager))
        .route("/webhooks/keep", post(webhooks::keep))
        .route("/webhooks/generic", post(webhooks::generic))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT_BYTES));

    let alert_routes = Router::new()
        .route("/alerts/:id/acknowledge", patch(alerts::acknowledge))
        .route("/alerts/:id/resolve", patch(alerts::resolve));

    let incident_routes = Router::new()
        .route("/incidents", get(incidents::list).post(incidents::create))
        .route("/incidents/search", get(incidents::search))
        .route("/incidents/fingerprint/:fingerprint", get(incidents::by_fingerprint))
        .route(
            "/incidents/:id",
            get(incidents::get_one).put(incidents::update).delete(incidents::delete),
        )
        .route("/incidents/:id/merge", post(incidents::merge))
        .route("/incidents/:id/history", get(incidents::history));

    let roster_routes = Router::new()
        .route("/rosters", get(rosters::list).post(rosters::create))
        .route("/rosters/:id", get(rosters::get_one).put(rosters::update).delete(rosters::delete))
        .route("/rosters/:id/members", get(rosters::list_members).post(rosters::add_member))
        .route("/rosters/:id/members/:user_id", put(rosters::update_member).delete(rosters::remove_member))
        .route("/rosters/:id/overrides", get(rosters::list_overrides).post(rosters::add_override))
        .route("/rosters/:id/overrides/:override_id", patch(rosters::update_override).delete(rosters::remove_override))
        .route("/rosters/:id/oncall", get(rosters::oncall))
        .route("/rosters/:id/oncall/history", get(rosters::oncall_history))
        .route("/rosters/:id/export.ics", get(rosters::export_ical));

    let escalation_routes = Router::new()
        .route("/escalation-policies", get(escalation::list).post(escalation::create))
        .route(
            "/escalation-policies/:id",
            get(escalation::get_one).put(escalation::update).delete(escalation::delete),
        )
        .route("/escalation-policies/:id/dry-run", post(escalation::dry_run))
        .route("/escalation-policies/:id/events/:alert_id", get(escalation::events));

    let api_v1 = Router::new()
        .merge(webhook_routes)
        .merge(alert_routes)
        .merge(incident_routes)
        .merge(roster_routes)
        .merge(escalation_routes);

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state))
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let allowlist = &state.config.providers.cors_allowlist;
    if allowlist.is_empty() {
        return CorsLayer::new();
    }
    let origins: Vec<_> = allowlist.iter().filter_map(|origin| origin.parse().ok()).collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}

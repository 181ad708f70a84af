//! Liveness/readiness probes and the Prometheus scrape endpoint.

use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;

use crate::state::AppState;

const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Always 200 while the process is alive; orchestrators use this to decide
/// whether to restart the container, not whether to route traffic to it.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// 200 iff Postgres and Redis both answer within 1s each; 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    let db_ok = tokio::time::timeout(READY_PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(state.db.public_pool()))
        .await
        .is_ok_and(|r| r.is_ok());
    let redis_ok = tokio::time::timeout(READY_PROBE_TIMEOUT, state.bus.ping())
        .await
        .is_ok_and(|r| r.is_ok());

    if db_ok && redis_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render();
    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=1.0.0; charset=utf-8"),
    )];
    (StatusCode::OK, headers, body)
}

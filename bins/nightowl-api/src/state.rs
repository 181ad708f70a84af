use std::sync::Arc;

use nightowl_audit::AuditWriter;
use nightowl_bus::EventBus;
use nightowl_core::config::AppConfig;
use nightowl_db::Database;
use nightowl_ingest::{AlertLifecycle, IngestionPipeline};
use nightowl_oncall::OnCallService;
use nightowl_observability::MetricsExporter;
use nightowl_search::IncidentSearch;

/// Shared services every route handler needs, built once at startup and
/// cloned cheaply per request (every field is itself an `Arc` or a
/// `Clone`-cheap handle). The escalation engine and notifier dispatcher
/// live in `nightowl-worker`, not here — this binary only ingests, serves
/// the knowledge base and roster/policy CRUD, and computes dry-runs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub search: IncidentSearch,
    pub oncall: OnCallService,
    pub ingest: Arc<IngestionPipeline>,
    pub lifecycle: Arc<AlertLifecycle>,
    pub audit: AuditWriter,
    pub metrics: MetricsExporter,
}

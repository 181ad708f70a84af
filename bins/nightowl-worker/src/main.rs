//! Worker entrypoint: hosts the escalation tick loop, the ack/resolve
//! subscriber that races it, and the audit-log flusher. No request traffic
//! is served here — the only HTTP surface is the dedicated `/healthz`,
//! `/readyz`, `/metrics` listener on `observability.metrics_*`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use nightowl_audit::AuditWriter;
use nightowl_bus::EventBus;
use nightowl_core::config::{self, ConfigOverrides};
use nightowl_core::crypto::SecretKey;
use nightowl_db::Database;
use nightowl_escalation::{AckResolveSubscriber, EscalationEngine, HandoffNotifier, HANDOFF_CHECK_INTERVAL, TICK_INTERVAL};
use nightowl_notify::{NotifierDispatcher, ProviderRegistry};
use nightowl_oncall::OnCallService;
use nightowl_observability::{LogFormat, MetricsExporter, TracingConfig};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Worker ticks have a 25s budget out of the 30s tick interval; an
/// over-budget tick is aborted and simply resumes next tick since
/// `current_escalation_tier` is the only state that matters.
const TICK_BUDGET: Duration = Duration::from_secs(25);

#[derive(Debug, Parser)]
#[command(name = "nightowl-worker", about = "NightOwl escalation and audit worker")]
struct WorkerCli {
    /// Named config profile to layer on top of `config/default.toml`, e.g. "production".
    #[arg(long, env = "NIGHTOWL_PROFILE")]
    profile: Option<String>,
    /// Explicit config file, layered after the profile file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long = "metrics-bind")]
    metrics_bind: Option<String>,
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    log_format: Option<String>,
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

impl WorkerCli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            profile: self.profile.clone(),
            metrics_bind: self.metrics_bind.clone(),
            metrics_port: self.metrics_port,
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
struct WorkerState {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    metrics: MetricsExporter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = WorkerCli::parse();
    let app_config = config::load(cli.overrides()).context("failed to load configuration")?;

    let tracing_config = TracingConfig {
        service_name: "nightowl-worker".into(),
        log_format: app_config
            .observability
            .log_format
            .parse::<LogFormat>()
            .unwrap_or(LogFormat::Pretty),
        log_level: app_config.observability.log_level.clone(),
        otlp_endpoint: app_config.observability.otlp_endpoint.clone(),
        resource_attributes: vec![("service.namespace".into(), "nightowl".into())],
    };
    let (_tracing_guard, metrics) = nightowl_observability::init(&tracing_config, None)?;

    let db = Arc::new(Database::connect(&app_config.database).context("failed to initialise database pool")?);
    db.migrate_public().await.context("public schema migration failed")?;
    for tenant in db.list_tenants().await.context("failed to list tenants")? {
        db.provision_tenant_schema(&tenant.slug)
            .await
            .with_context(|| format!("failed to provision schema for tenant {}", tenant.slug))?;
    }

    let bus = Arc::new(EventBus::connect(&app_config.redis.url).await.context("failed to connect to redis event bus")?);
    let (audit, audit_flusher) = AuditWriter::spawn(db.clone());

    let secret_key = SecretKey::from_hex(&app_config.security.secret_key).context("invalid secret key")?;
    let registry = ProviderRegistry::new(secret_key);
    let notifier = NotifierDispatcher::new(registry.clone(), db.clone());
    let oncall = OnCallService::new(db.clone());
    let engine = Arc::new(EscalationEngine::new(db.clone(), oncall.clone(), notifier));

    let handoff_notifier = NotifierDispatcher::new(registry, db.clone());
    let handoff = Arc::new(HandoffNotifier::new(db.clone(), oncall, handoff_notifier));

    let subscriber = Arc::new(AckResolveSubscriber::new(bus.clone(), db.clone()));
    let mut tasks = subscriber.spawn();
    tasks.push(tokio::spawn(tick_loop(engine)));
    tasks.push(tokio::spawn(handoff_loop(handoff)));

    let state = WorkerState {
        db: db.clone(),
        bus: bus.clone(),
        metrics,
    };
    let metrics_addr = app_config.metrics_addr().context("invalid metrics bind address")?;
    let metrics_router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state);
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics endpoint on {metrics_addr}"))?;
    info!(%metrics_addr, "nightowl-worker health/metrics listener up");
    let metrics_server = tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, metrics_router.into_make_service()).await {
            error!(error = %err, "metrics server terminated");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping background tasks");

    metrics_server.abort();
    for task in tasks {
        task.abort();
    }

    audit.shutdown();
    if audit_flusher.await.is_err() {
        warn!("audit flusher task panicked during shutdown");
    }
    Ok(())
}

/// Drives the escalation engine every [`TICK_INTERVAL`], aborting a tick
/// that runs past [`TICK_BUDGET`] rather than letting it delay the next
/// one — the next tick resumes naturally from `current_escalation_tier`.
async fn tick_loop(engine: Arc<EscalationEngine>) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(TICK_BUDGET, engine.tick_all_tenants()).await {
            Ok(()) => {}
            Err(_) => warn!(elapsed_ms = started.elapsed().as_millis() as u64, "escalation tick exceeded budget, aborted"),
        }
    }
}

/// Drives the handoff cron every [`HANDOFF_CHECK_INTERVAL`], DMing the
/// incoming primary on each roster whose current shift has rolled over.
async fn handoff_loop(notifier: Arc<HandoffNotifier>) {
    let mut ticker = tokio::time::interval(HANDOFF_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        notifier.check_all_tenants().await;
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<WorkerState>) -> StatusCode {
    const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
    let db_ok = tokio::time::timeout(READY_PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(state.db.public_pool()))
        .await
        .is_ok_and(|r| r.is_ok());
    let redis_ok = tokio::time::timeout(READY_PROBE_TIMEOUT, state.bus.ping()).await.is_ok_and(|r| r.is_ok());

    if db_ok && redis_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler(State(state): State<WorkerState>) -> impl IntoResponse {
    let body = state.metrics.render();
    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=1.0.0; charset=utf-8"),
    )];
    (StatusCode::OK, headers, body)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

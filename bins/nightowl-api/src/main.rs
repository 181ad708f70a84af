//! HTTP API entrypoint: loads configuration, provisions every known
//! tenant's schema, wires the shared services and serves the router built
//! in [`routes`] until a shutdown signal arrives.

mod auth;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nightowl_audit::AuditWriter;
use nightowl_bus::EventBus;
use nightowl_core::config::{self, ConfigOverrides};
use nightowl_db::Database;
use nightowl_ingest::{AlertLifecycle, Dedup, DedupCache, IngestionPipeline};
use nightowl_oncall::OnCallService;
use nightowl_observability::{LogFormat, TracingConfig};
use nightowl_search::IncidentSearch;
use tokio::signal;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "nightowl-api", about = "NightOwl incident response API")]
struct ApiCli {
    /// Named config profile to layer on top of `config/default.toml`, e.g. "production".
    #[arg(long, env = "NIGHTOWL_PROFILE")]
    profile: Option<String>,
    /// Explicit config file, layered after the profile file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
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

impl ApiCli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            profile: self.profile.clone(),
            host: self.host.clone(),
            port: self.port,
            metrics_bind: self.metrics_bind.clone(),
            metrics_port: self.metrics_port,
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = ApiCli::parse();
    let app_config = config::load(cli.overrides()).context("failed to load configuration")?;

    let tracing_config = TracingConfig {
        service_name: "nightowl-api".into(),
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
    let dedup_cache = Arc::new(DedupCache::connect(&app_config.redis.url).await.context("failed to connect dedup cache")?);
    let dedup = Dedup::new(dedup_cache, db.clone());

    let (audit, audit_flusher) = AuditWriter::spawn(db.clone());
    let search = IncidentSearch::new(db.clone());
    let oncall = OnCallService::new(db.clone());
    let ingest = Arc::new(IngestionPipeline::new(db.clone(), dedup, search.clone(), bus.clone(), audit.clone()));
    let lifecycle = Arc::new(AlertLifecycle::new(db.clone(), bus.clone(), audit.clone()));

    let config = Arc::new(app_config);
    let state = AppState {
        config: config.clone(),
        db,
        bus,
        search,
        oncall,
        ingest,
        lifecycle,
        audit: audit.clone(),
        metrics,
    };

    let addr = config.server.bind_address().context("invalid server bind address")?;
    let router = routes::build_http_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind listener")?;
    info!(%addr, "nightowl-api listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    audit.shutdown();
    if audit_flusher.await.is_err() {
        warn!("audit flusher task panicked during shutdown");
    }
    Ok(())
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
    info!("shutdown signal received, draining in-flight requests");
}

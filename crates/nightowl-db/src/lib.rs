//! PostgreSQL pool management and per-tenant schema scoping.
//!
//! Every tenant's rows live in their own `tenant_<slug>` schema; the shared
//! enum types and the `tenants`/`api_keys` tables live in `public`. A scoped
//! connection sets `search_path` to `tenant_<slug>, public` before handing
//! the connection to a caller, and resets it before the connection returns
//! to the pool so a later caller never inherits another tenant's path.

mod rows;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use nightowl_core::config::DatabaseSection;
use nightowl_core::model::Tenant;
use nightowl_core::{NightOwlError, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use tracing::instrument;
use uuid::Uuid;

pub use rows::AlertRow;

static PUBLIC_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/public");
static TENANT_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/tenant");

/// Thin wrapper around the shared connection pool, carrying the acquire
/// timeout so callers don't have to thread it through separately.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
    acquire_timeout: Duration,
}

impl Database {
    pub fn connect(config: &DatabaseSection) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(&config.url).context("invalid postgres connection string")?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            // A connection always leaves one tenant's search_path set; reset
            // it here so the next acquirer never inherits another tenant's
            // scope before it issues its own `SET search_path`.
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("RESET search_path").execute(&mut *conn).await?;
                    Ok(true)
                })
            })
            .connect_lazy_with(options);
        Ok(Self {
            pool,
            acquire_timeout: Duration::from_secs(config.pool_timeout_secs),
        })
    }

    /// Runs the global migrations against `public`. Call once at startup.
    pub async fn migrate_public(&self) -> anyhow::Result<()> {
        PUBLIC_MIGRATOR.run(&self.pool).await.context("public migrations failed")
    }

    /// Creates `tenant_<slug>` if absent and runs the tenant migrator
    /// against it, tracked in that schema's own `_sqlx_migrations` table.
    #[instrument(skip(self))]
    pub async fn provision_tenant_schema(&self, slug: &str) -> anyhow::Result<()> {
        let schema = format!("tenant_{slug}");
        let mut conn = self.pool.acquire().await.context("acquire connection for provisioning")?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
            .execute(&mut *conn)
            .await
            .context("create tenant schema")?;
        sqlx::query(&format!("SET search_path TO \"{schema}\", public"))
            .execute(&mut *conn)
            .await
            .context("set search_path for provisioning")?;
        TENANT_MIGRATOR
            .run(&mut conn)
            .await
            .context("tenant migrations failed")?;
        Ok(())
    }

    /// Acquires a connection scoped to `schema`'s search path, mapping pool
    /// contention to `ResourceExhausted` rather than letting the timeout
    /// surface as an opaque internal error.
    pub async fn acquire_for_tenant(&self, schema: &str) -> Result<ScopedConnection> {
        let mut conn = tokio::time::timeout(self.acquire_timeout, self.pool.acquire())
            .await
            .map_err(|_| NightOwlError::ResourceExhausted("database pool exhausted".into()))?
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        sqlx::query(&format!("SET search_path TO \"{schema}\", public"))
            .execute(&mut *conn)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;
        Ok(ScopedConnection { conn })
    }

    /// An unscoped connection against `public`, for tenant/api-key lookups
    /// that precede tenant resolution.
    pub fn public_pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT id, slug, name, config FROM tenants WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    pub async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT id, slug, name, config FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    /// Every tenant, ordered by slug so worker ticks iterate deterministically.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT id, slug, name, config FROM tenants ORDER BY slug")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))
    }

    /// Looks up an API key by its hash, for the dev/API-key auth path.
    /// Touches `last_used` best-effort; a failure to record it never fails
    /// the lookup.
    pub async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<nightowl_core::model::ApiKey>> {
        let found = sqlx::query_as::<_, nightowl_core::model::ApiKey>(
            "SELECT id, tenant_id, key_hash, role, scopes, last_used, expires_at FROM api_keys WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| NightOwlError::Internal(anyhow::anyhow!(err)))?;

        if let Some(key) = &found {
            if let Err(err) = sqlx::query("UPDATE api_keys SET last_used = now() WHERE id = $1")
                .bind(key.id)
                .execute(&self.pool)
                .await
            {
                tracing::warn!(api_key_id = %key.id, error = %err, "failed to record api key last_used");
            }
        }
        Ok(found)
    }
}

/// A pool connection whose `search_path` has been set to one tenant's
/// schema. The pool's `after_release` hook resets `search_path` when this
/// is dropped and the underlying connection returns to the pool, so a
/// leaked scope never reaches a different tenant's query, even across a
/// panic.
pub struct ScopedConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
}

impl std::ops::Deref for ScopedConnection {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

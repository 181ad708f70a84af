use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row in the global `public.tenants` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    /// Arbitrary tenant configuration, including encrypted provider
    /// credentials. Never logged.
    pub config: serde_json::Value,
}

impl Tenant {
    /// The per-tenant schema name this tenant's data lives under.
    pub fn schema_name(&self) -> String {
        format!("tenant_{}", self.slug)
    }
}

/// A row in the global `public.api_keys` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key_hash: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub last_used: Option<chrono::DateTime<chrono::Utc>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Resolved identity attached to a request or worker unit of work, after
/// the tenant resolver has mapped an authenticated identity to a schema.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub slug: String,
}

impl TenantContext {
    pub fn schema_name(&self) -> String {
        format!("tenant_{}", self.slug)
    }
}

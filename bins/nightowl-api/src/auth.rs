//! Resolves an incoming request's credentials down to a `TenantContext`,
//! the piece `nightowl_core::auth::authenticate` deliberately stops short
//! of (it only gets as far as an `AuthenticatedIdentity`).

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use nightowl_core::auth::{authenticate, AuthenticatedIdentity, Credentials};
use nightowl_core::model::{Tenant, TenantContext};
use nightowl_core::NightOwlError;

use crate::state::AppState;

/// The resolved identity and tenant for one request, handed to route
/// handlers via an extractor so they never touch header parsing directly.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant: Tenant,
    pub role: String,
    pub scopes: Vec<String>,
}

impl AuthContext {
    pub fn tenant_context(&self) -> TenantContext {
        TenantContext {
            tenant_id: self.tenant.id,
            slug: self.tenant.slug.clone(),
        }
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = NightOwlError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credentials = extract_credentials(parts);
        let identity = authenticate(credentials, &state.config.security.secret_key, state.config.security.dev_mode)?;

        match identity {
            AuthenticatedIdentity::Jwt(claims) => {
                let tenant = state
                    .db
                    .find_tenant_by_slug(&claims.tenant_slug)
                    .await?
                    .ok_or(NightOwlError::Unauthorized)?;
                Ok(AuthContext { tenant, role: claims.role, scopes: claims.scopes })
            }
            AuthenticatedIdentity::ApiKey { key_hash } => {
                let key = state.db.find_api_key_by_hash(&key_hash).await?.ok_or(NightOwlError::Unauthorized)?;
                if let Some(expires_at) = key.expires_at {
                    if expires_at < chrono::Utc::now() {
                        return Err(NightOwlError::Unauthorized);
                    }
                }
                let tenant = state.db.find_tenant_by_id(key.tenant_id).await?.ok_or(NightOwlError::Unauthorized)?;
                Ok(AuthContext { tenant, role: key.role, scopes: key.scopes })
            }
            AuthenticatedIdentity::DevHeader { tenant_slug } => {
                let tenant = state.db.find_tenant_by_slug(&tenant_slug).await?.ok_or(NightOwlError::Unauthorized)?;
                Ok(AuthContext { tenant, role: "admin".to_string(), scopes: vec!["*".to_string()] })
            }
        }
    }
}

fn extract_credentials(parts: &Parts) -> Option<Credentials> {
    if let Some(value) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(Credentials::Bearer(token.to_string()));
            }
        }
    }
    if let Some(value) = parts.headers.get("x-api-key") {
        if let Ok(value) = value.to_str() {
            return Some(Credentials::ApiKey(value.to_string()));
        }
    }
    if let Some(value) = parts.headers.get("x-tenant-slug") {
        if let Ok(value) = value.to_str() {
            return Some(Credentials::DevTenantSlug(value.to_string()));
        }
    }
    None
}

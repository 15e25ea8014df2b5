//! Tenant authentication.
//!
//! Every `/v1` request resolves a [`TenantContext`] from its headers:
//! `X-Tenant-ID` selects the tenant, and depending on the configured mode
//! the request authenticates with a per-tenant API key (`X-API-Key`,
//! compared as SHA-256 digests in constant time) or a bearer JWT carrying
//! a tenant claim. Mode `none` trusts the header — development only.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use dg_domain::config::{AuthConfig, AuthMode};

use crate::error::ApiError;

/// The authenticated caller, as seen by handlers.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub api_key: Option<String>,
    /// JWT subject, when authenticated with a token.
    pub subject: Option<String>,
}

/// States that can answer "what is the auth config?" — all four service
/// states implement this so the extractor works against any of them.
pub trait AuthProvider {
    fn auth_config(&self) -> &AuthConfig;
}

/// Reject with 403 unless the resource's tenant matches the caller's.
pub fn ensure_tenant_access(expected_tenant: &str, context: &TenantContext) -> Result<(), ApiError> {
    if expected_tenant != context.tenant_id {
        return Err(ApiError::Forbidden("Tenant mismatch".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    tenant: Option<String>,
}

impl JwtClaims {
    fn tenant(&self) -> Option<&str> {
        self.tenant_id
            .as_deref()
            .or(self.tid.as_deref())
            .or(self.tenant.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

fn header<'p>(parts: &'p Parts, name: &str) -> Option<&'p str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolve the tenant context from headers against the configured mode.
pub fn resolve_tenant(
    config: &AuthConfig,
    x_tenant_id: Option<&str>,
    x_api_key: Option<&str>,
    authorization: Option<&str>,
) -> Result<TenantContext, ApiError> {
    let requested = x_tenant_id.unwrap_or(&config.default_tenant).trim();
    if requested.is_empty() {
        return Err(ApiError::BadRequest("Tenant header cannot be empty".into()));
    }

    match config.mode {
        AuthMode::None => Ok(TenantContext {
            tenant_id: requested.to_owned(),
            api_key: x_api_key.map(str::to_owned),
            subject: None,
        }),

        AuthMode::ApiKey => {
            let expected = config
                .tenant_api_keys
                .get(requested)
                .ok_or_else(|| ApiError::Unauthorized("Unknown tenant".into()))?;
            let provided = x_api_key.unwrap_or("");
            // Digest both sides so the comparison is constant-time and
            // independent of key length.
            let expected_hash = Sha256::digest(expected.as_bytes());
            let provided_hash = Sha256::digest(provided.as_bytes());
            if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
                return Err(ApiError::Unauthorized("Invalid API key".into()));
            }
            Ok(TenantContext {
                tenant_id: requested.to_owned(),
                api_key: x_api_key.map(str::to_owned),
                subject: None,
            })
        }

        AuthMode::Jwt => {
            let token = authorization
                .and_then(|v| {
                    let (scheme, token) = v.split_once(' ')?;
                    scheme.eq_ignore_ascii_case("bearer").then_some(token)
                })
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

            let mut validation = Validation::new(Algorithm::HS256);
            validation.required_spec_claims.clear();
            validation.set_audience(
                &config
                    .jwt_audience
                    .as_deref()
                    .map(|a| vec![a])
                    .unwrap_or_default(),
            );
            if config.jwt_audience.is_none() {
                validation.validate_aud = false;
            }
            if let Some(issuer) = &config.jwt_issuer {
                validation.set_issuer(&[issuer]);
            }

            let decoded = jsonwebtoken::decode::<JwtClaims>(
                token,
                &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
                &validation,
            )
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {e}")))?;

            let claims = decoded.claims;
            if let Some(token_tenant) = claims.tenant() {
                if token_tenant != requested {
                    return Err(ApiError::Forbidden(
                        "Tenant mismatch between token and header".into(),
                    ));
                }
            }
            let resolved = claims.tenant().unwrap_or(requested).to_owned();
            Ok(TenantContext {
                tenant_id: resolved,
                api_key: None,
                subject: claims.sub.filter(|s| !s.is_empty()),
            })
        }
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: AuthProvider + Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        resolve_tenant(
            state.auth_config(),
            header(parts, "x-tenant-id"),
            header(parts, "x-api-key"),
            header(parts, "authorization"),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! Tenant access tokens.
//!
//! The tenant API resolves its tenant from the `sub` claim of an HS256 token
//! minted by operators. Nothing else in a request can name a tenant.

use std::collections::HashSet;

use jwt_simple::prelude::{
    Claims, Duration as JwtDuration, HS256Key, MACLike, NoCustomClaims, VerificationOptions,
};

use crate::error::{AppError, Result};

pub const TENANT_TOKEN_ISSUER: &str = "licensehook";

pub struct TenantTokenKey {
    key: HS256Key,
}

impl TenantTokenKey {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: HS256Key::from_bytes(secret.as_bytes()),
        }
    }

    /// Mint a token whose subject is the tenant id.
    pub fn mint(&self, tenant_id: &str, ttl: std::time::Duration) -> Result<String> {
        let claims = Claims::create(JwtDuration::from_secs(ttl.as_secs()))
            .with_issuer(TENANT_TOKEN_ISSUER)
            .with_subject(tenant_id);

        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign tenant token: {}", e)))
    }

    /// Verify signature, issuer and expiry. Returns the tenant id.
    pub fn verify(&self, token: &str) -> Result<String> {
        let mut allowed_issuers = HashSet::new();
        allowed_issuers.insert(TENANT_TOKEN_ISSUER.to_string());

        let options = VerificationOptions {
            allowed_issuers: Some(allowed_issuers),
            ..Default::default()
        };

        let claims = self
            .key
            .verify_token::<NoCustomClaims>(token, Some(options))
            .map_err(|e| {
                tracing::debug!("Tenant token rejected: {}", e);
                AppError::Unauthorized
            })?;

        claims
            .subject
            .filter(|sub| !sub.is_empty())
            .ok_or(AppError::Unauthorized)
    }
}

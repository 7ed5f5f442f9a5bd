//! Tenant context resolution.
//!
//! The tenant of a request comes only from its verified bearer token. A
//! request that also names a tenant (query string, header or JSON body) is
//! rejected as a spoofing attempt, even when the named tenant is its own.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    middleware::Next,
    response::Response,
};
use serde::de::DeserializeOwned;

use crate::db::{self, AppState, queries};
use crate::error::AppError;
use crate::util::extract_bearer_token;

/// Field names that would let a caller pick a tenant.
pub const TENANT_FIELD_NAMES: &[&str] = &["tenant_id", "tenantid", "tenant"];

pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
}

fn is_tenant_field(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    TENANT_FIELD_NAMES.contains(&lowered.as_str())
}

fn reject_tenant_in_query(query: Option<&str>) -> Result<(), AppError> {
    let Some(query) = query else {
        return Ok(());
    };
    match url::form_urlencoded::parse(query.as_bytes()).find(|(key, _)| is_tenant_field(key)) {
        Some((key, _)) => Err(AppError::SpoofingAttempt(format!("query {}", key))),
        None => Ok(()),
    }
}

pub async fn tenant_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    reject_tenant_in_query(request.uri().query())?;
    if request.headers().contains_key(TENANT_HEADER) {
        return Err(AppError::SpoofingAttempt(format!("header {}", TENANT_HEADER)));
    }

    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let tenant_id = state.tenant_tokens.verify(token)?;

    let lookup_id = tenant_id.clone();
    let tenant = db::blocking(&state.db, move |conn| queries::get_tenant(conn, &lookup_id)).await?;
    match tenant {
        Some(tenant) if tenant.active => {}
        Some(_) => {
            tracing::warn!(target: "security", tenant_id = %tenant_id, "Request for deactivated tenant");
            return Err(AppError::Forbidden("Tenant is deactivated".into()));
        }
        None => return Err(AppError::Forbidden("Unknown tenant".into())),
    }

    request.extensions_mut().insert(TenantContext { tenant_id });
    Ok(next.run(request).await)
}

/// First tenant field anywhere in a JSON document, as a dotted path.
fn find_tenant_field(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => map.iter().find_map(|(key, child)| {
            if is_tenant_field(key) {
                Some(key.clone())
            } else {
                find_tenant_field(child).map(|path| format!("{}.{}", key, path))
            }
        }),
        serde_json::Value::Array(items) => items.iter().find_map(find_tenant_field),
        _ => None,
    }
}

/// JSON body for tenant routes. Tenant fields at any depth are refused before
/// the body is deserialized.
#[derive(Debug, Clone)]
pub struct TenantJson<T>(pub T);

impl<S, T> FromRequest<S> for TenantJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;

        if let Some(path) = find_tenant_field(&value) {
            return Err(AppError::SpoofingAttempt(format!("body {}", path)));
        }

        let parsed = serde_json::from_value(value)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
        Ok(TenantJson(parsed))
    }
}

use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, TenantScope, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::{License, LicenseHistoryEntry, Tenant};

#[derive(Debug, Deserialize)]
pub struct SetTenantActiveRequest {
    pub active: bool,
}

/// Activate or deactivate a tenant. Deactivated tenants are refused by the tenant API.
pub async fn set_tenant_active(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<SetTenantActiveRequest>,
) -> Result<Json<Tenant>> {
    let conn = state.db.get()?;
    if !queries::set_tenant_active(&conn, &tenant_id, req.active)? {
        return Err(AppError::NotFound(format!("Tenant {} not found", tenant_id)));
    }
    tracing::info!(tenant_id = %tenant_id, active = req.active, "Tenant activation changed");

    let tenant = queries::get_tenant(&conn, &tenant_id)?
        .ok_or_else(|| AppError::NotFound(format!("Tenant {} not found", tenant_id)))?;
    Ok(Json(tenant))
}

#[derive(Debug, Serialize)]
pub struct TenantLicenseDetail {
    pub license: License,
    pub history: Vec<LicenseHistoryEntry>,
}

/// Latest license of a tenant with its full status history.
pub async fn get_tenant_license(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantLicenseDetail>> {
    let conn = state.db.get()?;
    let scope = TenantScope::new(&conn, &tenant_id);
    let license = scope
        .latest_license()?
        .ok_or_else(|| AppError::NotFound(format!("No license for tenant {}", tenant_id)))?;
    let history = scope.history(&license.id)?;

    Ok(Json(TenantLicenseDetail { license, history }))
}

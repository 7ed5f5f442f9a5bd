//! Read-only license views for a tenant's own applications.

use axum::{
    Extension, Router, middleware,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, TenantScope, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::{TenantContext, TenantJson, tenant_auth};
use crate::models::{FeatureMatrix, License, LicenseStatus};
use crate::rate_limit::standard_layer;

pub fn router(state: AppState, requests_per_minute: u32) -> Router<AppState> {
    let router = Router::new()
        .route("/tenant/license", get(get_license))
        .route("/tenant/license/check-feature", post(check_feature))
        .layer(middleware::from_fn_with_state(state, tenant_auth));

    // Outermost, so throttled callers never reach token verification.
    match standard_layer(requests_per_minute) {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

/// Display form of a key: the stored prefix followed by masked groups.
pub fn mask_key(prefix: &str) -> String {
    format!("{}-*****-*****-*****-*****", prefix)
}

#[derive(Debug, Serialize)]
pub struct TenantLicenseView {
    pub id: String,
    pub plan: String,
    pub status: LicenseStatus,
    pub features: FeatureMatrix,
    pub expires_at: Option<i64>,
    pub masked_key: String,
    pub validation_count: i64,
    pub last_validated_at: Option<i64>,
    pub status_reason: Option<String>,
    pub updated_at: i64,
}

impl From<License> for TenantLicenseView {
    fn from(license: License) -> Self {
        Self {
            masked_key: mask_key(&license.key_prefix),
            id: license.id,
            plan: license.plan,
            status: license.status,
            features: license.features,
            expires_at: license.expires_at,
            validation_count: license.validation_count,
            last_validated_at: license.last_validated_at,
            status_reason: license.status_reason,
            updated_at: license.updated_at,
        }
    }
}

fn load_license(state: &AppState, tenant_id: &str) -> Result<License> {
    let conn = state.db.get()?;
    let scope = TenantScope::new(&conn, tenant_id);
    match scope.current_license()? {
        Some(license) => Ok(license),
        None => scope
            .latest_license()?
            .ok_or_else(|| AppError::NotFound("No license for this tenant".into())),
    }
}

pub async fn get_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<TenantLicenseView>> {
    let license = load_license(&state, &ctx.tenant_id)?;
    Ok(Json(license.into()))
}

#[derive(Debug, Deserialize)]
pub struct CheckFeatureRequest {
    pub feature: String,
}

#[derive(Debug, Serialize)]
pub struct CheckFeatureResponse {
    pub feature: String,
    pub enabled: bool,
}

/// A feature is enabled only while the license itself is usable.
pub async fn check_feature(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    TenantJson(req): TenantJson<CheckFeatureRequest>,
) -> Result<Json<CheckFeatureResponse>> {
    let license = load_license(&state, &ctx.tenant_id)?;

    let usable = matches!(license.status, LicenseStatus::Active | LicenseStatus::Trial)
        && !license.is_past_expiry(queries::now());

    Ok(Json(CheckFeatureResponse {
        enabled: usable && license.has_feature(&req.feature),
        feature: req.feature,
    }))
}

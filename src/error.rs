use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::LicenseStatus;

/// Client-facing messages shared between modules and tests.
pub mod msg {
    pub const INVALID_SIGNATURE: &str = "Invalid signature";
    pub const INVALID_PAYLOAD: &str = "Invalid event payload";
    pub const TENANT_SPOOFING: &str = "Tenant identifiers must not be supplied in requests";
    pub const RATE_LIMITED: &str = "Too many requests";
    pub const LICENSE_NOT_PROVISIONED: &str = "License not provisioned yet";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Webhook signature missing, malformed, stale or wrong.
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A caller supplied a tenant identifier where only a verified one is allowed.
    #[error("Tenant spoofing attempt: {0}")]
    SpoofingAttempt(String),

    #[error("Illegal license transition: {from} -> {to}")]
    IllegalTransition {
        from: LicenseStatus,
        to: LicenseStatus,
    },

    /// Compare-and-set on the license version lost a race.
    #[error("Version conflict on license {0}")]
    VersionConflict(String),

    /// A job targets a tenant whose license does not exist yet.
    #[error("License not provisioned for tenant {0}")]
    LicenseNotProvisioned(String),

    /// Queue operation attempted with a lease that expired or was re-granted.
    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Timed out")]
    Timeout,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Store/pool failures, lost CAS races and not-yet-provisioned licenses are
    /// transient. Business rule violations are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::VersionConflict(_)
                | AppError::LicenseNotProvisioned(_)
                | AppError::Timeout
        )
    }

    /// Stable machine-readable code included in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) | AppError::Json(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Forbidden(_) => "forbidden",
            AppError::SpoofingAttempt(_) => "tenant_spoofing",
            AppError::IllegalTransition { .. } => "illegal_transition",
            AppError::VersionConflict(_) => "version_conflict",
            AppError::LicenseNotProvisioned(_) => "not_provisioned",
            AppError::LeaseLost(_) => "lease_lost",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Timeout => "timeout",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, msg::INVALID_SIGNATURE, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::SpoofingAttempt(field) => {
                tracing::warn!(target: "security", "Rejected request carrying tenant field '{}'", field);
                (StatusCode::BAD_REQUEST, msg::TENANT_SPOOFING, None)
            }
            AppError::IllegalTransition { .. } => {
                (StatusCode::CONFLICT, "Conflict", Some(self.to_string()))
            }
            AppError::VersionConflict(_) | AppError::LeaseLost(_) => {
                (StatusCode::CONFLICT, "Conflict", None)
            }
            AppError::LicenseNotProvisioned(_) => {
                (StatusCode::CONFLICT, msg::LICENSE_NOT_PROVISIONED, None)
            }
            AppError::RateLimited { retry_after_secs } => {
                let body = ErrorResponse {
                    error: msg::RATE_LIMITED.to_string(),
                    code,
                    details: None,
                };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            AppError::Timeout => {
                tracing::warn!("Request exceeded its time budget");
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::debug!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

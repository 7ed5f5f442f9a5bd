use axum::extract::State;

use crate::db::{self, AppState, queries};
use crate::error::Result;
use crate::extractors::{ClientIp, Json};
use crate::validator::{ValidationRequest, ValidationResponse};

/// Denials are 200 with `valid: false`; only throttling is an error status.
pub async fn validate_license(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<ValidationRequest>,
) -> Result<Json<ValidationResponse>> {
    let validator = state.validator.clone();
    let outcome = db::blocking(&state.db, move |conn| {
        validator.validate(conn, &req, Some(ip), queries::now())
    })
    .await?;

    Ok(Json(outcome.into()))
}

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::crypto::hash_secret;
use crate::db::AppState;
use crate::error::AppError;
use crate::util::extract_bearer_token;

/// Gate for the ops API. Compares the hash of the presented key in constant time.
///
/// Without a configured key the ops API does not exist.
pub async fn operator_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.operator_key_hash.as_deref() else {
        return Err(AppError::NotFound("Operator API is disabled".into()));
    };

    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let presented = hash_secret(token);

    if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!(target: "security", path = %request.uri().path(), "Rejected operator request with a bad key");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

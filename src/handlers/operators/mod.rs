mod jobs;
mod tenants;

pub use jobs::*;
pub use tenants::*;

use axum::{
    Router, middleware,
    routing::{get, put},
};

use crate::db::AppState;
use crate::middleware::operator_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/ops/dead-letters", get(list_dead_letters))
        .route("/ops/jobs/{job_id}", get(get_job))
        .route("/ops/queue/stats", get(queue_stats))
        .route("/ops/validation-attempts", get(list_validation_attempts))
        .route("/ops/tenants/{tenant_id}", put(set_tenant_active))
        .route("/ops/tenants/{tenant_id}/license", get(get_tenant_license))
        .layer(middleware::from_fn_with_state(state, operator_auth))
}

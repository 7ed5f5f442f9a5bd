pub mod operators;
pub mod public;
pub mod tenant;
pub mod webhooks;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;
use crate::rate_limit::RateLimitConfig;

/// Full HTTP surface. License validation is throttled by the validator itself;
/// the tenant API gets a per-IP layer.
pub fn app(state: AppState, limits: &RateLimitConfig) -> Router {
    Router::new()
        .merge(public::router())
        .merge(webhooks::router())
        .merge(tenant::router(state.clone(), limits.tenant_api_rpm))
        .merge(operators::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

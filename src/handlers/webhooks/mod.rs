mod receiver;

pub use receiver::*;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/events", post(receive_event))
}

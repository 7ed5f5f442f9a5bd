//! Queue inspection for operators.

use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{Job, QueueStats, ValidationAttempt};
use crate::pagination::{Paginated, PaginationQuery};

/// Dead-lettered jobs, newest first.
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Job>>> {
    let conn = state.db.get()?;
    let items = state
        .queue
        .list_dead_letters(&conn, query.limit(), query.offset())?;
    let total = state.queue.stats(&conn)?.dead_lettered;

    Ok(Json(Paginated::new(items, total, &query)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>> {
    let conn = state.db.get()?;
    let job = state
        .queue
        .get_job(&conn, &job_id)?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;
    Ok(Json(job))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>> {
    let conn = state.db.get()?;
    Ok(Json(state.queue.stats(&conn)?))
}

/// Validation attempts (audit trail), newest first.
pub async fn list_validation_attempts(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<ValidationAttempt>>> {
    let conn = state.db.get()?;
    let items = queries::list_validation_attempts(&conn, query.limit(), query.offset())?;
    let total = queries::count_validation_attempts(&conn)?;

    Ok(Json(Paginated::new(items, total, &query)))
}

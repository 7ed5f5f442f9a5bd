//! Periodic maintenance: the expiry sweep and retention cleanup.

use std::time::Duration;

use rusqlite::Connection;

use crate::db::{self, AppState, queries};
use crate::error::Result;
use crate::licensing::expire_due_licenses;

const SECONDS_PER_DAY: i64 = 86400;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Retention windows in days. 0 keeps rows forever.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub job_retention_days: i64,
    pub validation_retention_days: i64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub jobs_purged: usize,
    pub attempts_purged: usize,
}

/// Purge succeeded jobs and old validation attempts. Dead letters are kept for operators.
pub fn run_cleanup(conn: &Connection, state: &AppState, policy: RetentionPolicy, now: i64) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    if policy.job_retention_days > 0 {
        let cutoff = now - policy.job_retention_days * SECONDS_PER_DAY;
        report.jobs_purged = state.queue.purge_succeeded(conn, cutoff)?;
    }
    if policy.validation_retention_days > 0 {
        report.attempts_purged =
            queries::purge_old_validation_attempts(conn, policy.validation_retention_days, now)?;
    }
    state.validator.retain_recent();

    Ok(report)
}

/// Marks trial/active licenses past `expires_at` as expired, on a fixed interval.
pub fn spawn_expiry_sweep(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match db::blocking(&state.db, |conn| expire_due_licenses(conn, queries::now())).await {
                Ok(0) => {}
                Ok(count) => tracing::info!("Expiry sweep expired {} license(s)", count),
                Err(e) => tracing::warn!("Expiry sweep failed: {}", e),
            }
        }
    });
    tracing::info!("Expiry sweep started (every {}s)", interval.as_secs());
}

pub fn spawn_cleanup_task(state: AppState, policy: RetentionPolicy) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;
            let task_state = state.clone();
            let result = db::blocking(&state.db, move |conn| {
                run_cleanup(conn, &task_state, policy, queries::now())
            })
            .await;
            match result {
                Ok(report) if report != CleanupReport::default() => tracing::debug!(
                    jobs = report.jobs_purged,
                    attempts = report.attempts_purged,
                    "Retention cleanup removed rows"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!("Retention cleanup failed: {}", e),
            }
        }
    });
    tracing::info!("Background cleanup task started (runs hourly)");
}

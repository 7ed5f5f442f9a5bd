use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    EXTERNAL_EVENT_COLS, JOB_COLS, LICENSE_COLS, LICENSE_HISTORY_COLS, TENANT_COLS,
    VALIDATION_ATTEMPT_COLS, query_all, query_one,
};

const SECONDS_PER_DAY: i64 = 86400;

pub fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Tenants ============

/// Returns true if the tenant was created by this call.
pub fn ensure_tenant(conn: &Connection, tenant_id: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO tenants (id, active, created_at) VALUES (?1, 1, ?2)",
        params![tenant_id, now],
    )?;
    Ok(affected > 0)
}

pub fn get_tenant(conn: &Connection, tenant_id: &str) -> Result<Option<Tenant>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tenants WHERE id = ?1", TENANT_COLS),
        &[&tenant_id],
    )
}

pub fn set_tenant_active(conn: &Connection, tenant_id: &str, active: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE tenants SET active = ?1 WHERE id = ?2",
        params![active as i32, tenant_id],
    )?;
    Ok(affected > 0)
}

// ============ Idempotency Ledger ============

/// Insert-if-absent on the event id. Returns false for an event seen before.
pub fn try_record_external_event(conn: &Connection, event: &ExternalEvent) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO external_events
            (external_event_id, event_type, received_at, correlation_id, raw_payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.external_event_id,
            event.event_type,
            event.received_at,
            event.correlation_id,
            event.raw_payload,
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_external_event(conn: &Connection, external_event_id: &str) -> Result<Option<ExternalEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM external_events WHERE external_event_id = ?1",
            EXTERNAL_EVENT_COLS
        ),
        &[&external_event_id],
    )
}

pub fn count_external_events(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM external_events", [], |row| row.get(0))?)
}

// ============ Jobs ============

pub fn insert_job(conn: &Connection, input: &NewJob, max_attempts: u32, now: i64) -> Result<Job> {
    let id = gen_id();
    let payload = serde_json::to_string(&input.payload)?;
    conn.execute(
        "INSERT INTO jobs (id, job_type, correlation_id, external_event_id, payload, status,
                           attempt_count, max_attempts, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7, ?7, ?7)",
        params![
            id,
            input.job_type.as_ref(),
            input.correlation_id,
            input.external_event_id,
            payload,
            max_attempts,
            now,
        ],
    )?;

    Ok(Job {
        id,
        job_type: input.job_type,
        correlation_id: input.correlation_id.clone(),
        external_event_id: input.external_event_id.clone(),
        payload: input.payload.clone(),
        status: JobStatus::Pending,
        attempt_count: 0,
        max_attempts,
        next_attempt_at: now,
        lease_token: None,
        lease_expires_at: None,
        last_error: None,
        dead_letter_reason: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    query_one(
        conn,
        &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLS),
        &[&id],
    )
}

pub fn list_jobs_for_event(conn: &Connection, external_event_id: &str) -> Result<Vec<Job>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM jobs WHERE external_event_id = ?1 ORDER BY created_at",
            JOB_COLS
        ),
        &[&external_event_id],
    )
}

/// In-flight jobs whose lease lapsed after their last allowed attempt.
pub fn list_expired_exhausted_jobs(conn: &Connection, now: i64) -> Result<Vec<Job>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM jobs
             WHERE status = 'in_progress' AND lease_expires_at <= ?1
               AND attempt_count >= max_attempts",
            JOB_COLS
        ),
        &[&now],
    )
}

/// Oldest job that is due, or whose lease has lapsed with budget left.
pub fn next_claimable_job_id(conn: &Connection, now: i64) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;

    Ok(conn
        .query_row(
            "SELECT id FROM jobs
             WHERE (status IN ('pending', 'failed') AND next_attempt_at <= ?1)
                OR (status = 'in_progress' AND lease_expires_at <= ?1
                    AND attempt_count < max_attempts)
             ORDER BY next_attempt_at, created_at
             LIMIT 1",
            params![now],
            |row| row.get(0),
        )
        .optional()?)
}

/// Grant a lease. Counts as a delivery attempt.
pub fn claim_job(
    conn: &Connection,
    id: &str,
    lease_token: &str,
    lease_expires_at: i64,
    now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE jobs
         SET status = 'in_progress', attempt_count = attempt_count + 1,
             lease_token = ?2, lease_expires_at = ?3, updated_at = ?4
         WHERE id = ?1
           AND ((status IN ('pending', 'failed') AND next_attempt_at <= ?4)
             OR (status = 'in_progress' AND lease_expires_at <= ?4
                 AND attempt_count < max_attempts))",
        params![id, lease_token, lease_expires_at, now],
    )?;
    Ok(affected > 0)
}

pub fn complete_job(conn: &Connection, id: &str, lease_token: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE jobs
         SET status = 'succeeded', lease_token = NULL, lease_expires_at = NULL, updated_at = ?3
         WHERE id = ?1 AND lease_token = ?2 AND status = 'in_progress'",
        params![id, lease_token, now],
    )?;
    Ok(affected > 0)
}

pub fn reschedule_job(
    conn: &Connection,
    id: &str,
    lease_token: &str,
    error: &str,
    next_attempt_at: i64,
    now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE jobs
         SET status = 'failed', last_error = ?3, next_attempt_at = ?4,
             lease_token = NULL, lease_expires_at = NULL, updated_at = ?5
         WHERE id = ?1 AND lease_token = ?2 AND status = 'in_progress'",
        params![id, lease_token, error, next_attempt_at, now],
    )?;
    Ok(affected > 0)
}

/// With a token, only the current lease holder may dead-letter the job.
/// Without one, only lapsed in-flight jobs qualify.
pub fn dead_letter_job(
    conn: &Connection,
    id: &str,
    lease_token: Option<&str>,
    reason: DeadLetterReason,
    error: &str,
    now: i64,
) -> Result<bool> {
    let affected = match lease_token {
        Some(token) => conn.execute(
            "UPDATE jobs
             SET status = 'dead_lettered', dead_letter_reason = ?3, last_error = ?4,
                 lease_token = NULL, lease_expires_at = NULL, updated_at = ?5
             WHERE id = ?1 AND lease_token = ?2 AND status = 'in_progress'",
            params![id, token, reason.as_ref(), error, now],
        )?,
        None => conn.execute(
            "UPDATE jobs
             SET status = 'dead_lettered', dead_letter_reason = ?2, last_error = ?3,
                 lease_token = NULL, lease_expires_at = NULL, updated_at = ?4
             WHERE id = ?1 AND status = 'in_progress' AND lease_expires_at <= ?4",
            params![id, reason.as_ref(), error, now],
        )?,
    };
    Ok(affected > 0)
}

pub fn job_stats(conn: &Connection) -> Result<QueueStats> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

    let mut stats = QueueStats::default();
    for row in rows {
        let (status, count) = row?;
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Pending) => stats.pending = count,
            Ok(JobStatus::InProgress) => stats.in_progress = count,
            Ok(JobStatus::Failed) => stats.failed = count,
            Ok(JobStatus::Succeeded) => stats.succeeded = count,
            Ok(JobStatus::DeadLettered) => stats.dead_lettered = count,
            Err(_) => tracing::warn!("Unknown job status in database: {}", status),
        }
    }
    Ok(stats)
}

pub fn list_dead_letters(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Job>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM jobs WHERE status = 'dead_lettered'
             ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
            JOB_COLS
        ),
        &[&limit, &offset],
    )
}

pub fn purge_succeeded_jobs(conn: &Connection, older_than: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM jobs WHERE status = 'succeeded' AND updated_at < ?1",
        params![older_than],
    )?;
    Ok(deleted)
}

// ============ Licenses ============

pub fn insert_license(
    conn: &Connection,
    input: &NewLicense,
    key_hash: &str,
    key_prefix: &str,
    now: i64,
) -> Result<License> {
    let id = gen_id();
    let features = serde_json::to_string(&input.features)?;
    conn.execute(
        "INSERT INTO licenses (id, tenant_id, plan, status, features, expires_at,
                               validation_count, version, key_hash, key_prefix,
                               customer_email_hash, last_event_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            id,
            input.tenant_id,
            input.plan,
            input.status.as_ref(),
            features,
            input.expires_at,
            key_hash,
            key_prefix,
            input.customer_email_hash,
            input.event_at,
            now,
        ],
    )?;

    Ok(License {
        id,
        tenant_id: input.tenant_id.clone(),
        plan: input.plan.clone(),
        status: input.status,
        features: input.features.clone(),
        expires_at: input.expires_at,
        validation_count: 0,
        last_validated_at: None,
        status_reason: None,
        version: 1,
        key_hash: key_hash.to_string(),
        key_prefix: key_prefix.to_string(),
        customer_email_hash: input.customer_email_hash.clone(),
        last_event_at: input.event_at,
        created_at: now,
        updated_at: now,
    })
}

/// The tenant's non-revoked license, if any.
pub fn get_current_license_for_tenant(conn: &Connection, tenant_id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE tenant_id = ?1 AND status <> 'revoked'",
            LICENSE_COLS
        ),
        &[&tenant_id],
    )
}

/// The tenant's most recent license in any status.
pub fn get_latest_license_for_tenant(conn: &Connection, tenant_id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE tenant_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            LICENSE_COLS
        ),
        &[&tenant_id],
    )
}

pub fn get_license_by_key_hash(conn: &Connection, key_hash: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key_hash = ?1", LICENSE_COLS),
        &[&key_hash],
    )
}

/// Compare-and-set write of every mutable license field.
///
/// Succeeds only if the stored row still has `expected_version`; the caller
/// supplies the already bumped version in `updated.version`.
pub fn cas_update_license(
    conn: &Connection,
    updated: &License,
    expected_version: i64,
    now: i64,
) -> Result<bool> {
    let features = serde_json::to_string(&updated.features)?;
    let affected = conn.execute(
        "UPDATE licenses
         SET plan = ?1, status = ?2, features = ?3, expires_at = ?4, status_reason = ?5,
             version = ?6, last_event_at = ?7, updated_at = ?8
         WHERE id = ?9 AND tenant_id = ?10 AND version = ?11",
        params![
            updated.plan,
            updated.status.as_ref(),
            features,
            updated.expires_at,
            updated.status_reason,
            updated.version,
            updated.last_event_at,
            now,
            updated.id,
            updated.tenant_id,
            expected_version,
        ],
    )?;
    Ok(affected > 0)
}

/// Validation counters live outside the versioned state.
pub fn record_successful_validation(conn: &Connection, license_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE licenses SET validation_count = validation_count + 1, last_validated_at = ?2
         WHERE id = ?1",
        params![license_id, now],
    )?;
    Ok(())
}

/// Trial and active licenses whose expiry has passed.
pub fn list_licenses_past_expiry(conn: &Connection, now: i64) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses
             WHERE status IN ('trial', 'active') AND expires_at IS NOT NULL AND expires_at <= ?1",
            LICENSE_COLS
        ),
        &[&now],
    )
}

// ============ License History ============

#[allow(clippy::too_many_arguments)]
pub fn insert_license_history(
    conn: &Connection,
    license_id: &str,
    tenant_id: &str,
    from_status: Option<LicenseStatus>,
    to_status: LicenseStatus,
    version: i64,
    reason: Option<&str>,
    correlation_id: Option<&str>,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO license_history
            (license_id, tenant_id, from_status, to_status, version, reason, correlation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            license_id,
            tenant_id,
            from_status.map(|s| s.as_ref().to_string()),
            to_status.as_ref(),
            version,
            reason,
            correlation_id,
            now,
        ],
    )?;
    Ok(())
}

pub fn list_license_history(
    conn: &Connection,
    tenant_id: &str,
    license_id: &str,
) -> Result<Vec<LicenseHistoryEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_history WHERE tenant_id = ?1 AND license_id = ?2 ORDER BY id",
            LICENSE_HISTORY_COLS
        ),
        &[&tenant_id, &license_id],
    )
}

// ============ Validation Attempts ============

pub fn insert_validation_attempt(
    conn: &Connection,
    license_id: Option<&str>,
    key_prefix: Option<&str>,
    caller_ip: Option<&str>,
    result: &str,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO validation_attempts (license_id, key_prefix, caller_ip, result, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![license_id, key_prefix, caller_ip, result, now],
    )?;
    Ok(())
}

pub fn list_validation_attempts(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<ValidationAttempt>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM validation_attempts ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            VALIDATION_ATTEMPT_COLS
        ),
        &[&limit, &offset],
    )
}

pub fn count_validation_attempts(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM validation_attempts", [], |row| row.get(0))?)
}

pub fn purge_old_validation_attempts(conn: &Connection, retention_days: i64, now: i64) -> Result<usize> {
    let cutoff = now - retention_days * SECONDS_PER_DAY;
    let deleted = conn.execute(
        "DELETE FROM validation_attempts WHERE timestamp < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

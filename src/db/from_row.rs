//! Row mapping trait and helpers shared by the query functions.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;

use crate::models::*;

/// Parse a text column into a strum enum, surfacing bad values as column type errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?
        .parse::<T>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text))
}

fn parse_opt_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text)),
        None => Ok(None),
    }
}

fn parse_json<T: DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const TENANT_COLS: &str = "id, active, created_at";

pub const EXTERNAL_EVENT_COLS: &str =
    "external_event_id, event_type, received_at, correlation_id, raw_payload";

pub const JOB_COLS: &str = "id, job_type, correlation_id, external_event_id, payload, status, attempt_count, max_attempts, next_attempt_at, lease_token, lease_expires_at, last_error, dead_letter_reason, created_at, updated_at";

pub const LICENSE_COLS: &str = "id, tenant_id, plan, status, features, expires_at, validation_count, last_validated_at, status_reason, version, key_hash, key_prefix, customer_email_hash, last_event_at, created_at, updated_at";

pub const LICENSE_HISTORY_COLS: &str =
    "id, license_id, tenant_id, from_status, to_status, version, reason, correlation_id, created_at";

pub const VALIDATION_ATTEMPT_COLS: &str =
    "id, license_id, key_prefix, caller_ip, result, timestamp";

// ============ FromRow Implementations ============

impl FromRow for Tenant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Tenant {
            id: row.get(0)?,
            active: row.get::<_, i32>(1)? != 0,
            created_at: row.get(2)?,
        })
    }
}

impl FromRow for ExternalEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ExternalEvent {
            external_event_id: row.get(0)?,
            event_type: row.get(1)?,
            received_at: row.get(2)?,
            correlation_id: row.get(3)?,
            raw_payload: row.get(4)?,
        })
    }
}

impl FromRow for Job {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Job {
            id: row.get(0)?,
            job_type: parse_enum(row, 1, "job_type")?,
            correlation_id: row.get(2)?,
            external_event_id: row.get(3)?,
            payload: parse_json(row, 4)?,
            status: parse_enum(row, 5, "status")?,
            attempt_count: row.get(6)?,
            max_attempts: row.get(7)?,
            next_attempt_at: row.get(8)?,
            lease_token: row.get(9)?,
            lease_expires_at: row.get(10)?,
            last_error: row.get(11)?,
            dead_letter_reason: parse_opt_enum(row, 12, "dead_letter_reason")?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            plan: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            features: parse_json(row, 4)?,
            expires_at: row.get(5)?,
            validation_count: row.get(6)?,
            last_validated_at: row.get(7)?,
            status_reason: row.get(8)?,
            version: row.get(9)?,
            key_hash: row.get(10)?,
            key_prefix: row.get(11)?,
            customer_email_hash: row.get(12)?,
            last_event_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl FromRow for LicenseHistoryEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseHistoryEntry {
            id: row.get(0)?,
            license_id: row.get(1)?,
            tenant_id: row.get(2)?,
            from_status: parse_opt_enum(row, 3, "from_status")?,
            to_status: parse_enum(row, 4, "to_status")?,
            version: row.get(5)?,
            reason: row.get(6)?,
            correlation_id: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for ValidationAttempt {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ValidationAttempt {
            id: row.get(0)?,
            license_id: row.get(1)?,
            key_prefix: row.get(2)?,
            caller_ip: row.get(3)?,
            result: row.get(4)?,
            timestamp: row.get(5)?,
        })
    }
}

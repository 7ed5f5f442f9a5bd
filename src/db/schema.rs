use rusqlite::Connection;

/// Bump when the schema changes. Stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Connection-level settings applied to every pooled connection.
pub const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
"#;

/// Create tables, indexes and guard triggers. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        -- Idempotency ledger: the primary key is the dedupe constraint.
        CREATE TABLE IF NOT EXISTS external_events (
            external_event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            correlation_id TEXT NOT NULL,
            raw_payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_external_events_received ON external_events(received_at);

        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL CHECK (job_type IN
                ('provision', 'suspend', 'reactivate', 'revoke', 'generic_process', 'notify')),
            correlation_id TEXT NOT NULL,
            external_event_id TEXT REFERENCES external_events(external_event_id),
            payload TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN
                ('pending', 'in_progress', 'succeeded', 'failed', 'dead_lettered')),
            attempt_count INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            next_attempt_at INTEGER NOT NULL,
            lease_token TEXT,
            lease_expires_at INTEGER,
            last_error TEXT,
            dead_letter_reason TEXT CHECK (dead_letter_reason IS NULL OR dead_letter_reason IN
                ('exhausted', 'rejected')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_ready ON jobs(status, next_attempt_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(status, lease_expires_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_event_type
            ON jobs(external_event_id, job_type) WHERE external_event_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            plan TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN
                ('trial', 'active', 'expired', 'suspended', 'revoked')),
            features TEXT NOT NULL DEFAULT '{}',
            expires_at INTEGER,
            validation_count INTEGER NOT NULL DEFAULT 0,
            last_validated_at INTEGER,
            status_reason TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            key_hash TEXT NOT NULL UNIQUE,
            key_prefix TEXT NOT NULL,
            customer_email_hash TEXT,
            last_event_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_tenant ON licenses(tenant_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_expiry ON licenses(status, expires_at);
        -- One current license per tenant; revoked rows are history.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_licenses_current
            ON licenses(tenant_id) WHERE status <> 'revoked';

        CREATE TABLE IF NOT EXISTS license_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            tenant_id TEXT NOT NULL,
            from_status TEXT,
            to_status TEXT NOT NULL,
            version INTEGER NOT NULL,
            reason TEXT,
            correlation_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_license_history_license ON license_history(license_id, id);

        CREATE TABLE IF NOT EXISTS validation_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            license_id TEXT,
            key_prefix TEXT,
            caller_ip TEXT,
            result TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_validation_attempts_license ON validation_attempts(license_id);
        CREATE INDEX IF NOT EXISTS idx_validation_attempts_time ON validation_attempts(timestamp);

        -- Guard triggers. The application enforces the same rules; these catch
        -- anything that bypasses it.

        CREATE TRIGGER IF NOT EXISTS licenses_no_delete
        BEFORE DELETE ON licenses
        BEGIN
            SELECT RAISE(ABORT, 'licenses are never deleted');
        END;

        CREATE TRIGGER IF NOT EXISTS licenses_guard_update
        BEFORE UPDATE ON licenses
        BEGIN
            SELECT RAISE(ABORT, 'license tenant_id is immutable')
            WHERE NEW.tenant_id <> OLD.tenant_id;

            SELECT RAISE(ABORT, 'revoked license is terminal')
            WHERE OLD.status = 'revoked' AND NEW.status <> 'revoked';

            SELECT RAISE(ABORT, 'illegal license status transition')
            WHERE NEW.status <> OLD.status AND NOT (
                (OLD.status = 'trial' AND NEW.status IN ('active', 'expired', 'revoked')) OR
                (OLD.status = 'active' AND NEW.status IN ('expired', 'suspended', 'revoked')) OR
                (OLD.status = 'expired' AND NEW.status IN ('active', 'revoked')) OR
                (OLD.status = 'suspended' AND NEW.status IN ('active', 'revoked'))
            );

            SELECT RAISE(ABORT, 'license version must increase on status change')
            WHERE NEW.status <> OLD.status AND NEW.version <= OLD.version;

            SELECT RAISE(ABORT, 'license version cannot decrease')
            WHERE NEW.version < OLD.version;
        END;

        CREATE TRIGGER IF NOT EXISTS external_events_immutable
        BEFORE UPDATE ON external_events
        BEGIN
            SELECT RAISE(ABORT, 'external events are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS external_events_no_delete
        BEFORE DELETE ON external_events
        BEGIN
            SELECT RAISE(ABORT, 'external events are retained');
        END;

        CREATE TRIGGER IF NOT EXISTS validation_attempts_append_only
        BEFORE UPDATE ON validation_attempts
        BEGIN
            SELECT RAISE(ABORT, 'validation attempts are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS license_history_append_only
        BEFORE UPDATE ON license_history
        BEGIN
            SELECT RAISE(ABORT, 'license history is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS jobs_guard_update
        BEFORE UPDATE ON jobs
        BEGIN
            SELECT RAISE(ABORT, 'job attempt_count cannot decrease')
            WHERE NEW.attempt_count < OLD.attempt_count;

            SELECT RAISE(ABORT, 'finished jobs are final')
            WHERE OLD.status IN ('succeeded', 'dead_lettered');
        END;
        "#,
    )?;

    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

//! Tenant-scoped license access.
//!
//! Every read and write through a `TenantScope` is filtered by its tenant id,
//! and every returned row is checked again before it is handed out.

use rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{License, LicenseHistoryEntry, LicenseStatus, NewLicense};

use super::queries;

pub struct TenantScope<'a> {
    conn: &'a Connection,
    tenant_id: &'a str,
}

impl<'a> TenantScope<'a> {
    pub fn new(conn: &'a Connection, tenant_id: &'a str) -> Self {
        Self { conn, tenant_id }
    }

    pub fn tenant_id(&self) -> &str {
        self.tenant_id
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    fn check(&self, license: License) -> Result<License> {
        if license.tenant_id != self.tenant_id {
            tracing::error!(
                target: "security",
                scope_tenant = %self.tenant_id,
                row_tenant = %license.tenant_id,
                license_id = %license.id,
                "Cross-tenant row returned to scoped query"
            );
            return Err(AppError::Forbidden("Cross-tenant access denied".into()));
        }
        Ok(license)
    }

    fn check_owned(&self, license: &License) -> Result<()> {
        if license.tenant_id != self.tenant_id {
            tracing::error!(
                target: "security",
                scope_tenant = %self.tenant_id,
                row_tenant = %license.tenant_id,
                "Attempted write to another tenant's license"
            );
            return Err(AppError::Forbidden("Cross-tenant access denied".into()));
        }
        Ok(())
    }

    /// The tenant's non-revoked license.
    pub fn current_license(&self) -> Result<Option<License>> {
        queries::get_current_license_for_tenant(self.conn, self.tenant_id)?
            .map(|l| self.check(l))
            .transpose()
    }

    /// The tenant's most recent license, revoked included.
    pub fn latest_license(&self) -> Result<Option<License>> {
        queries::get_latest_license_for_tenant(self.conn, self.tenant_id)?
            .map(|l| self.check(l))
            .transpose()
    }

    pub fn create_license(&self, input: &NewLicense, key_hash: &str, key_prefix: &str, now: i64) -> Result<License> {
        if input.tenant_id != self.tenant_id {
            tracing::error!(
                target: "security",
                scope_tenant = %self.tenant_id,
                requested_tenant = %input.tenant_id,
                "Attempted license creation for another tenant"
            );
            return Err(AppError::Forbidden("Cross-tenant access denied".into()));
        }
        queries::insert_license(self.conn, input, key_hash, key_prefix, now)
    }

    /// Compare-and-set write. Returns false if `expected_version` is stale.
    pub fn update_license(&self, updated: &License, expected_version: i64, now: i64) -> Result<bool> {
        self.check_owned(updated)?;
        queries::cas_update_license(self.conn, updated, expected_version, now)
    }

    pub fn record_history(
        &self,
        license: &License,
        from_status: Option<LicenseStatus>,
        reason: Option<&str>,
        correlation_id: Option<&str>,
        now: i64,
    ) -> Result<()> {
        self.check_owned(license)?;
        queries::insert_license_history(
            self.conn,
            &license.id,
            self.tenant_id,
            from_status,
            license.status,
            license.version,
            reason,
            correlation_id,
            now,
        )
    }

    pub fn history(&self, license_id: &str) -> Result<Vec<LicenseHistoryEntry>> {
        let rows = queries::list_license_history(self.conn, self.tenant_id, license_id)?;
        if rows.iter().any(|r| r.tenant_id != self.tenant_id) {
            tracing::error!(target: "security", scope_tenant = %self.tenant_id, "Cross-tenant history row returned");
            return Err(AppError::Forbidden("Cross-tenant access denied".into()));
        }
        Ok(rows)
    }
}

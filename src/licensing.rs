//! License lifecycle.
//!
//! Every status change, whether driven by a webhook job or by the expiry
//! sweep, goes through [`apply_transition`]. It enforces the transition table,
//! drops events older than the newest one already applied, and writes with a
//! compare-and-set on `version`.

use rusqlite::Connection;

use crate::crypto::{generate_license_key, hash_secret, key_prefix};
use crate::db::{TenantScope, queries};
use crate::error::{AppError, Result};
use crate::models::{FeatureMatrix, License, LicenseStatus, NewLicense};

/// Plan assigned when a provisioning event does not name one.
pub const DEFAULT_PLAN: &str = "standard";

/// Requested change to a license. `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct LicenseChange {
    pub status: Option<LicenseStatus>,
    pub plan: Option<String>,
    pub features: Option<FeatureMatrix>,
    pub expires_at: Option<i64>,
    pub reason: Option<String>,
}

impl LicenseChange {
    pub fn to_status(status: LicenseStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied { license: License, previous: License },
    /// Nothing to change. The license may still have recorded a newer event time.
    AlreadySatisfied(License),
    /// The event is older than the newest one applied to this license.
    Stale(License),
}

impl TransitionOutcome {
    pub fn license(&self) -> &License {
        match self {
            TransitionOutcome::Applied { license, .. } => license,
            TransitionOutcome::AlreadySatisfied(license) | TransitionOutcome::Stale(license) => {
                license
            }
        }
    }
}

/// Apply `change` to `license` inside the caller's transaction.
///
/// `event_at` is the sender timestamp of the driving event; `None` marks a
/// system change (expiry sweep) which is never considered stale.
pub fn apply_transition(
    scope: &TenantScope,
    license: &License,
    change: &LicenseChange,
    event_at: Option<i64>,
    correlation_id: Option<&str>,
    now: i64,
) -> Result<TransitionOutcome> {
    if let Some(at) = event_at {
        if at < license.last_event_at {
            tracing::info!(
                license_id = %license.id,
                event_at = at,
                last_event_at = license.last_event_at,
                "Ignoring stale event for license"
            );
            return Ok(TransitionOutcome::Stale(license.clone()));
        }
    }

    let from = license.status;
    let to = change.status.unwrap_or(from);

    let mut updated = license.clone();
    updated.status = to;
    if let Some(plan) = &change.plan {
        updated.plan = plan.clone();
    }
    if let Some(features) = &change.features {
        updated.features = features.clone();
    }
    if change.expires_at.is_some() {
        updated.expires_at = change.expires_at;
    }

    let status_changed = to != from;
    let substantive = status_changed
        || updated.plan != license.plan
        || updated.features != license.features
        || updated.expires_at != license.expires_at;

    if substantive && (from.is_terminal() || (status_changed && !from.can_transition_to(to))) {
        tracing::error!(
            license_id = %license.id,
            tenant_id = %license.tenant_id,
            correlation_id = correlation_id.unwrap_or(""),
            "Illegal license transition {} -> {}",
            from,
            to
        );
        return Err(AppError::IllegalTransition { from, to });
    }

    let newer_event = event_at.is_some_and(|at| at > license.last_event_at);
    if !substantive && !newer_event {
        return Ok(TransitionOutcome::AlreadySatisfied(license.clone()));
    }

    if status_changed {
        updated.status_reason = change.reason.clone();
    }
    if let Some(at) = event_at {
        updated.last_event_at = updated.last_event_at.max(at);
    }
    updated.version = license.version + 1;
    updated.updated_at = now;

    if !scope.update_license(&updated, license.version, now)? {
        tracing::debug!(license_id = %license.id, version = license.version, "License version conflict");
        return Err(AppError::VersionConflict(license.id.clone()));
    }

    if !substantive {
        return Ok(TransitionOutcome::AlreadySatisfied(updated));
    }

    if status_changed {
        scope.record_history(&updated, Some(from), change.reason.as_deref(), correlation_id, now)?;
        tracing::info!(
            license_id = %updated.id,
            tenant_id = %updated.tenant_id,
            version = updated.version,
            correlation_id = correlation_id.unwrap_or(""),
            "License {} -> {}",
            from,
            to
        );
    }

    Ok(TransitionOutcome::Applied {
        license: updated,
        previous: license.clone(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub plan: Option<String>,
    /// Only `trial` or `active`. Defaults to `active`.
    pub initial_status: Option<LicenseStatus>,
    pub features: Option<FeatureMatrix>,
    pub expires_at: Option<i64>,
    pub customer_email_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProvisionOutcome {
    /// A new license was issued. The raw key is only available here.
    Created { license: License, license_key: String },
    Existing(TransitionOutcome),
}

/// Create the tenant's license, or move the existing one to `active`.
pub fn provision(
    scope: &TenantScope,
    request: &ProvisionRequest,
    event_at: i64,
    correlation_id: Option<&str>,
    now: i64,
) -> Result<ProvisionOutcome> {
    if let Some(license) = scope.current_license()? {
        let change = LicenseChange {
            status: Some(LicenseStatus::Active),
            plan: request.plan.clone(),
            features: request.features.clone(),
            expires_at: request.expires_at,
            reason: None,
        };
        return apply_transition(scope, &license, &change, Some(event_at), correlation_id, now)
            .map(ProvisionOutcome::Existing);
    }

    // A provisioning event that predates the last revocation must not resurrect the tenant.
    if let Some(previous) = scope.latest_license()? {
        if event_at < previous.last_event_at {
            tracing::info!(
                tenant_id = %scope.tenant_id(),
                license_id = %previous.id,
                "Ignoring provisioning event older than last revocation"
            );
            return Ok(ProvisionOutcome::Existing(TransitionOutcome::Stale(previous)));
        }
    }

    let status = request.initial_status.unwrap_or(LicenseStatus::Active);
    if !status.is_initial() {
        return Err(AppError::BadRequest(format!(
            "Licenses cannot start in status {}",
            status
        )));
    }

    let license_key = generate_license_key();
    let input = NewLicense {
        tenant_id: scope.tenant_id().to_string(),
        plan: request.plan.clone().unwrap_or_else(|| DEFAULT_PLAN.to_string()),
        status,
        features: request.features.clone().unwrap_or_default(),
        expires_at: request.expires_at,
        customer_email_hash: request.customer_email_hash.clone(),
        event_at,
    };

    let license = match scope.create_license(&input, &hash_secret(&license_key), &key_prefix(&license_key), now) {
        Ok(license) => license,
        // Another worker provisioned this tenant concurrently; retry sees it.
        Err(AppError::Database(rusqlite::Error::SqliteFailure(e, _)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(AppError::VersionConflict(format!("tenant {}", scope.tenant_id())));
        }
        Err(e) => return Err(e),
    };

    scope.record_history(&license, None, Some("provisioned"), correlation_id, now)?;
    tracing::info!(
        license_id = %license.id,
        tenant_id = %license.tenant_id,
        key_prefix = %license.key_prefix,
        status = %license.status,
        "License provisioned"
    );

    Ok(ProvisionOutcome::Created {
        license,
        license_key,
    })
}

/// Move trial/active licenses past `expires_at` to `expired`. Returns how many moved.
///
/// Each license is handled in its own transaction; a lost race is left for
/// the next sweep.
pub fn expire_due_licenses(conn: &mut Connection, now: i64) -> Result<usize> {
    let due = queries::list_licenses_past_expiry(conn, now)?;
    let mut expired = 0;

    for license in due {
        let tx = conn.transaction()?;
        let result = {
            let scope = TenantScope::new(&tx, &license.tenant_id);
            apply_transition(
                &scope,
                &license,
                &LicenseChange::to_status(LicenseStatus::Expired)
                    .with_reason(Some("expiry reached".into())),
                None,
                None,
                now,
            )
        };

        match result {
            Ok(TransitionOutcome::Applied { .. }) => {
                tx.commit()?;
                expired += 1;
            }
            Ok(_) => {}
            Err(AppError::VersionConflict(_)) => {
                tracing::debug!(license_id = %license.id, "Expiry sweep lost a race, will retry");
            }
            Err(e) => {
                tracing::warn!(license_id = %license.id, "Expiry sweep failed for license: {}", e);
            }
        }
    }

    if expired > 0 {
        tracing::info!("Expiry sweep moved {} license(s) to expired", expired);
    }
    Ok(expired)
}

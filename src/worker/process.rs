//! Synchronous processing of license jobs.
//!
//! A license job runs in one IMMEDIATE transaction: the license change, the
//! follow-up `notify` job and the ack commit together or not at all.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::{AppState, TenantScope, queries};
use crate::error::{AppError, Result};
use crate::licensing::{
    LicenseChange, ProvisionOutcome, ProvisionRequest, TransitionOutcome, apply_transition,
    provision,
};
use crate::models::{
    Job, JobType, License, LicenseJobPayload, NewJob, NotificationKind, NotifyPayload,
};
use crate::payments::WebhookEvent;

/// Process a leased license job and settle it with ack, nack or reject.
///
/// Errors are only returned when the queue itself could not be updated.
pub fn run_license_job(conn: &mut Connection, state: &AppState, job: &Job, now: i64) -> Result<()> {
    match apply_and_ack(conn, state, job, now) {
        Ok(()) => {
            tracing::info!(
                job_id = %job.id,
                job_type = %job.job_type,
                correlation_id = %job.correlation_id,
                attempt = job.attempt_count,
                "Job succeeded"
            );
            Ok(())
        }
        Err(AppError::LeaseLost(_)) => {
            tracing::warn!(job_id = %job.id, "Lease lost while processing, leaving job to its new holder");
            Ok(())
        }
        Err(e) if e.is_transient() => {
            settle(state.queue.nack(conn, job, &e.to_string(), now).map(|_| ()), job)
        }
        Err(e) => {
            tracing::error!(
                job_id = %job.id,
                job_type = %job.job_type,
                correlation_id = %job.correlation_id,
                code = e.code(),
                "Job rejected: {}",
                e
            );
            settle(state.queue.reject(conn, job, &e.to_string(), now), job)
        }
    }
}

fn settle(result: Result<()>, job: &Job) -> Result<()> {
    match result {
        Err(AppError::LeaseLost(_)) => {
            tracing::warn!(job_id = %job.id, "Lease lost before the failure could be recorded");
            Ok(())
        }
        other => other,
    }
}

fn apply_and_ack(conn: &mut Connection, state: &AppState, job: &Job, now: i64) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    apply_license_job(&tx, state, job, now)?;
    state.queue.ack(&tx, job, now)?;
    tx.commit()?;
    Ok(())
}

/// Load the verified event behind a job and check it agrees with the job.
///
/// The tenant is always taken from the stored event, never from the job payload.
fn load_event(conn: &Connection, job: &Job) -> Result<WebhookEvent> {
    let payload: LicenseJobPayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| AppError::BadRequest(format!("Malformed job payload: {}", e)))?;

    if job.external_event_id.as_deref() != Some(payload.external_event_id.as_str()) {
        return Err(AppError::BadRequest("Job payload references a different event".into()));
    }

    let stored = queries::get_external_event(conn, &payload.external_event_id)?.ok_or_else(|| {
        AppError::BadRequest(format!("Event {} not recorded", payload.external_event_id))
    })?;
    let event = WebhookEvent::parse(stored.raw_payload.as_bytes())?;

    if event.data.tenant_id != payload.tenant_id {
        tracing::error!(
            target: "security",
            job_id = %job.id,
            event_id = %stored.external_event_id,
            event_tenant = %event.data.tenant_id,
            job_tenant = %payload.tenant_id,
            "Job tenant does not match its verified event"
        );
        return Err(AppError::SpoofingAttempt("job tenant_id".into()));
    }
    if event.created != payload.occurred_at {
        tracing::error!(
            job_id = %job.id,
            event_id = %stored.external_event_id,
            event_created = event.created,
            job_occurred_at = payload.occurred_at,
            "Job timestamp does not match its verified event"
        );
        return Err(AppError::BadRequest("Job payload timestamp differs from its event".into()));
    }
    Ok(event)
}

fn apply_license_job(conn: &Connection, state: &AppState, job: &Job, now: i64) -> Result<()> {
    let event = load_event(conn, job)?;
    let tenant_id = event.data.tenant_id.as_str();
    let scope = TenantScope::new(conn, tenant_id);
    let correlation_id = Some(job.correlation_id.as_str());

    let notification = match job.job_type {
        JobType::Provision => {
            queries::ensure_tenant(conn, tenant_id, now)?;
            let request = ProvisionRequest {
                plan: event.data.plan.clone(),
                initial_status: event.data.status,
                features: event.data.features.clone(),
                expires_at: event.data.expires_at,
                customer_email_hash: event
                    .data
                    .customer_email
                    .as_deref()
                    .map(|email| state.email_hasher.hash(email)),
            };
            match provision(&scope, &request, event.created, correlation_id, now)? {
                ProvisionOutcome::Created {
                    license,
                    license_key,
                } => {
                    let sealed = state.master_key.seal_to_string(tenant_id, &license_key)?;
                    Some(notification_for(&license, NotificationKind::LicenseIssued, Some(sealed)))
                }
                ProvisionOutcome::Existing(outcome) => applied_notification(&outcome),
            }
        }
        JobType::Suspend | JobType::Reactivate | JobType::Revoke => {
            let target = job
                .job_type
                .target_status()
                .ok_or_else(|| AppError::Internal(format!("No target status for {}", job.job_type)))?;
            let license = load_license(&scope)?;
            let change = LicenseChange::to_status(target).with_reason(event.data.reason.clone());
            let outcome = apply_transition(&scope, &license, &change, Some(event.created), correlation_id, now)?;
            applied_notification(&outcome)
        }
        JobType::GenericProcess => {
            let license = load_license(&scope)?;
            let change = LicenseChange {
                status: None,
                plan: event.data.plan.clone(),
                features: event.data.features.clone(),
                expires_at: event.data.expires_at,
                reason: event.data.reason.clone(),
            };
            let outcome = apply_transition(&scope, &license, &change, Some(event.created), correlation_id, now)?;
            applied_notification(&outcome)
        }
        JobType::Notify => {
            return Err(AppError::Internal("Notify jobs are not license jobs".into()));
        }
    };

    if let Some(notification) = notification {
        state.queue.enqueue(
            conn,
            &NewJob {
                job_type: JobType::Notify,
                correlation_id: job.correlation_id.clone(),
                external_event_id: Some(event.id.clone()),
                payload: serde_json::to_value(&notification)?,
            },
            now,
        )?;
    }
    Ok(())
}

/// Current license, or the last revoked one. Missing means the provisioning
/// event has not been processed yet, which retrying can fix.
fn load_license(scope: &TenantScope) -> Result<License> {
    if let Some(license) = scope.current_license()? {
        return Ok(license);
    }
    scope
        .latest_license()?
        .ok_or_else(|| AppError::LicenseNotProvisioned(scope.tenant_id().to_string()))
}

fn applied_notification(outcome: &TransitionOutcome) -> Option<NotifyPayload> {
    match outcome {
        TransitionOutcome::Applied { license, previous } => {
            let kind = if license.status != previous.status {
                NotificationKind::StatusChanged
            } else {
                NotificationKind::PlanChanged
            };
            Some(notification_for(license, kind, None))
        }
        TransitionOutcome::AlreadySatisfied(_) | TransitionOutcome::Stale(_) => None,
    }
}

fn notification_for(license: &License, kind: NotificationKind, sealed_key: Option<String>) -> NotifyPayload {
    NotifyPayload {
        tenant_id: license.tenant_id.clone(),
        license_id: license.id.clone(),
        kind,
        status: license.status,
        plan: license.plan.clone(),
        features: license.features.clone(),
        sealed_key,
    }
}

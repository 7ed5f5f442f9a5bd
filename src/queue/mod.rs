//! Durable job queue on SQLite.
//!
//! Delivery is at-least-once: a job is leased for `lease_secs`, and a lease
//! that lapses without `ack`/`nack` makes the job eligible again. Every lease
//! counts as an attempt, so crashed workers consume the retry budget too.
//! `ack`, `nack` and `reject` require the token of the current lease.

mod backoff;

pub use backoff::RetryPolicy;

use rusqlite::{Connection, TransactionBehavior};

use crate::alerts::{DeadLetterAlert, DeadLetterAlerter};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{DeadLetterReason, Job, NewJob, QueueStats};

/// Stored error messages are truncated to this many characters.
const MAX_ERROR_LEN: usize = 1000;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub lease_secs: i64,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lease_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Rescheduled; eligible again at the given unix second.
    Retrying { next_attempt_at: i64 },
    DeadLettered,
}

pub struct JobQueue {
    config: QueueConfig,
    alerter: DeadLetterAlerter,
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}

fn lease_token(job: &Job) -> Result<&str> {
    job.lease_token
        .as_deref()
        .ok_or_else(|| AppError::LeaseLost(job.id.clone()))
}

impl JobQueue {
    pub fn new(config: QueueConfig, alerter: DeadLetterAlerter) -> Self {
        Self { config, alerter }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn enqueue(&self, conn: &Connection, job: &NewJob, now: i64) -> Result<Job> {
        let job = queries::insert_job(conn, job, self.config.max_attempts, now)?;
        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            correlation_id = %job.correlation_id,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Claim the next due job, if any.
    ///
    /// Runs in an IMMEDIATE transaction so concurrent workers never claim the
    /// same job. Lapsed leases on exhausted jobs are dead-lettered first.
    pub fn lease(&self, conn: &mut Connection, now: i64) -> Result<Option<Job>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut dead = Vec::new();
        for job in queries::list_expired_exhausted_jobs(&tx, now)? {
            let error = job
                .last_error
                .clone()
                .unwrap_or_else(|| "lease expired on final attempt".to_string());
            if queries::dead_letter_job(&tx, &job.id, None, DeadLetterReason::Exhausted, &error, now)? {
                dead.push((job, error));
            }
        }

        let leased = match queries::next_claimable_job_id(&tx, now)? {
            Some(id) => {
                let token = queries::gen_id();
                let expires_at = now + self.config.lease_secs;
                if queries::claim_job(&tx, &id, &token, expires_at, now)? {
                    queries::get_job(&tx, &id)?
                } else {
                    None
                }
            }
            None => None,
        };

        tx.commit()?;

        for (job, error) in dead {
            self.alerter
                .alert(DeadLetterAlert::for_job(&job, DeadLetterReason::Exhausted, &error, now));
        }

        if let Some(job) = &leased {
            tracing::debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempt_count,
                "Job leased"
            );
        }
        Ok(leased)
    }

    pub fn ack(&self, conn: &Connection, job: &Job, now: i64) -> Result<()> {
        if !queries::complete_job(conn, &job.id, lease_token(job)?, now)? {
            return Err(AppError::LeaseLost(job.id.clone()));
        }
        Ok(())
    }

    /// Record a transient failure. Dead-letters once the attempt budget is spent.
    pub fn nack(&self, conn: &Connection, job: &Job, error: &str, now: i64) -> Result<NackOutcome> {
        let token = lease_token(job)?;
        let error = truncate_error(error);

        if job.attempt_count >= job.max_attempts {
            if !queries::dead_letter_job(conn, &job.id, Some(token), DeadLetterReason::Exhausted, &error, now)? {
                return Err(AppError::LeaseLost(job.id.clone()));
            }
            self.alerter
                .alert(DeadLetterAlert::for_job(job, DeadLetterReason::Exhausted, &error, now));
            return Ok(NackOutcome::DeadLettered);
        }

        let next_attempt_at = self.config.retry.next_attempt_at(job.attempt_count, now);
        if !queries::reschedule_job(conn, &job.id, token, &error, next_attempt_at, now)? {
            return Err(AppError::LeaseLost(job.id.clone()));
        }
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempt_count,
            max_attempts = job.max_attempts,
            next_attempt_at,
            "Job failed, retry scheduled: {}",
            error
        );
        Ok(NackOutcome::Retrying { next_attempt_at })
    }

    /// Terminal business failure: dead-letter without further retries.
    pub fn reject(&self, conn: &Connection, job: &Job, error: &str, now: i64) -> Result<()> {
        let error = truncate_error(error);
        if !queries::dead_letter_job(conn, &job.id, Some(lease_token(job)?), DeadLetterReason::Rejected, &error, now)? {
            return Err(AppError::LeaseLost(job.id.clone()));
        }
        self.alerter
            .alert(DeadLetterAlert::for_job(job, DeadLetterReason::Rejected, &error, now));
        Ok(())
    }

    pub fn get_job(&self, conn: &Connection, id: &str) -> Result<Option<Job>> {
        queries::get_job(conn, id)
    }

    pub fn stats(&self, conn: &Connection) -> Result<QueueStats> {
        queries::job_stats(conn)
    }

    pub fn list_dead_letters(&self, conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Job>> {
        queries::list_dead_letters(conn, limit, offset)
    }

    /// Delete succeeded jobs last touched before `older_than`. Dead letters are kept.
    pub fn purge_succeeded(&self, conn: &Connection, older_than: i64) -> Result<usize> {
        queries::purge_succeeded_jobs(conn, older_than)
    }
}

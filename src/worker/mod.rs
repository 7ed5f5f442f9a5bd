//! Job workers.
//!
//! Each worker task loops: lease a job, process it, settle it. SQLite work runs
//! on the blocking pool; notification delivery runs on the async runtime.

mod process;

pub use process::run_license_job;

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{self, AppState, queries};
use crate::error::Result;
use crate::models::{Job, JobType, NotifyPayload};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks.
    pub concurrency: usize,
    /// Idle delay between lease attempts when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    state: AppState,
}

impl Worker {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Lease and process at most one job. Returns false when nothing was due.
    pub async fn run_once(&self) -> Result<bool> {
        let queue = self.state.queue.clone();
        let leased = db::blocking(&self.state.db, move |conn| queue.lease(conn, queries::now())).await?;

        let Some(job) = leased else {
            return Ok(false);
        };

        match job.job_type {
            JobType::Notify => self.run_notify(job).await?,
            _ => {
                let state = self.state.clone();
                db::blocking(&self.state.db, move |conn| {
                    run_license_job(conn, &state, &job, queries::now())
                })
                .await?
            }
        }
        Ok(true)
    }

    /// Process jobs until none are due. Returns how many were handled.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.run_once().await? {
            handled += 1;
        }
        Ok(handled)
    }

    async fn run_notify(&self, job: Job) -> Result<()> {
        // Delivery must finish inside the lease, or another worker may pick the job up.
        let budget = Duration::from_secs(self.state.queue.config().lease_secs.max(1) as u64);

        let outcome: std::result::Result<(), (bool, String)> =
            match serde_json::from_value::<NotifyPayload>(job.payload.clone()) {
                Err(e) => Err((false, format!("Malformed notify payload: {}", e))),
                Ok(payload) => match tokio::time::timeout(budget, self.state.notifier.notify(&payload)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err((e.is_retryable(), e.to_string())),
                    Err(_) => Err((true, "Notification timed out".to_string())),
                },
            };

        let queue = self.state.queue.clone();
        db::blocking(&self.state.db, move |conn| {
            let now = queries::now();
            let result = match &outcome {
                Ok(()) => queue.ack(conn, &job, now),
                Err((true, error)) => queue.nack(conn, &job, error, now).map(|_| ()),
                Err((false, error)) => {
                    tracing::error!(job_id = %job.id, "Notification rejected: {}", error);
                    queue.reject(conn, &job, error, now)
                }
            };
            match result {
                Err(crate::error::AppError::LeaseLost(_)) => {
                    tracing::warn!(job_id = %job.id, "Lease lost during notification delivery");
                    Ok(())
                }
                other => other,
            }
        })
        .await
    }
}

/// Fixed set of worker tasks sharing one shutdown signal.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn spawn(state: AppState, config: &WorkerConfig) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handles = (0..config.concurrency.max(1))
            .map(|id| {
                let worker = Worker::new(state.clone());
                let mut rx = rx.clone();
                let poll_interval = config.poll_interval;

                tokio::spawn(async move {
                    loop {
                        if *rx.borrow() {
                            break;
                        }
                        match worker.run_once().await {
                            Ok(true) => continue,
                            Ok(false) => {}
                            Err(e) => tracing::warn!(worker = id, "Worker iteration failed: {}", e),
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        tracing::info!("Started {} job worker(s)", config.concurrency.max(1));
        Self { handles, shutdown }
    }

    /// Signal all workers and wait for in-flight jobs to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
        tracing::info!("Job workers stopped");
    }
}

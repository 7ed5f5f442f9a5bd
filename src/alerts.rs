//! Dead-letter alerting.
//!
//! Every dead-lettered job is logged on the `dead_letter` target. When
//! `DEAD_LETTER_ALERT_URL` is set, an alert is also POSTed there from a
//! background task; delivery failures never affect the queue.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

use crate::models::{DeadLetterReason, Job, JobType};

/// Quick retries so a flapping receiver does not pile up tasks.
const ALERT_RETRY_DELAYS: &[u64] = &[250, 1000];

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterAlert {
    pub event: &'static str,
    pub job_id: String,
    pub job_type: JobType,
    pub correlation_id: String,
    pub reason: DeadLetterReason,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub timestamp: i64,
}

impl DeadLetterAlert {
    pub fn for_job(job: &Job, reason: DeadLetterReason, error: &str, now: i64) -> Self {
        Self {
            event: "job_dead_lettered",
            job_id: job.id.clone(),
            job_type: job.job_type,
            correlation_id: job.correlation_id.clone(),
            reason,
            attempts: job.attempt_count,
            last_error: Some(error.to_string()).filter(|e| !e.is_empty()),
            timestamp: now,
        }
    }
}

#[derive(Clone, Default)]
pub struct DeadLetterAlerter {
    client: Client,
    url: Option<String>,
}

impl DeadLetterAlerter {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    pub fn alert(&self, alert: DeadLetterAlert) {
        tracing::error!(
            target: "dead_letter",
            job_id = %alert.job_id,
            job_type = %alert.job_type,
            correlation_id = %alert.correlation_id,
            reason = alert.reason.as_ref(),
            attempts = alert.attempts,
            last_error = alert.last_error.as_deref().unwrap_or(""),
            "Job dead-lettered"
        );

        let Some(url) = self.url.clone() else {
            return;
        };
        // Queue calls can run on plain threads (tests, CLI); skip the webhook there.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(job_id = %alert.job_id, "No async runtime, dead-letter webhook skipped");
            return;
        };

        let client = self.client.clone();
        let label = format!("dead-letter alert for job {}", alert.job_id);
        handle.spawn(guarded(label, async move {
            post_with_retries(&client, &url, &alert).await;
        }));
    }
}

/// Wrap a background future so a panic is logged instead of vanishing.
pub fn guarded<F>(label: String, fut: F) -> impl Future<Output = ()> + Send
where
    F: Future<Output = ()> + Send,
{
    AssertUnwindSafe(fut).catch_unwind().map(move |result| {
        if let Err(panic) = result {
            let panic_msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Background task panicked ({}): {}", label, panic_msg);
        }
    })
}

async fn post_with_retries<T: Serialize>(client: &Client, url: &str, body: &T) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(ALERT_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(body)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => tracing::debug!("Alert webhook returned {}", resp.status()),
            Err(e) => tracing::debug!("Alert webhook failed: {}", e),
        }
    }

    tracing::warn!(
        "Alert webhook failed after {} attempts",
        ALERT_RETRY_DELAYS.len() + 1
    );
}

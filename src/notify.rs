//! Outbound notification boundary.
//!
//! Notifications are delivered by `notify` jobs, so a failing receiver only
//! retries its own job and never rolls back the license change behind it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::MasterKey;
use crate::models::{FeatureMatrix, LicenseStatus, NotificationKind, NotifyPayload};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification receiver returned status {0}")]
    Status(u16),

    /// The payload can never be delivered (e.g. a sealed key that does not open).
    #[error("Notification payload rejected: {0}")]
    Payload(String),
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NotifyError::Payload(_))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &NotifyPayload) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. License keys are never logged.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &NotifyPayload) -> Result<(), NotifyError> {
        tracing::info!(
            tenant_id = %n.tenant_id,
            license_id = %n.license_id,
            kind = ?n.kind,
            status = %n.status,
            plan = %n.plan,
            has_key = n.sealed_key.is_some(),
            "License notification"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct OutboundNotification<'a> {
    tenant_id: &'a str,
    license_id: &'a str,
    kind: NotificationKind,
    status: LicenseStatus,
    plan: &'a str,
    features: &'a FeatureMatrix,
    #[serde(skip_serializing_if = "Option::is_none")]
    license_key: Option<String>,
}

/// POSTs notifications as JSON to a configured URL. The sealed license key is
/// opened just before sending.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    master_key: MasterKey,
}

impl WebhookNotifier {
    pub fn new(url: String, master_key: MasterKey) -> Self {
        Self {
            client: Client::new(),
            url,
            master_key,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, n: &NotifyPayload) -> Result<(), NotifyError> {
        let license_key = match &n.sealed_key {
            Some(sealed) => Some(
                self.master_key
                    .open_string(&n.tenant_id, sealed)
                    .map_err(|e| NotifyError::Payload(e.to_string()))?,
            ),
            None => None,
        };

        let body = OutboundNotification {
            tenant_id: &n.tenant_id,
            license_id: &n.license_id,
            kind: n.kind,
            status: n.status,
            plan: &n.plan,
            features: &n.features,
            license_key,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

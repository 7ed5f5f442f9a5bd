use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result, msg};
use crate::models::{FeatureMatrix, JobType, LicenseStatus};

/// Signed event envelope as delivered by the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Sender clock, unix seconds. Used to order events per license.
    pub created: i64,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    pub tenant_id: String,
    #[serde(default)]
    pub plan: Option<String>,
    /// Initial status for a new license; only `trial` or `active` are honored.
    #[serde(default)]
    pub status: Option<LicenseStatus>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub features: Option<FeatureMatrix>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl WebhookEvent {
    /// Parse and validate the raw body. Only called after the signature checked out.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let event: WebhookEvent = serde_json::from_slice(raw).map_err(|e| {
            tracing::warn!("Webhook payload rejected: {}", e);
            AppError::BadRequest(msg::INVALID_PAYLOAD.into())
        })?;

        if event.id.trim().is_empty() {
            return Err(AppError::BadRequest("Event id is required".into()));
        }
        if event.event_type.trim().is_empty() {
            return Err(AppError::BadRequest("Event type is required".into()));
        }
        if event.data.tenant_id.trim().is_empty() {
            return Err(AppError::BadRequest("Event tenant_id is required".into()));
        }
        match event.data.status {
            Some(status) if !status.is_initial() => {
                return Err(AppError::BadRequest(format!(
                    "Event status must be trial or active, got {}",
                    status
                )));
            }
            _ => {}
        }
        Ok(event)
    }

    pub fn job_type(&self) -> Option<JobType> {
        job_type_for(&self.event_type)
    }
}

/// Fixed event type routing. Unknown types are recorded but never enqueued.
pub fn job_type_for(event_type: &str) -> Option<JobType> {
    match event_type {
        "checkout.completed" | "subscription.renewed" | "invoice.paid" => Some(JobType::Provision),
        "subscription.suspended" | "invoice.payment_failed" => Some(JobType::Suspend),
        "subscription.resumed" | "subscription.reactivated" => Some(JobType::Reactivate),
        "charge.refunded" | "subscription.revoked" => Some(JobType::Revoke),
        "subscription.updated" => Some(JobType::GenericProcess),
        _ => None,
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::{FeatureMatrix, LicenseStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    Provision,
    Suspend,
    Reactivate,
    Revoke,
    GenericProcess,
    /// Side-effect delivery after a successful transition.
    Notify,
}

impl JobType {
    /// Status a license job drives the license towards, if any.
    pub fn target_status(self) -> Option<LicenseStatus> {
        match self {
            JobType::Provision | JobType::Reactivate => Some(LicenseStatus::Active),
            JobType::Suspend => Some(LicenseStatus::Suspended),
            JobType::Revoke => Some(LicenseStatus::Revoked),
            JobType::GenericProcess | JobType::Notify => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its first delivery.
    Pending,
    /// Leased by a worker.
    InProgress,
    Succeeded,
    /// Last attempt failed; eligible again at `next_attempt_at`.
    Failed,
    /// Removed from the retry flow, kept for operators.
    DeadLettered,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::DeadLettered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeadLetterReason {
    /// Ran out of attempts on transient failures.
    Exhausted,
    /// Business-rule violation that retrying cannot fix.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub correlation_id: String,
    pub external_event_id: Option<String>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_attempt_at: i64,
    #[serde(skip_serializing)]
    pub lease_token: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub last_error: Option<String>,
    pub dead_letter_reason: Option<DeadLetterReason>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub correlation_id: String,
    pub external_event_id: Option<String>,
    pub payload: serde_json::Value,
}

/// Payload of every license-affecting job.
///
/// `tenant_id` is a cross-check only: workers re-derive the tenant from the
/// stored, verified event referenced by `external_event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseJobPayload {
    pub external_event_id: String,
    pub tenant_id: String,
    /// Sender timestamp of the originating event.
    pub occurred_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LicenseIssued,
    StatusChanged,
    PlanChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub tenant_id: String,
    pub license_id: String,
    pub kind: NotificationKind,
    pub status: LicenseStatus,
    pub plan: String,
    pub features: FeatureMatrix,
    /// License key sealed with the tenant's data key (base64), only on issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub in_progress: i64,
    pub failed: i64,
    pub succeeded: i64,
    pub dead_lettered: i64,
}

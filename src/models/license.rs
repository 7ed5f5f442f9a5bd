use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Per-license map of named capabilities. A missing key means disabled.
pub type FeatureMatrix = BTreeMap<String, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LicenseStatus {
    Trial,
    Active,
    Expired,
    Suspended,
    Revoked,
}

impl LicenseStatus {
    /// Legal successor states. `Revoked` has none.
    pub fn allowed_targets(self) -> &'static [LicenseStatus] {
        use LicenseStatus::*;
        match self {
            Trial => &[Active, Expired, Revoked],
            Active => &[Expired, Suspended, Revoked],
            Expired => &[Active, Revoked],
            Suspended => &[Active, Revoked],
            Revoked => &[],
        }
    }

    pub fn can_transition_to(self, target: LicenseStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self == LicenseStatus::Revoked
    }

    /// States a license may start in when first provisioned.
    pub fn is_initial(self) -> bool {
        matches!(self, LicenseStatus::Trial | LicenseStatus::Active)
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub tenant_id: String,
    pub plan: String,
    pub status: LicenseStatus,
    pub features: FeatureMatrix,
    pub expires_at: Option<i64>,
    pub validation_count: i64,
    pub last_validated_at: Option<i64>,
    pub status_reason: Option<String>,
    /// Monotonic counter used for compare-and-set writes.
    pub version: i64,
    /// SHA-256 of the license key. The raw key is never stored.
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First characters of the key, safe to display and log.
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub customer_email_hash: Option<String>,
    /// Sender timestamp of the newest event applied to this license.
    pub last_event_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Exact feature lookup: absent keys are `false`.
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn is_past_expiry(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Input for creating the first license of a tenant.
#[derive(Debug, Clone)]
pub struct NewLicense {
    pub tenant_id: String,
    pub plan: String,
    pub status: LicenseStatus,
    pub features: FeatureMatrix,
    pub expires_at: Option<i64>,
    pub customer_email_hash: Option<String>,
    pub event_at: i64,
}

/// One applied status change, written alongside the license update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseHistoryEntry {
    pub id: i64,
    pub license_id: String,
    pub tenant_id: String,
    pub from_status: Option<LicenseStatus>,
    pub to_status: LicenseStatus,
    pub version: i64,
    pub reason: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: i64,
}
